//! Deferred Renderer - a deferred-shading rendering backend for real-time 3D
//!
//! Two backends implement the [`GraphicsBackend`] trait:
//! - **wgpu**: headless GPU device rendering into offscreen frame buffers
//! - **Dummy**: CPU-side recording backend used by tests and tooling
//!
//! # Features
//! - Shader reflection drives named uniform and resource binding
//! - Typed, sliceable views over one texture allocation
//! - Triple-buffered hand-off between a render and a presentation thread
//! - Shadow, G-buffer, per-light accumulation and tone mapping passes
//! - Scene extraction from a Bevy ECS world

pub mod backend;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod renderer;
pub mod resources;
pub mod scene;
pub mod shader;

use std::sync::Arc;
use std::time::Duration;

// Re-export Bevy ECS prelude for users
pub use bevy_ecs::prelude::*;

pub use backend::wgpu_backend::WgpuBackend;
pub use backend::{DummyBackend, GraphicsBackend, TextureFormat};
pub use error::{RenderError, RenderResult};
pub use frame::{FramePresenter, PresentationHandle, PresentedFrame, ResizeHandle};
pub use pipeline::{Pipeline, RenderContext};
pub use renderer::{DeferredRenderer, PostSettings, TonemapOperator};
pub use scene::{extract_scene, SceneFrame};
pub use shader::{CompiledShader, UniformValue};

/// Backend selection for the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// wgpu backend - headless GPU device
    #[default]
    Wgpu,
    /// Recording backend without a GPU
    Dummy,
}

/// Create a backend of the given type.
pub fn create_backend(backend: BackendType) -> RenderResult<Arc<dyn GraphicsBackend>> {
    Ok(match backend {
        BackendType::Wgpu => Arc::new(WgpuBackend::new()?),
        BackendType::Dummy => Arc::new(DummyBackend::new()),
    })
}

/// Configuration for the deferred renderer
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Initial render target width
    pub width: u32,
    /// Initial render target height
    pub height: u32,
    /// Color format of the presented frame buffers
    pub frame_format: TextureFormat,
    /// Initial frame buffer pool capacity (at least three)
    pub frame_pool_capacity: usize,
    /// Shadow cascades per directional light (1 to 4)
    pub shadow_cascades: usize,
    /// Blend between uniform (0) and logarithmic (1) cascade splits
    pub cascade_split_lambda: f32,
    /// Longest wait for the GPU at the end of a frame; `None` waits forever
    pub fence_timeout: Option<Duration>,
    /// Tone mapping curve of the post pass
    pub tonemap: TonemapOperator,
    pub exposure: f32,
    pub gamma: f32,
    /// Back buffer clear color
    pub clear_color: [f32; 4],
    /// Fraction of albedo kept visible in unlit areas
    pub ambient_floor: f32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            frame_format: TextureFormat::Rgba8Unorm,
            frame_pool_capacity: 3,
            shadow_cascades: 4,
            cascade_split_lambda: 0.75,
            fence_timeout: Some(Duration::from_secs(2)),
            tonemap: TonemapOperator::Aces,
            exposure: 1.0,
            gamma: 2.2,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            ambient_floor: 0.02,
        }
    }
}

impl RendererConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_frame_format(mut self, format: TextureFormat) -> Self {
        self.frame_format = format;
        self
    }

    pub fn with_frame_pool_capacity(mut self, capacity: usize) -> Self {
        self.frame_pool_capacity = capacity;
        self
    }

    /// Cascade count is clamped to 1..=4.
    pub fn with_shadow_cascades(mut self, count: usize, lambda: f32) -> Self {
        self.shadow_cascades = count.clamp(1, renderer::cascades::MAX_CASCADES);
        self.cascade_split_lambda = lambda.clamp(0.0, 1.0);
        self
    }

    pub fn with_fence_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.fence_timeout = timeout;
        self
    }

    pub fn with_tonemap(mut self, tonemap: TonemapOperator) -> Self {
        self.tonemap = tonemap;
        self
    }

    pub fn with_exposure(mut self, exposure: f32) -> Self {
        self.exposure = exposure;
        self
    }

    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = gamma;
        self
    }

    pub fn with_clear_color(mut self, color: [f32; 4]) -> Self {
        self.clear_color = color;
        self
    }

    pub fn with_ambient_floor(mut self, floor: f32) -> Self {
        self.ambient_floor = floor;
        self
    }

    /// Settings handed to the post pass each frame.
    pub fn post_settings(&self) -> PostSettings {
        PostSettings {
            tonemap: self.tonemap,
            exposure: self.exposure,
            gamma: self.gamma,
            ambient_floor: self.ambient_floor,
            clear_color: self.clear_color,
        }
    }
}
