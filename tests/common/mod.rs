//! Common utilities for integration tests.
//!
//! Tests run against the recording backend everywhere and against the wgpu
//! backend when an adapter is available.

#![allow(dead_code)]

use std::sync::Arc;

use deferred_renderer::backend::{DummyBackend, GraphicsBackend, ShaderStage};
use deferred_renderer::pipeline::Pipeline;
use deferred_renderer::resources::{GpuMesh, Material, Mesh};
use deferred_renderer::scene::{
    AmbientLight, Camera, DirectionalLight, Light, PointLight, SceneFrame, SpotLight,
};
use deferred_renderer::shader::{CompiledShader, ShaderStageUnit};
use deferred_renderer::WgpuBackend;
use glam::{Mat4, Vec3};

// ============================================================================
// Backend Enumeration
// ============================================================================

/// Backends available to the tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Backend {
    /// Recording backend (no GPU work).
    Dummy,
    /// Headless wgpu device.
    Wgpu,
}

impl Backend {
    /// Create the backend, or `None` when the machine cannot provide it.
    pub fn create(self) -> Option<Arc<dyn GraphicsBackend>> {
        match self {
            Backend::Dummy => Some(Arc::new(DummyBackend::new())),
            Backend::Wgpu => match WgpuBackend::new() {
                Ok(backend) => Some(Arc::new(backend)),
                Err(err) => {
                    eprintln!("wgpu backend not available: {}", err);
                    None
                }
            },
        }
    }
}

/// Install `env_logger` once; later calls are ignored.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Shaders
// ============================================================================

/// Fragment program with a single `vec4 tint` at offset 0.
pub const TINT_SHADER: &str = r#"
struct Material {
    tint: vec4<f32>,
}

@group(0) @binding(0) var<uniform> material: Material;

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    return vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
}

@fragment
fn fs_main() -> @location(0) vec4<f32> {
    return material.tint;
}
"#;

pub fn unit(
    backend: &Arc<dyn GraphicsBackend>,
    stage: ShaderStage,
    entry_point: &str,
    source: &str,
) -> ShaderStageUnit {
    ShaderStageUnit::new(
        backend,
        CompiledShader::from_wgsl("tint", stage, entry_point, source),
    )
    .unwrap()
}

pub fn tint_pipeline(backend: &Arc<dyn GraphicsBackend>) -> Pipeline {
    Pipeline::new(
        "tint",
        vec![
            unit(backend, ShaderStage::Vertex, "vs_main", TINT_SHADER),
            unit(backend, ShaderStage::Fragment, "fs_main", TINT_SHADER),
        ],
    )
    .unwrap()
}

// ============================================================================
// Scenes
// ============================================================================

pub fn camera() -> Camera {
    Camera::new(Vec3::new(0.0, 4.0, 10.0), Vec3::ZERO)
}

/// A floor and a cube lit by one light of each kind. The directional, point
/// and spot lights cast shadows.
pub fn lit_scene(backend: &Arc<dyn GraphicsBackend>) -> SceneFrame {
    let mut scene = SceneFrame::new().with_camera(camera());
    let cube = Arc::new(GpuMesh::upload(backend, &Mesh::cube()).unwrap());
    let floor = Arc::new(GpuMesh::upload(backend, &Mesh::plane(20.0, 20.0, 1)).unwrap());
    scene.add_drawable(Mat4::IDENTITY, floor, Arc::new(Material::rubber(Vec3::splat(0.5))));
    scene.add_drawable(
        Mat4::from_translation(Vec3::Y),
        cube,
        Arc::new(Material::gold()),
    );
    let sun = DirectionalLight {
        shadow_resolution: Some(256),
        ..Default::default()
    };
    let lamp = PointLight {
        shadow_resolution: Some(64),
        ..Default::default()
    };
    let torch = SpotLight {
        shadow_resolution: Some(128),
        ..Default::default()
    };
    scene.add_light(Light::directional(1, &sun));
    scene.add_light(Light::point(2, Vec3::new(2.0, 3.0, 0.0), &lamp));
    scene.add_light(Light::spot(3, Vec3::new(-2.0, 4.0, 2.0), &torch));
    scene.add_light(Light::ambient(4, &AmbientLight::default()));
    scene
}

/// Pass labels with the per-layer suffix of shadow passes stripped.
pub fn pass_kinds(labels: &[String]) -> Vec<&str> {
    let mut kinds: Vec<&str> = Vec::new();
    for label in labels {
        let kind = label.split(':').next().unwrap_or(label);
        if kinds.last() != Some(&kind) {
            kinds.push(kind);
        }
    }
    kinds
}
