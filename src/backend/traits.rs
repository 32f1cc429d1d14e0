//! Core backend abstraction traits
//!
//! The renderer talks to the GPU through [`GraphicsBackend`], an immediate-mode
//! interface over opaque handles. Shaders are bound per stage and resources are
//! bound per (stage, slot), mirroring how the uniform binding layer sees them.

use crate::backend::sync::Fence;
use crate::backend::types::*;
use std::ops::Range;
use std::time::Duration;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize backend: {0}")]
    InitializationFailed(String),
    #[error("Failed to create device: {0}")]
    DeviceCreationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create texture view: {0}")]
    ViewCreationFailed(String),
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Failed to create shader: {0}")]
    ShaderCreationFailed(String),
    #[error("Unknown {kind} handle {id}")]
    UnknownHandle { kind: &'static str, id: u64 },
    #[error("Access of {size} bytes at offset {offset} exceeds buffer size {capacity}")]
    OutOfRange {
        offset: u64,
        size: u64,
        capacity: u64,
    },
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Failed to read back buffer: {0}")]
    ReadbackFailed(String),
    #[error("Feature not supported: {0}")]
    FeatureNotSupported(String),
    #[error("Fence wait timed out after {0:?}")]
    FenceTimeout(Duration),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a texture view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureViewHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a compiled shader module bound to one entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

/// Shader code handed to the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderCode {
    /// WGSL source text.
    Wgsl(String),
    /// SPIR-V words.
    SpirV(Vec<u32>),
}

/// Shader creation descriptor
#[derive(Debug, Clone)]
pub struct ShaderDescriptor<'a> {
    pub label: Option<&'a str>,
    pub stage: ShaderStage,
    pub entry_point: &'a str,
    pub code: &'a ShaderCode,
    /// Vertex input locations the entry point reads (vertex stage only).
    pub input_locations: Vec<u32>,
    /// Resource slots the entry point reads. Draws fail if any is unbound.
    pub resource_slots: Vec<BindingSlot>,
}

/// Color attachment for render pass
#[derive(Debug, Clone)]
pub struct ColorAttachment {
    pub view: TextureViewHandle,
    pub load_op: LoadOp,
    pub store_op: StoreOp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Store,
    Discard,
}

/// Depth stencil attachment for render pass
#[derive(Debug, Clone)]
pub struct DepthStencilAttachment {
    pub view: TextureViewHandle,
    /// Clear value, or `None` to load existing depth.
    pub depth_clear: Option<f32>,
    pub depth_store_op: StoreOp,
}

/// Render pass descriptor
#[derive(Debug, Clone, Default)]
pub struct RenderPassDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<ColorAttachment>,
    pub depth_stencil_attachment: Option<DepthStencilAttachment>,
}

/// Main graphics backend trait
///
/// All methods take `&self`; implementations synchronize internally so one
/// backend can be shared as `Arc<dyn GraphicsBackend>` by every resource that
/// needs to free its handle on drop.
pub trait GraphicsBackend: Send + Sync {
    /// Human-readable backend name
    fn name(&self) -> &'static str;

    // Resource creation

    /// Create a buffer
    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a buffer with initial data
    fn create_buffer_init(&self, desc: &BufferDescriptor, data: &[u8])
        -> BackendResult<BufferHandle>;

    /// Write data to a buffer
    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()>;

    /// Copy buffer contents back to the CPU, waiting for pending work
    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>>;

    /// Create a texture
    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Write one mip level of one array layer
    fn write_texture(
        &self,
        texture: TextureHandle,
        mip_level: u32,
        array_layer: u32,
        data: &[u8],
    ) -> BackendResult<()>;

    /// Create a texture view
    fn create_texture_view(
        &self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle>;

    /// Create a sampler
    fn create_sampler(&self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle>;

    /// Create a shader module for one stage and entry point
    fn create_shader(&self, desc: &ShaderDescriptor<'_>) -> BackendResult<ShaderHandle>;

    // Command recording and execution

    /// Begin a render pass
    fn begin_render_pass(&self, desc: &RenderPassDescriptor) -> BackendResult<()>;

    /// End the current render pass
    fn end_render_pass(&self) -> BackendResult<()>;

    /// Unbind every per-stage shader and resource binding
    fn unbind_shaders(&self);

    /// Bind a shader to its stage
    fn bind_shader(&self, stage: ShaderStage, shader: ShaderHandle);

    /// Bind a uniform buffer to a stage slot
    fn bind_uniform_buffer(&self, stage: ShaderStage, slot: BindingSlot, buffer: BufferHandle);

    /// Bind a texture view to a stage slot
    fn bind_texture(&self, stage: ShaderStage, slot: BindingSlot, view: TextureViewHandle);

    /// Bind a sampler to a stage slot
    fn bind_sampler(&self, stage: ShaderStage, slot: BindingSlot, sampler: SamplerHandle);

    /// Set fixed-function state for subsequent draws
    fn set_pipeline_state(&self, state: &PipelineState);

    /// Set vertex buffer and the layout its elements follow
    fn set_vertex_buffer(&self, slot: u32, buffer: BufferHandle, layout: &VertexBufferLayout);

    /// Set index buffer
    fn set_index_buffer(&self, buffer: BufferHandle, format: IndexFormat);

    /// Set viewport
    fn set_viewport(&self, viewport: Viewport);

    /// Draw primitives
    fn draw(&self, vertices: Range<u32>, instances: Range<u32>) -> BackendResult<()>;

    /// Draw indexed primitives
    fn draw_indexed(
        &self,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) -> BackendResult<()>;

    /// Submit all recorded work to the GPU
    fn flush(&self) -> BackendResult<()>;

    /// Insert a fence signaled once everything flushed so far has completed
    fn insert_fence(&self) -> BackendResult<Fence>;

    /// Wait for a fence, optionally bounded by a timeout
    fn wait_fence(&self, fence: &Fence, timeout: Option<Duration>) -> BackendResult<()> {
        match timeout {
            Some(timeout) => {
                if fence.wait_timeout(timeout) {
                    Ok(())
                } else {
                    Err(BackendError::FenceTimeout(timeout))
                }
            }
            None => {
                fence.wait();
                Ok(())
            }
        }
    }

    // Resource cleanup

    /// Destroy a buffer
    fn destroy_buffer(&self, buffer: BufferHandle);

    /// Destroy a texture
    fn destroy_texture(&self, texture: TextureHandle);

    /// Destroy a texture view
    fn destroy_texture_view(&self, view: TextureViewHandle);

    /// Destroy a sampler
    fn destroy_sampler(&self, sampler: SamplerHandle);

    /// Destroy a shader
    fn destroy_shader(&self, shader: ShaderHandle);
}
