//! wgpu backend implementation
//!
//! Runs headless: every render target is an offscreen texture. Draws are
//! recorded with snapshots of the pipeline, bind groups and buffers they use
//! and are encoded when their render pass ends. Render pipelines are built
//! lazily from the bound shaders, fixed-function state, vertex layout and
//! attachment formats, then cached.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::backend::sync::Fence;
use crate::backend::traits::*;
use crate::backend::types::*;

const COPY_ALIGNMENT: u64 = wgpu::COPY_BUFFER_ALIGNMENT;

struct BufferEntry {
    /// Replaced by a fresh buffer when written while the open pass still
    /// references it, so earlier draws keep the contents they were recorded
    /// with.
    buffer: Arc<wgpu::Buffer>,
    desc: BufferDescriptor,
    allocated: u64,
}

struct TextureEntry {
    texture: wgpu::Texture,
    desc: TextureDescriptor,
}

struct ViewEntry {
    view: Arc<wgpu::TextureView>,
    format: TextureFormat,
}

struct ShaderEntry {
    module: Arc<wgpu::ShaderModule>,
    label: Option<String>,
    entry_point: String,
    input_locations: Vec<u32>,
    resource_slots: Vec<BindingSlot>,
}

#[derive(Debug, Clone, Copy)]
enum Bound {
    Buffer(u64),
    Texture(u64),
    Sampler(u64),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    vertex: u64,
    fragment: u64,
    state: PipelineState,
    vertex_layout: Option<VertexBufferLayout>,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
}

enum DrawCall {
    Direct {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    Indexed {
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    },
}

struct DrawCommand {
    pipeline: Arc<wgpu::RenderPipeline>,
    bind_groups: Vec<wgpu::BindGroup>,
    vertex_buffer: Option<Arc<wgpu::Buffer>>,
    index_buffer: Option<(Arc<wgpu::Buffer>, wgpu::IndexFormat)>,
    viewport: Option<Viewport>,
    call: DrawCall,
}

struct OpenPass {
    desc: RenderPassDescriptor,
    color_views: Vec<Arc<wgpu::TextureView>>,
    depth_view: Option<Arc<wgpu::TextureView>>,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
    draws: Vec<DrawCommand>,
    /// Buffers read by recorded draws.
    referenced: HashSet<u64>,
}

#[derive(Default)]
struct WgpuState {
    next_id: u64,
    buffers: HashMap<u64, BufferEntry>,
    textures: HashMap<u64, TextureEntry>,
    views: HashMap<u64, ViewEntry>,
    samplers: HashMap<u64, Arc<wgpu::Sampler>>,
    shaders: HashMap<u64, ShaderEntry>,
    pipelines: HashMap<PipelineKey, Arc<wgpu::RenderPipeline>>,

    bound_shaders: [Option<u64>; 6],
    bindings: HashMap<(ShaderStage, BindingSlot), Bound>,
    pipeline_state: PipelineState,
    vertex: Option<(u64, VertexBufferLayout)>,
    index: Option<(u64, IndexFormat)>,
    viewport: Option<Viewport>,

    encoder: Option<wgpu::CommandEncoder>,
    pass: Option<OpenPass>,
}

impl WgpuState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Headless wgpu backend.
pub struct WgpuBackend {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter: wgpu::Adapter,
    device: wgpu::Device,
    queue: wgpu::Queue,
    state: Mutex<WgpuState>,
}

impl WgpuBackend {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        if usage.contains(BufferUsage::MAP_READ) {
            return wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::MAP_WRITE) {
            return wgpu::BufferUsages::MAP_WRITE | wgpu::BufferUsages::COPY_SRC;
        }
        // Every other buffer can be copied in both directions so writes can be
        // ordered through the encoder and contents read back.
        let mut result = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        if usage.contains(BufferUsage::STORAGE) {
            result |= wgpu::BufferUsages::STORAGE;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::STORAGE_BINDING) {
            result |= wgpu::TextureUsages::STORAGE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32 => wgpu::VertexFormat::Float32,
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
            VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
            VertexFormat::Uint32x2 => wgpu::VertexFormat::Uint32x2,
            VertexFormat::Uint32x3 => wgpu::VertexFormat::Uint32x3,
            VertexFormat::Uint32x4 => wgpu::VertexFormat::Uint32x4,
            VertexFormat::Sint32 => wgpu::VertexFormat::Sint32,
            VertexFormat::Sint32x2 => wgpu::VertexFormat::Sint32x2,
            VertexFormat::Sint32x3 => wgpu::VertexFormat::Sint32x3,
            VertexFormat::Sint32x4 => wgpu::VertexFormat::Sint32x4,
        }
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::Src => wgpu::BlendFactor::Src,
            BlendFactor::OneMinusSrc => wgpu::BlendFactor::OneMinusSrc,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::Dst => wgpu::BlendFactor::Dst,
            BlendFactor::OneMinusDst => wgpu::BlendFactor::OneMinusDst,
            BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
            BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        }
    }

    fn convert_blend_operation(op: BlendOperation) -> wgpu::BlendOperation {
        match op {
            BlendOperation::Add => wgpu::BlendOperation::Add,
            BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
            BlendOperation::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
            BlendOperation::Min => wgpu::BlendOperation::Min,
            BlendOperation::Max => wgpu::BlendOperation::Max,
        }
    }

    fn convert_blend_component(component: &BlendComponent) -> wgpu::BlendComponent {
        wgpu::BlendComponent {
            src_factor: Self::convert_blend_factor(component.src_factor),
            dst_factor: Self::convert_blend_factor(component.dst_factor),
            operation: Self::convert_blend_operation(component.operation),
        }
    }

    fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
        match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }

    fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
            AddressMode::MirrorRepeat => wgpu::AddressMode::MirrorRepeat,
        }
    }

    fn convert_index_format(format: IndexFormat) -> wgpu::IndexFormat {
        match format {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        }
    }
}

impl WgpuBackend {
    /// Create a headless device, blocking until it is ready.
    ///
    /// `WGPU_BACKEND` and `WGPU_POWER_PREF` are honored the same way the wgpu
    /// examples honor them.
    pub fn new() -> BackendResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> BackendResult<Self> {
        let backends = wgpu::util::backend_bits_from_env().unwrap_or(wgpu::Backends::all());
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::util::power_preference_from_env()
                    .unwrap_or(wgpu::PowerPreference::HighPerformance),
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Deferred Renderer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::DeviceCreationFailed(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|error| {
            log::error!("wgpu: {}", error);
        }));

        Ok(Self {
            instance,
            adapter,
            device,
            queue,
            state: Mutex::new(WgpuState::default()),
        })
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn adapter_info(&self) -> wgpu::AdapterInfo {
        self.adapter.get_info()
    }

    /// Run `create` inside a validation error scope.
    fn validated<T>(
        &self,
        create: impl FnOnce() -> T,
        error: impl FnOnce(String) -> BackendError,
    ) -> BackendResult<T> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = create();
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(err) => Err(error(err.to_string())),
            None => Ok(value),
        }
    }

    fn encoder<'a>(&self, state: &'a mut WgpuState) -> &'a mut wgpu::CommandEncoder {
        state.encoder.get_or_insert_with(|| {
            self.device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("Frame Encoder"),
                })
        })
    }

    fn submit(&self, state: &mut WgpuState) {
        if let Some(encoder) = state.encoder.take() {
            self.queue.submit(Some(encoder.finish()));
        }
    }

    fn create_render_pipeline(
        &self,
        key: &PipelineKey,
        vertex: &ShaderEntry,
        fragment: &ShaderEntry,
    ) -> BackendResult<wgpu::RenderPipeline> {
        let attributes: Vec<wgpu::VertexAttribute> = key
            .vertex_layout
            .iter()
            .flat_map(|layout| layout.attributes.iter())
            .map(|a| wgpu::VertexAttribute {
                format: Self::convert_vertex_format(a.format),
                offset: a.offset,
                shader_location: a.location,
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = key
            .vertex_layout
            .iter()
            .map(|layout| wgpu::VertexBufferLayout {
                array_stride: layout.array_stride,
                step_mode: match layout.step_mode {
                    VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
                    VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes: &attributes,
            })
            .collect();

        let state = &key.state;
        let blend = state.blend.as_ref().map(|b| wgpu::BlendState {
            color: Self::convert_blend_component(&b.color),
            alpha: Self::convert_blend_component(&b.alpha),
        });
        let color_targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color_formats
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: Self::convert_texture_format(*format),
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let primitive = wgpu::PrimitiveState {
            topology: match state.topology {
                PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
                PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
                PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
                PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
                PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
            },
            strip_index_format: None,
            front_face: match state.front_face {
                FrontFace::Ccw => wgpu::FrontFace::Ccw,
                FrontFace::Cw => wgpu::FrontFace::Cw,
            },
            cull_mode: match state.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        };

        // Depth state only applies when the pass has a depth attachment.
        let depth_stencil = key.depth_format.map(|format| {
            let depth = state.depth.unwrap_or(DepthState {
                write_enabled: false,
                compare: CompareFunction::Always,
            });
            wgpu::DepthStencilState {
                format: Self::convert_texture_format(format),
                depth_write_enabled: depth.write_enabled,
                depth_compare: Self::convert_compare_function(depth.compare),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }
        });

        let label = format!(
            "{} + {}",
            vertex.label.as_deref().unwrap_or("vertex"),
            fragment.label.as_deref().unwrap_or("fragment")
        );
        log::debug!("Creating render pipeline '{}'", label);

        self.validated(
            || {
                self.device
                    .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                        label: Some(&label),
                        layout: None,
                        vertex: wgpu::VertexState {
                            module: &vertex.module,
                            entry_point: &vertex.entry_point,
                            buffers: &vertex_buffers,
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &fragment.module,
                            entry_point: &fragment.entry_point,
                            targets: &color_targets,
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        }),
                        primitive,
                        depth_stencil,
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                    })
            },
            BackendError::PipelineCreationFailed,
        )
    }

    /// Build one bind group per group index the pipeline uses, filling gaps
    /// with empty groups. A slot read by both stages takes the vertex stage's
    /// binding.
    fn create_bind_groups(
        &self,
        state: &WgpuState,
        pipeline: &wgpu::RenderPipeline,
        stages: &[(ShaderStage, &[BindingSlot])],
        referenced: &mut Vec<u64>,
    ) -> BackendResult<Vec<wgpu::BindGroup>> {
        let mut groups: BTreeMap<u32, BTreeMap<u32, Bound>> = BTreeMap::new();
        for (stage, slots) in stages {
            for slot in slots.iter() {
                let bound = state.bindings.get(&(*stage, *slot)).ok_or_else(|| {
                    BackendError::InvalidCommand(format!("{} shader reads {} which is unbound", stage, slot))
                })?;
                groups
                    .entry(slot.group)
                    .or_default()
                    .entry(slot.binding)
                    .or_insert(*bound);
            }
        }

        let count = groups.keys().next_back().map_or(0, |group| group + 1);
        let mut bind_groups = Vec::with_capacity(count as usize);
        for group in 0..count {
            let mut entries = Vec::new();
            for (binding, bound) in groups.get(&group).into_iter().flatten() {
                let resource = match *bound {
                    Bound::Buffer(id) => {
                        let entry = state
                            .buffers
                            .get(&id)
                            .ok_or(BackendError::UnknownHandle { kind: "buffer", id })?;
                        referenced.push(id);
                        wgpu::BindingResource::Buffer(entry.buffer.as_entire_buffer_binding())
                    }
                    Bound::Texture(id) => {
                        let entry = state.views.get(&id).ok_or(BackendError::UnknownHandle {
                            kind: "texture view",
                            id,
                        })?;
                        wgpu::BindingResource::TextureView(&entry.view)
                    }
                    Bound::Sampler(id) => {
                        let sampler = state
                            .samplers
                            .get(&id)
                            .ok_or(BackendError::UnknownHandle { kind: "sampler", id })?;
                        wgpu::BindingResource::Sampler(sampler)
                    }
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: *binding,
                    resource,
                });
            }
            let layout = pipeline.get_bind_group_layout(group);
            bind_groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout: &layout,
                entries: &entries,
            }));
        }
        Ok(bind_groups)
    }

    fn record_draw(&self, call: DrawCall) -> BackendResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let pass = state
            .pass
            .as_ref()
            .ok_or_else(|| BackendError::InvalidCommand("draw outside of a render pass".to_string()))?;
        let (Some(vertex_id), Some(fragment_id)) = (
            state.bound_shaders[ShaderStage::Vertex.index()],
            state.bound_shaders[ShaderStage::Fragment.index()],
        ) else {
            return Err(BackendError::InvalidCommand(
                "draw requires bound vertex and fragment shaders".to_string(),
            ));
        };
        let vertex = state.shaders.get(&vertex_id).ok_or(BackendError::UnknownHandle {
            kind: "shader",
            id: vertex_id,
        })?;
        let fragment = state.shaders.get(&fragment_id).ok_or(BackendError::UnknownHandle {
            kind: "shader",
            id: fragment_id,
        })?;

        let vertex_layout = if vertex.input_locations.is_empty() {
            None
        } else {
            let (_, layout) = state.vertex.as_ref().ok_or_else(|| {
                BackendError::InvalidCommand(format!(
                    "vertex shader {:?} reads inputs but no vertex buffer is bound",
                    vertex.label
                ))
            })?;
            if let Some(location) = vertex
                .input_locations
                .iter()
                .find(|location| layout.attribute(**location).is_none())
            {
                return Err(BackendError::InvalidCommand(format!(
                    "vertex buffer has no attribute at location {}",
                    location
                )));
            }
            Some(layout.clone())
        };

        let key = PipelineKey {
            vertex: vertex_id,
            fragment: fragment_id,
            state: state.pipeline_state,
            vertex_layout,
            color_formats: pass.color_formats.clone(),
            depth_format: pass.depth_format,
        };
        let pipeline = match state.pipelines.get(&key) {
            Some(pipeline) => Arc::clone(pipeline),
            None => {
                let pipeline = Arc::new(self.create_render_pipeline(&key, vertex, fragment)?);
                state.pipelines.insert(key.clone(), Arc::clone(&pipeline));
                pipeline
            }
        };

        let vertex_slots = vertex.resource_slots.clone();
        let fragment_slots = fragment.resource_slots.clone();
        let mut referenced = Vec::new();
        let shared: &WgpuState = state;
        let bind_groups = self.validated(
            || {
                self.create_bind_groups(
                    shared,
                    &pipeline,
                    &[
                        (ShaderStage::Vertex, vertex_slots.as_slice()),
                        (ShaderStage::Fragment, fragment_slots.as_slice()),
                    ],
                    &mut referenced,
                )
            },
            BackendError::InvalidCommand,
        )??;

        let vertex_buffer = match (&key.vertex_layout, &state.vertex) {
            (Some(_), Some((id, _))) => {
                let entry = state.buffers.get(id).ok_or(BackendError::UnknownHandle {
                    kind: "buffer",
                    id: *id,
                })?;
                referenced.push(*id);
                Some(Arc::clone(&entry.buffer))
            }
            _ => None,
        };
        let index_buffer = match (&call, state.index) {
            (DrawCall::Indexed { .. }, Some((id, format))) => {
                let entry = state.buffers.get(&id).ok_or(BackendError::UnknownHandle {
                    kind: "buffer",
                    id,
                })?;
                referenced.push(id);
                Some((Arc::clone(&entry.buffer), Self::convert_index_format(format)))
            }
            (DrawCall::Indexed { .. }, None) => {
                return Err(BackendError::InvalidCommand(
                    "indexed draw without an index buffer".to_string(),
                ))
            }
            _ => None,
        };

        let viewport = state.viewport;
        if let Some(pass) = state.pass.as_mut() {
            pass.referenced.extend(referenced);
            pass.draws.push(DrawCommand {
                pipeline,
                bind_groups,
                vertex_buffer,
                index_buffer,
                viewport,
                call,
            });
        }
        Ok(())
    }
}

impl GraphicsBackend for WgpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let allocated = desc.size.max(COPY_ALIGNMENT).div_ceil(COPY_ALIGNMENT) * COPY_ALIGNMENT;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: allocated,
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.buffers.insert(
            id,
            BufferEntry {
                buffer: Arc::new(buffer),
                desc: desc.clone(),
                allocated,
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        if data.len() as u64 > desc.size {
            return Err(BackendError::OutOfRange {
                offset: 0,
                size: data.len() as u64,
                capacity: desc.size,
            });
        }
        let allocated = desc.size.max(COPY_ALIGNMENT).div_ceil(COPY_ALIGNMENT) * COPY_ALIGNMENT;
        let mut contents = data.to_vec();
        contents.resize(allocated as usize, 0);
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: desc.label.as_deref(),
                contents: &contents,
                usage: Self::convert_buffer_usage(desc.usage),
            });
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.buffers.insert(
            id,
            BufferEntry {
                buffer: Arc::new(buffer),
                desc: desc.clone(),
                allocated,
            },
        );
        Ok(BufferHandle(id))
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let size = data.len() as u64;
        let (capacity, allocated, mut target, desc) = match state.buffers.get(&buffer.0) {
            Some(entry) => (
                entry.desc.size,
                entry.allocated,
                Arc::clone(&entry.buffer),
                entry.desc.clone(),
            ),
            None => {
                return Err(BackendError::UnknownHandle {
                    kind: "buffer",
                    id: buffer.0,
                })
            }
        };
        if offset + size > capacity {
            return Err(BackendError::OutOfRange {
                offset,
                size,
                capacity,
            });
        }
        if offset % COPY_ALIGNMENT != 0 || size % COPY_ALIGNMENT != 0 {
            return Err(BackendError::InvalidCommand(format!(
                "buffer write of {} bytes at offset {} is not {}-byte aligned",
                size, offset, COPY_ALIGNMENT
            )));
        }
        if size == 0 {
            return Ok(());
        }

        let referenced = state
            .pass
            .as_mut()
            .is_some_and(|pass| pass.referenced.remove(&buffer.0));
        if referenced {
            let renamed = Arc::new(self.device.create_buffer(&wgpu::BufferDescriptor {
                label: desc.label.as_deref(),
                size: allocated,
                usage: Self::convert_buffer_usage(desc.usage),
                mapped_at_creation: false,
            }));
            self.encoder(state)
                .copy_buffer_to_buffer(&target, 0, &renamed, 0, allocated);
            if let Some(entry) = state.buffers.get_mut(&buffer.0) {
                entry.buffer = Arc::clone(&renamed);
            }
            target = renamed;
        }

        if state.encoder.is_some() {
            // Recorded work may read this buffer; keep the write in order.
            let staging = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Staging Write"),
                    contents: data,
                    usage: wgpu::BufferUsages::COPY_SRC,
                });
            self.encoder(state)
                .copy_buffer_to_buffer(&staging, 0, &target, offset, size);
        } else {
            self.queue.write_buffer(&target, offset, data);
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let (staging, skip) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if state.pass.is_some() {
                return Err(BackendError::InvalidCommand(
                    "buffer read while a render pass is open".to_string(),
                ));
            }
            let entry = state.buffers.get(&buffer.0).ok_or(BackendError::UnknownHandle {
                kind: "buffer",
                id: buffer.0,
            })?;
            if offset + size > entry.desc.size {
                return Err(BackendError::OutOfRange {
                    offset,
                    size,
                    capacity: entry.desc.size,
                });
            }
            let start = offset - offset % COPY_ALIGNMENT;
            let end = (offset + size).div_ceil(COPY_ALIGNMENT) * COPY_ALIGNMENT;
            let source = Arc::clone(&entry.buffer);
            let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Readback"),
                size: (end - start).max(COPY_ALIGNMENT),
                usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            if end > start {
                self.encoder(state)
                    .copy_buffer_to_buffer(&source, start, &staging, 0, end - start);
            }
            self.submit(state);
            (staging, (offset - start) as usize)
        };

        let (sender, receiver) = std::sync::mpsc::channel();
        staging
            .slice(..)
            .map_async(wgpu::MapMode::Read, move |result| {
                let _ = sender.send(result);
            });
        self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?
            .map_err(|e| BackendError::ReadbackFailed(e.to_string()))?;

        let bytes = {
            let mapped = staging.slice(..).get_mapped_range();
            mapped[skip..skip + size as usize].to_vec()
        };
        staging.unmap();
        Ok(bytes)
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        let texture = self.validated(
            || {
                self.device.create_texture(&wgpu::TextureDescriptor {
                    label: desc.label.as_deref(),
                    size: wgpu::Extent3d {
                        width: desc.width,
                        height: desc.height,
                        depth_or_array_layers: desc.array_layers,
                    },
                    mip_level_count: desc.mip_levels,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: Self::convert_texture_format(desc.format),
                    usage: Self::convert_texture_usage(desc.usage),
                    view_formats: &[],
                })
            },
            BackendError::TextureCreationFailed,
        )?;
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.textures.insert(
            id,
            TextureEntry {
                texture,
                desc: desc.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn write_texture(
        &self,
        texture: TextureHandle,
        mip_level: u32,
        array_layer: u32,
        data: &[u8],
    ) -> BackendResult<()> {
        let state = self.state.lock();
        let entry = state.textures.get(&texture.0).ok_or(BackendError::UnknownHandle {
            kind: "texture",
            id: texture.0,
        })?;
        let desc = &entry.desc;
        if mip_level >= desc.mip_levels || array_layer >= desc.array_layers {
            return Err(BackendError::InvalidCommand(format!(
                "texture write to mip {} layer {} is out of range",
                mip_level, array_layer
            )));
        }
        let (width, height) = desc.mip_size(mip_level);
        let bytes_per_row = width * desc.format.bytes_per_pixel();
        let expected = (bytes_per_row * height) as u64;
        if data.len() as u64 != expected {
            return Err(BackendError::OutOfRange {
                offset: 0,
                size: data.len() as u64,
                capacity: expected,
            });
        }
        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: 0,
                    z: array_layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(bytes_per_row),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn create_texture_view(
        &self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let mut state = self.state.lock();
        let entry = state.textures.get(&texture.0).ok_or(BackendError::UnknownHandle {
            kind: "texture",
            id: texture.0,
        })?;
        let format = entry.desc.format;
        let view = self.validated(
            || {
                entry.texture.create_view(&wgpu::TextureViewDescriptor {
                    label: desc.label.as_deref(),
                    format: None,
                    dimension: Some(match desc.dimension {
                        TextureViewDimension::D2 => wgpu::TextureViewDimension::D2,
                        TextureViewDimension::D2Array => wgpu::TextureViewDimension::D2Array,
                    }),
                    aspect: match desc.aspect {
                        TextureAspect::All => wgpu::TextureAspect::All,
                        TextureAspect::DepthOnly => wgpu::TextureAspect::DepthOnly,
                    },
                    base_mip_level: desc.base_mip_level,
                    mip_level_count: Some(desc.mip_level_count),
                    base_array_layer: desc.base_array_layer,
                    array_layer_count: Some(desc.array_layer_count),
                })
            },
            BackendError::ViewCreationFailed,
        )?;
        let id = state.allocate_id();
        state.views.insert(
            id,
            ViewEntry {
                view: Arc::new(view),
                format,
            },
        );
        Ok(TextureViewHandle(id))
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: desc.label.as_deref(),
            address_mode_u: Self::convert_address_mode(desc.address_mode_u),
            address_mode_v: Self::convert_address_mode(desc.address_mode_v),
            address_mode_w: Self::convert_address_mode(desc.address_mode_w),
            mag_filter: Self::convert_filter_mode(desc.mag_filter),
            min_filter: Self::convert_filter_mode(desc.min_filter),
            mipmap_filter: Self::convert_filter_mode(desc.mipmap_filter),
            compare: desc.compare.map(Self::convert_compare_function),
            ..Default::default()
        });
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.samplers.insert(id, Arc::new(sampler));
        Ok(SamplerHandle(id))
    }

    fn create_shader(&self, desc: &ShaderDescriptor<'_>) -> BackendResult<ShaderHandle> {
        if !matches!(desc.stage, ShaderStage::Vertex | ShaderStage::Fragment) {
            return Err(BackendError::FeatureNotSupported(format!(
                "{} shaders on the wgpu backend",
                desc.stage
            )));
        }
        let source = match desc.code {
            ShaderCode::Wgsl(source) => wgpu::ShaderSource::Wgsl(source.as_str().into()),
            ShaderCode::SpirV(words) => wgpu::ShaderSource::SpirV(words.as_slice().into()),
        };
        let module = self.validated(
            || {
                self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: desc.label,
                    source,
                })
            },
            BackendError::ShaderCreationFailed,
        )?;
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.shaders.insert(
            id,
            ShaderEntry {
                module: Arc::new(module),
                label: desc.label.map(str::to_string),
                entry_point: desc.entry_point.to_string(),
                input_locations: desc.input_locations.clone(),
                resource_slots: desc.resource_slots.clone(),
            },
        );
        Ok(ShaderHandle(id))
    }

    fn begin_render_pass(&self, desc: &RenderPassDescriptor) -> BackendResult<()> {
        let mut state = self.state.lock();
        if let Some(open) = &state.pass {
            return Err(BackendError::InvalidCommand(format!(
                "render pass {:?} begun while {:?} is still open",
                desc.label, open.desc.label
            )));
        }
        let view = |handle: TextureViewHandle| {
            state
                .views
                .get(&handle.0)
                .map(|entry| (Arc::clone(&entry.view), entry.format))
                .ok_or(BackendError::UnknownHandle {
                    kind: "texture view",
                    id: handle.0,
                })
        };
        let mut color_views = Vec::with_capacity(desc.color_attachments.len());
        let mut color_formats = Vec::with_capacity(desc.color_attachments.len());
        for attachment in &desc.color_attachments {
            let (view, format) = view(attachment.view)?;
            color_views.push(view);
            color_formats.push(format);
        }
        let (depth_view, depth_format) = match &desc.depth_stencil_attachment {
            Some(attachment) => {
                let (view, format) = view(attachment.view)?;
                (Some(view), Some(format))
            }
            None => (None, None),
        };
        log::trace!("WgpuBackend: begin render pass {:?}", desc.label);
        state.pass = Some(OpenPass {
            desc: desc.clone(),
            color_views,
            depth_view,
            color_formats,
            depth_format,
            draws: Vec::new(),
            referenced: HashSet::new(),
        });
        Ok(())
    }

    fn end_render_pass(&self) -> BackendResult<()> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let pass = state.pass.take().ok_or_else(|| {
            BackendError::InvalidCommand("end_render_pass without an open pass".to_string())
        })?;
        let encoder = self.encoder(state);

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = pass
            .desc
            .color_attachments
            .iter()
            .zip(&pass.color_views)
            .map(|(attachment, view)| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: match attachment.load_op {
                            LoadOp::Clear(color) => wgpu::LoadOp::Clear(wgpu::Color {
                                r: color[0] as f64,
                                g: color[1] as f64,
                                b: color[2] as f64,
                                a: color[3] as f64,
                            }),
                            LoadOp::Load => wgpu::LoadOp::Load,
                        },
                        store: match attachment.store_op {
                            StoreOp::Store => wgpu::StoreOp::Store,
                            StoreOp::Discard => wgpu::StoreOp::Discard,
                        },
                    },
                })
            })
            .collect();

        let depth_stencil_attachment = pass
            .desc
            .depth_stencil_attachment
            .as_ref()
            .zip(pass.depth_view.as_ref())
            .map(|(attachment, view)| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: match attachment.depth_clear {
                        Some(value) => wgpu::LoadOp::Clear(value),
                        None => wgpu::LoadOp::Load,
                    },
                    store: match attachment.depth_store_op {
                        StoreOp::Store => wgpu::StoreOp::Store,
                        StoreOp::Discard => wgpu::StoreOp::Discard,
                    },
                }),
                stencil_ops: None,
            });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: pass.desc.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for draw in &pass.draws {
                render_pass.set_pipeline(&draw.pipeline);
                for (index, group) in draw.bind_groups.iter().enumerate() {
                    render_pass.set_bind_group(index as u32, group, &[]);
                }
                if let Some(buffer) = &draw.vertex_buffer {
                    render_pass.set_vertex_buffer(0, buffer.slice(..));
                }
                if let Some((buffer, format)) = &draw.index_buffer {
                    render_pass.set_index_buffer(buffer.slice(..), *format);
                }
                if let Some(v) = draw.viewport {
                    render_pass.set_viewport(v.x, v.y, v.width, v.height, v.min_depth, v.max_depth);
                }
                match &draw.call {
                    DrawCall::Direct {
                        vertices,
                        instances,
                    } => render_pass.draw(vertices.clone(), instances.clone()),
                    DrawCall::Indexed {
                        indices,
                        base_vertex,
                        instances,
                    } => render_pass.draw_indexed(indices.clone(), *base_vertex, instances.clone()),
                }
            }
        }
        log::trace!(
            "WgpuBackend: encoded pass {:?} with {} draws",
            pass.desc.label,
            pass.draws.len()
        );
        Ok(())
    }

    fn unbind_shaders(&self) {
        let mut state = self.state.lock();
        state.bound_shaders = [None; 6];
        state.bindings.clear();
    }

    fn bind_shader(&self, stage: ShaderStage, shader: ShaderHandle) {
        let mut state = self.state.lock();
        if state.shaders.contains_key(&shader.0) {
            state.bound_shaders[stage.index()] = Some(shader.0);
        } else {
            log::warn!("WgpuBackend: binding unknown shader {}", shader.0);
        }
    }

    fn bind_uniform_buffer(&self, stage: ShaderStage, slot: BindingSlot, buffer: BufferHandle) {
        self.state
            .lock()
            .bindings
            .insert((stage, slot), Bound::Buffer(buffer.0));
    }

    fn bind_texture(&self, stage: ShaderStage, slot: BindingSlot, view: TextureViewHandle) {
        self.state
            .lock()
            .bindings
            .insert((stage, slot), Bound::Texture(view.0));
    }

    fn bind_sampler(&self, stage: ShaderStage, slot: BindingSlot, sampler: SamplerHandle) {
        self.state
            .lock()
            .bindings
            .insert((stage, slot), Bound::Sampler(sampler.0));
    }

    fn set_pipeline_state(&self, state: &PipelineState) {
        self.state.lock().pipeline_state = *state;
    }

    fn set_vertex_buffer(&self, slot: u32, buffer: BufferHandle, layout: &VertexBufferLayout) {
        if slot != 0 {
            log::warn!("WgpuBackend: only vertex buffer slot 0 is supported, got {}", slot);
            return;
        }
        self.state.lock().vertex = Some((buffer.0, layout.clone()));
    }

    fn set_index_buffer(&self, buffer: BufferHandle, format: IndexFormat) {
        self.state.lock().index = Some((buffer.0, format));
    }

    fn set_viewport(&self, viewport: Viewport) {
        self.state.lock().viewport = Some(viewport);
    }

    fn draw(&self, vertices: Range<u32>, instances: Range<u32>) -> BackendResult<()> {
        self.record_draw(DrawCall::Direct {
            vertices,
            instances,
        })
    }

    fn draw_indexed(
        &self,
        indices: Range<u32>,
        base_vertex: i32,
        instances: Range<u32>,
    ) -> BackendResult<()> {
        self.record_draw(DrawCall::Indexed {
            indices,
            base_vertex,
            instances,
        })
    }

    fn flush(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.pass.is_some() {
            return Err(BackendError::InvalidCommand(
                "flush while a render pass is open".to_string(),
            ));
        }
        self.submit(&mut state);
        state.vertex = None;
        state.index = None;
        Ok(())
    }

    fn insert_fence(&self) -> BackendResult<Fence> {
        let fence = Fence::new_unsignaled();
        let signal = fence.clone();
        self.queue.on_submitted_work_done(move || signal.signal());
        Ok(fence)
    }

    fn wait_fence(&self, fence: &Fence, timeout: Option<Duration>) -> BackendResult<()> {
        let Some(timeout) = timeout else {
            self.device.poll(wgpu::Maintain::Wait);
            fence.wait();
            return Ok(());
        };
        let deadline = Instant::now() + timeout;
        loop {
            self.device.poll(wgpu::Maintain::Poll);
            if fence.is_signaled() {
                return Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(BackendError::FenceTimeout(timeout));
            }
            fence.wait_timeout((deadline - now).min(Duration::from_millis(1)));
        }
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        self.state.lock().buffers.remove(&buffer.0);
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        self.state.lock().textures.remove(&texture.0);
    }

    fn destroy_texture_view(&self, view: TextureViewHandle) {
        self.state.lock().views.remove(&view.0);
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state.lock().samplers.remove(&sampler.0);
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        let mut state = self.state.lock();
        state.shaders.remove(&shader.0);
        state
            .pipelines
            .retain(|key, _| key.vertex != shader.0 && key.fragment != shader.0);
    }
}

impl std::fmt::Debug for WgpuBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let info = self.adapter.get_info();
        f.debug_struct("WgpuBackend")
            .field("adapter", &info.name)
            .field("backend", &info.backend)
            .finish()
    }
}
