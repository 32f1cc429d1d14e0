//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't perform actual GPU operations but validates every call
//! the way a real device would, keeps buffer contents in CPU memory so they can
//! be read back, and records the command stream for inspection by tests.

use std::collections::HashMap;
use std::ops::Range;

use parking_lot::Mutex;

use super::sync::Fence;
use super::traits::*;
use super::types::*;

/// A command observed by the dummy backend.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedCommand {
    BeginRenderPass {
        label: Option<String>,
        color_attachments: usize,
        has_depth: bool,
    },
    EndRenderPass,
    Draw {
        pass: Option<String>,
        vertex_shader: Option<String>,
        fragment_shader: Option<String>,
        topology: PrimitiveTopology,
        vertex_count: u32,
        indexed: bool,
    },
    Flush,
}

#[derive(Debug)]
struct DummyBuffer {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

#[derive(Debug)]
struct DummyShader {
    label: Option<String>,
    stage: ShaderStage,
    input_locations: Vec<u32>,
    resource_slots: Vec<BindingSlot>,
}

#[derive(Debug)]
struct DummyView {
    texture: u64,
    desc: TextureViewDescriptor,
}

#[derive(Debug, Clone, Copy)]
enum BoundResource {
    Buffer(u64),
    Texture(u64),
    Sampler(u64),
}

#[derive(Debug, Default)]
struct DummyState {
    next_id: u64,
    buffers: HashMap<u64, DummyBuffer>,
    textures: HashMap<u64, TextureDescriptor>,
    views: HashMap<u64, DummyView>,
    samplers: HashMap<u64, SamplerDescriptor>,
    shaders: HashMap<u64, DummyShader>,

    current_pass: Option<RenderPassDescriptor>,
    bound_shaders: [Option<u64>; 6],
    bindings: HashMap<(ShaderStage, BindingSlot), BoundResource>,
    pipeline_state: PipelineState,
    vertex_layout: Option<VertexBufferLayout>,
    index_bound: bool,

    commands: Vec<RecordedCommand>,
    unsignaled_fences: Vec<Fence>,
    stall_fences: bool,
    texture_limit: Option<usize>,
}

impl DummyState {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn view_texture(&self, view: TextureViewHandle) -> BackendResult<(&DummyView, &TextureDescriptor)> {
        let entry = self.views.get(&view.0).ok_or(BackendError::UnknownHandle {
            kind: "texture view",
            id: view.0,
        })?;
        let texture = self
            .textures
            .get(&entry.texture)
            .ok_or(BackendError::UnknownHandle {
                kind: "texture",
                id: entry.texture,
            })?;
        Ok((entry, texture))
    }

    /// Resources bound earlier may have been destroyed since.
    fn check_alive(&self, bound: BoundResource) -> BackendResult<()> {
        match bound {
            BoundResource::Buffer(id) if !self.buffers.contains_key(&id) => {
                Err(BackendError::UnknownHandle { kind: "buffer", id })
            }
            BoundResource::Texture(id) => self.view_texture(TextureViewHandle(id)).map(|_| ()),
            BoundResource::Sampler(id) if !self.samplers.contains_key(&id) => {
                Err(BackendError::UnknownHandle { kind: "sampler", id })
            }
            _ => Ok(()),
        }
    }

    fn check_attachment(&self, view: TextureViewHandle, depth: bool) -> BackendResult<()> {
        let (entry, texture) = self.view_texture(view)?;
        if !texture.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return Err(BackendError::InvalidCommand(format!(
                "texture {:?} lacks render attachment usage",
                texture.label
            )));
        }
        if texture.format.is_depth() != depth {
            return Err(BackendError::InvalidCommand(format!(
                "texture {:?} format {:?} does not fit a {} attachment",
                texture.label,
                texture.format,
                if depth { "depth" } else { "color" }
            )));
        }
        if entry.desc.mip_level_count != 1 || entry.desc.array_layer_count != 1 {
            return Err(BackendError::InvalidCommand(format!(
                "attachment view {:?} must cover a single mip and layer",
                entry.desc.label
            )));
        }
        Ok(())
    }

    fn validate_draw(&self) -> BackendResult<RecordedCommand> {
        let pass = self.current_pass.as_ref().ok_or_else(|| {
            BackendError::InvalidCommand("draw outside of a render pass".to_string())
        })?;

        let shader_label = |stage: ShaderStage| {
            self.bound_shaders[stage.index()]
                .and_then(|id| self.shaders.get(&id))
                .map(|s| s.label.clone().unwrap_or_default())
        };
        let vertex_shader = shader_label(ShaderStage::Vertex);
        let fragment_shader = shader_label(ShaderStage::Fragment);
        if vertex_shader.is_none() || fragment_shader.is_none() {
            return Err(BackendError::InvalidCommand(
                "draw requires bound vertex and fragment shaders".to_string(),
            ));
        }

        for stage in ShaderStage::ALL {
            let Some(shader) = self.bound_shaders[stage.index()].and_then(|id| self.shaders.get(&id))
            else {
                continue;
            };
            for slot in &shader.resource_slots {
                let bound = self.bindings.get(&(stage, *slot)).ok_or_else(|| {
                    BackendError::InvalidCommand(format!(
                        "{} shader {:?} reads {} which is unbound",
                        stage, shader.label, slot
                    ))
                })?;
                self.check_alive(*bound)?;
            }
            if stage == ShaderStage::Vertex && !shader.input_locations.is_empty() {
                let layout = self.vertex_layout.as_ref().ok_or_else(|| {
                    BackendError::InvalidCommand(format!(
                        "vertex shader {:?} reads inputs but no vertex buffer is bound",
                        shader.label
                    ))
                })?;
                for location in &shader.input_locations {
                    if layout.attribute(*location).is_none() {
                        return Err(BackendError::InvalidCommand(format!(
                            "vertex buffer has no attribute at location {}",
                            location
                        )));
                    }
                }
            }
        }

        Ok(RecordedCommand::Draw {
            pass: pass.label.clone(),
            vertex_shader,
            fragment_shader,
            topology: self.pipeline_state.topology,
            vertex_count: 0,
            indexed: false,
        })
    }
}

/// Dummy GPU backend.
#[derive(Debug, Default)]
pub struct DummyBackend {
    state: Mutex<DummyState>,
}

impl DummyBackend {
    /// Create a new dummy backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fences inserted while stalled are never signaled, simulating a hung GPU.
    pub fn set_fences_stalled(&self, stalled: bool) {
        let mut state = self.state.lock();
        state.stall_fences = stalled;
        if !stalled {
            for fence in state.unsignaled_fences.drain(..) {
                fence.signal();
            }
        }
    }

    /// Fail texture creation once `limit` textures are alive, simulating an
    /// exhausted device. `None` lifts the limit.
    pub fn set_texture_limit(&self, limit: Option<usize>) {
        self.state.lock().texture_limit = limit;
    }

    /// Every command recorded so far.
    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.state.lock().commands.clone()
    }

    /// Labels of the render passes begun so far, in order.
    pub fn pass_labels(&self) -> Vec<String> {
        self.state
            .lock()
            .commands
            .iter()
            .filter_map(|c| match c {
                RecordedCommand::BeginRenderPass { label, .. } => {
                    Some(label.clone().unwrap_or_default())
                }
                _ => None,
            })
            .collect()
    }

    pub fn clear_commands(&self) {
        self.state.lock().commands.clear();
    }

    /// Number of live buffers, textures, views, samplers and shaders.
    pub fn live_resource_count(&self) -> usize {
        let state = self.state.lock();
        state.buffers.len()
            + state.textures.len()
            + state.views.len()
            + state.samplers.len()
            + state.shaders.len()
    }

    pub fn live_texture_count(&self) -> usize {
        self.state.lock().textures.len()
    }

    fn record_draw(&self, count: u32, indexed: bool) -> BackendResult<()> {
        let mut state = self.state.lock();
        let mut command = state.validate_draw()?;
        if let RecordedCommand::Draw {
            vertex_count,
            indexed: is_indexed,
            ..
        } = &mut command
        {
            *vertex_count = count;
            *is_indexed = indexed;
        }
        log::trace!("DummyBackend: {:?}", command);
        state.commands.push(command);
        Ok(())
    }
}

impl GraphicsBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy Backend"
    }

    fn create_buffer(&self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "DummyBackend: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        if desc.size == 0 {
            return Err(BackendError::BufferCreationFailed(format!(
                "buffer {:?} has zero size",
                desc.label
            )));
        }
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.buffers.insert(
            id,
            DummyBuffer {
                desc: desc.clone(),
                data: vec![0; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        let handle = self.create_buffer(desc)?;
        self.write_buffer(handle, 0, data)?;
        Ok(handle)
    }

    fn write_buffer(&self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let mut state = self.state.lock();
        let entry = state
            .buffers
            .get_mut(&buffer.0)
            .ok_or(BackendError::UnknownHandle {
                kind: "buffer",
                id: buffer.0,
            })?;
        let end = offset + data.len() as u64;
        if end > entry.desc.size {
            return Err(BackendError::OutOfRange {
                offset,
                size: data.len() as u64,
                capacity: entry.desc.size,
            });
        }
        entry.data[offset as usize..end as usize].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(&self, buffer: BufferHandle, offset: u64, size: u64) -> BackendResult<Vec<u8>> {
        let state = self.state.lock();
        let entry = state.buffers.get(&buffer.0).ok_or(BackendError::UnknownHandle {
            kind: "buffer",
            id: buffer.0,
        })?;
        let end = offset + size;
        if end > entry.desc.size {
            return Err(BackendError::OutOfRange {
                offset,
                size,
                capacity: entry.desc.size,
            });
        }
        Ok(entry.data[offset as usize..end as usize].to_vec())
    }

    fn create_texture(&self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "DummyBackend: creating texture {:?} ({}x{}x{}, {} mips)",
            desc.label,
            desc.width,
            desc.height,
            desc.array_layers,
            desc.mip_levels
        );
        if desc.width == 0 || desc.height == 0 || desc.array_layers == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "texture {:?} has an empty extent",
                desc.label
            )));
        }
        if desc.mip_levels == 0 || desc.mip_levels > desc.max_mip_levels() {
            return Err(BackendError::TextureCreationFailed(format!(
                "texture {:?} requests {} mips, at most {} allowed",
                desc.label,
                desc.mip_levels,
                desc.max_mip_levels()
            )));
        }
        let mut state = self.state.lock();
        if let Some(limit) = state.texture_limit {
            if state.textures.len() >= limit {
                return Err(BackendError::TextureCreationFailed(format!(
                    "texture {:?} exceeds the limit of {} live textures",
                    desc.label, limit
                )));
            }
        }
        let id = state.allocate_id();
        state.textures.insert(id, desc.clone());
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
        let desc = state
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownHandle {
                kind: "texture",
                id: texture.0,
            })?;
        if mip_level >= desc.mip_levels || array_layer >= desc.array_layers {
            return Err(BackendError::InvalidCommand(format!(
                "texture write to mip {} layer {} is out of range",
                mip_level, array_layer
            )));
        }
        let (width, height) = desc.mip_size(mip_level);
        let expected = (width * height * desc.format.bytes_per_pixel()) as usize;
        if data.len() != expected {
            return Err(BackendError::OutOfRange {
                offset: 0,
                size: data.len() as u64,
                capacity: expected as u64,
            });
        }
        Ok(())
    }

    fn create_texture_view(
        &self,
        texture: TextureHandle,
        desc: &TextureViewDescriptor,
    ) -> BackendResult<TextureViewHandle> {
        let mut state = self.state.lock();
        let texture_desc = state
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownHandle {
                kind: "texture",
                id: texture.0,
            })?;
        let mips_ok = desc.mip_level_count > 0
            && desc.base_mip_level + desc.mip_level_count <= texture_desc.mip_levels;
        let layers_ok = desc.array_layer_count > 0
            && desc.base_array_layer + desc.array_layer_count <= texture_desc.array_layers;
        if !mips_ok || !layers_ok {
            return Err(BackendError::ViewCreationFailed(format!(
                "view {:?} range exceeds texture {:?}",
                desc.label, texture_desc.label
            )));
        }
        if desc.dimension == TextureViewDimension::D2 && desc.array_layer_count != 1 {
            return Err(BackendError::ViewCreationFailed(format!(
                "2D view {:?} must cover exactly one layer",
                desc.label
            )));
        }
        if desc.aspect == TextureAspect::DepthOnly && !texture_desc.format.is_depth() {
            return Err(BackendError::ViewCreationFailed(format!(
                "depth aspect requested on color texture {:?}",
                texture_desc.label
            )));
        }
        let id = state.allocate_id();
        state.views.insert(
            id,
            DummyView {
                texture: texture.0,
                desc: desc.clone(),
            },
        );
        Ok(TextureViewHandle(id))
    }

    fn create_sampler(&self, desc: &SamplerDescriptor) -> BackendResult<SamplerHandle> {
        log::trace!("DummyBackend: creating sampler {:?}", desc.label);
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.samplers.insert(id, desc.clone());
        Ok(SamplerHandle(id))
    }

    fn create_shader(&self, desc: &ShaderDescriptor<'_>) -> BackendResult<ShaderHandle> {
        log::trace!(
            "DummyBackend: creating {} shader {:?} ({})",
            desc.stage,
            desc.label,
            desc.entry_point
        );
        let mut state = self.state.lock();
        let id = state.allocate_id();
        state.shaders.insert(
            id,
            DummyShader {
                label: desc.label.map(str::to_string),
                stage: desc.stage,
                input_locations: desc.input_locations.clone(),
                resource_slots: desc.resource_slots.clone(),
            },
        );
        Ok(ShaderHandle(id))
    }

    fn begin_render_pass(&self, desc: &RenderPassDescriptor) -> BackendResult<()> {
        let mut state = self.state.lock();
        if let Some(open) = &state.current_pass {
            return Err(BackendError::InvalidCommand(format!(
                "render pass {:?} begun while {:?} is still open",
                desc.label, open.label
            )));
        }
        for attachment in &desc.color_attachments {
            state.check_attachment(attachment.view, false)?;
        }
        if let Some(depth) = &desc.depth_stencil_attachment {
            state.check_attachment(depth.view, true)?;
        }
        log::trace!("DummyBackend: begin render pass {:?}", desc.label);
        state.commands.push(RecordedCommand::BeginRenderPass {
            label: desc.label.clone(),
            color_attachments: desc.color_attachments.len(),
            has_depth: desc.depth_stencil_attachment.is_some(),
        });
        state.current_pass = Some(desc.clone());
        Ok(())
    }

    fn end_render_pass(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.current_pass.take().is_none() {
            return Err(BackendError::InvalidCommand(
                "end_render_pass without an open pass".to_string(),
            ));
        }
        state.commands.push(RecordedCommand::EndRenderPass);
        Ok(())
    }

    fn unbind_shaders(&self) {
        let mut state = self.state.lock();
        state.bound_shaders = [None; 6];
        state.bindings.clear();
    }

    fn bind_shader(&self, stage: ShaderStage, shader: ShaderHandle) {
        let mut state = self.state.lock();
        match state.shaders.get(&shader.0) {
            Some(entry) if entry.stage == stage => {
                state.bound_shaders[stage.index()] = Some(shader.0);
            }
            Some(entry) => log::warn!(
                "DummyBackend: {} shader {:?} bound to {} stage, ignored",
                entry.stage,
                entry.label,
                stage
            ),
            None => log::warn!("DummyBackend: binding unknown shader {}", shader.0),
        }
    }

    fn bind_uniform_buffer(&self, stage: ShaderStage, slot: BindingSlot, buffer: BufferHandle) {
        self.state
            .lock()
            .bindings
            .insert((stage, slot), BoundResource::Buffer(buffer.0));
    }

    fn bind_texture(&self, stage: ShaderStage, slot: BindingSlot, view: TextureViewHandle) {
        self.state
            .lock()
            .bindings
            .insert((stage, slot), BoundResource::Texture(view.0));
    }

    fn bind_sampler(&self, stage: ShaderStage, slot: BindingSlot, sampler: SamplerHandle) {
        self.state
            .lock()
            .bindings
            .insert((stage, slot), BoundResource::Sampler(sampler.0));
    }

    fn set_pipeline_state(&self, pipeline_state: &PipelineState) {
        self.state.lock().pipeline_state = *pipeline_state;
    }

    fn set_vertex_buffer(&self, _slot: u32, buffer: BufferHandle, layout: &VertexBufferLayout) {
        let mut state = self.state.lock();
        if !state.buffers.contains_key(&buffer.0) {
            log::warn!("DummyBackend: binding unknown vertex buffer {}", buffer.0);
            return;
        }
        state.vertex_layout = Some(layout.clone());
    }

    fn set_index_buffer(&self, buffer: BufferHandle, _format: IndexFormat) {
        let mut state = self.state.lock();
        state.index_bound = state.buffers.contains_key(&buffer.0);
    }

    fn set_viewport(&self, viewport: Viewport) {
        log::trace!("DummyBackend: viewport {:?}", viewport);
    }

    fn draw(&self, vertices: Range<u32>, instances: Range<u32>) -> BackendResult<()> {
        self.record_draw(vertices.len() as u32 * instances.len() as u32, false)
    }

    fn draw_indexed(
        &self,
        indices: Range<u32>,
        _base_vertex: i32,
        instances: Range<u32>,
    ) -> BackendResult<()> {
        if !self.state.lock().index_bound {
            return Err(BackendError::InvalidCommand(
                "indexed draw without an index buffer".to_string(),
            ));
        }
        self.record_draw(indices.len() as u32 * instances.len() as u32, true)
    }

    fn flush(&self) -> BackendResult<()> {
        let mut state = self.state.lock();
        if state.current_pass.is_some() {
            return Err(BackendError::InvalidCommand(
                "flush while a render pass is open".to_string(),
            ));
        }
        state.commands.push(RecordedCommand::Flush);
        state.vertex_layout = None;
        state.index_bound = false;
        Ok(())
    }

    fn insert_fence(&self) -> BackendResult<Fence> {
        let mut state = self.state.lock();
        let fence = Fence::new_unsignaled();
        if state.stall_fences {
            state.unsignaled_fences.push(fence.clone());
        } else {
            fence.signal();
        }
        Ok(fence)
    }

    fn destroy_buffer(&self, buffer: BufferHandle) {
        log::trace!("DummyBackend: destroying buffer {}", buffer.0);
        self.state.lock().buffers.remove(&buffer.0);
    }

    fn destroy_texture(&self, texture: TextureHandle) {
        log::trace!("DummyBackend: destroying texture {}", texture.0);
        self.state.lock().textures.remove(&texture.0);
    }

    fn destroy_texture_view(&self, view: TextureViewHandle) {
        self.state.lock().views.remove(&view.0);
    }

    fn destroy_sampler(&self, sampler: SamplerHandle) {
        self.state.lock().samplers.remove(&sampler.0);
    }

    fn destroy_shader(&self, shader: ShaderHandle) {
        self.state.lock().shaders.remove(&shader.0);
    }
}
