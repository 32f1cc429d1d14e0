use std::collections::HashMap;
use std::sync::Arc;

use super::reflection::{InputElement, ResourceSlot, ShaderReflection};
use super::uniform::{ConstantBuffer, UniformValue};
use super::CompiledShader;
use crate::backend::{GraphicsBackend, ShaderDescriptor, ShaderHandle, ShaderStage};
use crate::error::{RenderError, RenderResult};

/// One shader stage with its reflected constant buffers and resource slots.
///
/// Created once per loaded shader. Uniform writes are staged on the CPU and
/// reach the GPU only through [`upload_updated_uniforms`].
///
/// [`upload_updated_uniforms`]: ShaderStageUnit::upload_updated_uniforms
pub struct ShaderStageUnit {
    backend: Arc<dyn GraphicsBackend>,
    shader: CompiledShader,
    reflection: ShaderReflection,
    handle: ShaderHandle,
    constant_buffers: Vec<ConstantBuffer>,
    /// Variable name to index of the owning constant buffer.
    variables: HashMap<String, usize>,
    resources: HashMap<String, ResourceSlot>,
}

impl ShaderStageUnit {
    /// Reflect `shader` and create its GPU objects.
    pub fn new(backend: &Arc<dyn GraphicsBackend>, shader: CompiledShader) -> RenderResult<Self> {
        let reflection = ShaderReflection::reflect(&shader)?;
        Self::with_reflection(backend, shader, reflection)
    }

    /// Create a unit from reflection supplied by the caller.
    pub fn with_reflection(
        backend: &Arc<dyn GraphicsBackend>,
        shader: CompiledShader,
        reflection: ShaderReflection,
    ) -> RenderResult<Self> {
        if shader.stage() != ShaderStage::Vertex && !reflection.input_layout.is_empty() {
            return Err(RenderError::InvalidShader(format!(
                "{}: only vertex shaders declare an input layout",
                shader.label()
            )));
        }

        let mut constant_buffers = Vec::with_capacity(reflection.constant_buffers.len());
        let mut variables = HashMap::new();
        for layout in &reflection.constant_buffers {
            let index = constant_buffers.len();
            let buffer = ConstantBuffer::new(backend, layout.clone())?;
            for variable in buffer.variables() {
                if variables.contains_key(&variable.name) {
                    log::warn!(
                        "{}: uniform '{}' declared by more than one buffer, keeping the first",
                        shader.label(),
                        variable.name
                    );
                    continue;
                }
                variables.insert(variable.name.clone(), index);
            }
            constant_buffers.push(buffer);
        }

        let resources = reflection
            .resources
            .iter()
            .map(|r| (r.name.clone(), r.clone()))
            .collect();

        let handle = backend.create_shader(&ShaderDescriptor {
            label: Some(shader.label()),
            stage: shader.stage(),
            entry_point: shader.entry_point(),
            code: shader.code(),
            input_locations: reflection.input_locations(),
            resource_slots: reflection.binding_slots(),
        })?;

        log::debug!(
            "Created {} stage unit '{}' with {} constant buffers",
            shader.stage(),
            shader.label(),
            constant_buffers.len()
        );

        Ok(Self {
            backend: Arc::clone(backend),
            shader,
            reflection,
            handle,
            constant_buffers,
            variables,
            resources,
        })
    }

    pub fn stage(&self) -> ShaderStage {
        self.shader.stage()
    }

    pub fn label(&self) -> &str {
        self.shader.label()
    }

    pub fn shader(&self) -> &CompiledShader {
        &self.shader
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    pub fn handle(&self) -> ShaderHandle {
        self.handle
    }

    pub fn input_layout(&self) -> &[InputElement] {
        &self.reflection.input_layout
    }

    pub fn constant_buffers(&self) -> &[ConstantBuffer] {
        &self.constant_buffers
    }

    pub fn constant_buffer(&self, name: &str) -> Option<&ConstantBuffer> {
        self.constant_buffers.iter().find(|cb| cb.name() == name)
    }

    pub fn resource_slot(&self, name: &str) -> Option<&ResourceSlot> {
        self.resources.get(name)
    }

    pub fn resource_slots(&self) -> impl Iterator<Item = &ResourceSlot> {
        self.resources.values()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    pub fn update_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> RenderResult<()> {
        self.set_uniform(name, value.into())
    }

    /// Like [`update_uniform`](Self::update_uniform) but reports failure as `false`.
    pub fn try_update_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        self.set_uniform(name, value.into()).is_ok()
    }

    pub(crate) fn set_uniform(&mut self, name: &str, value: UniformValue) -> RenderResult<()> {
        let index = self.buffer_index(name)?;
        self.constant_buffers[index].set(name, value)
    }

    /// Validate a write without performing it.
    pub(crate) fn check_uniform(&self, name: &str, value: &UniformValue) -> RenderResult<()> {
        let index = self.buffer_index(name)?;
        self.constant_buffers[index].check(name, value).map(|_| ())
    }

    fn buffer_index(&self, name: &str) -> RenderResult<usize> {
        self.variables
            .get(name)
            .copied()
            .ok_or_else(|| RenderError::UnknownUniform {
                name: name.to_string(),
                owner: format!("{} shader '{}'", self.shader.stage(), self.shader.label()),
            })
    }

    /// Upload every dirty constant buffer.
    pub fn upload_updated_uniforms(&mut self) -> RenderResult<()> {
        for buffer in &mut self.constant_buffers {
            buffer.upload()?;
        }
        Ok(())
    }

    /// Bind the shader and its constant buffers on the backend.
    pub(crate) fn bind(&self) {
        let stage = self.shader.stage();
        self.backend.bind_shader(stage, self.handle);
        for buffer in &self.constant_buffers {
            self.backend
                .bind_uniform_buffer(stage, buffer.slot(), buffer.buffer().handle());
        }
    }
}

impl Drop for ShaderStageUnit {
    fn drop(&mut self) {
        self.backend.destroy_shader(self.handle);
    }
}

impl std::fmt::Debug for ShaderStageUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShaderStageUnit")
            .field("label", &self.shader.label())
            .field("stage", &self.shader.stage())
            .field("constant_buffers", &self.constant_buffers)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BindingSlot, DummyBackend};
    use crate::shader::{BufferLayout, LayoutType, ResourceKind};
    use glam::{Mat4, Vec4};

    fn geometry_unit(backend: &Arc<dyn GraphicsBackend>) -> ShaderStageUnit {
        let shader = CompiledShader::from_wgsl("expand", ShaderStage::Geometry, "main", "");
        let reflection = ShaderReflection::default()
            .with_constant_buffer(
                BufferLayout::new("Frame", BindingSlot::new(0, 0), 80)
                    .with_member("view_proj", 0, LayoutType::leaf(64))
                    .with_member("point_size", 64, LayoutType::leaf(4)),
            )
            .with_resource("sprite", BindingSlot::new(0, 1), ResourceKind::Texture);
        ShaderStageUnit::with_reflection(backend, shader, reflection).unwrap()
    }

    #[test]
    fn manual_reflection_for_stages_without_front_end() {
        let backend: Arc<dyn GraphicsBackend> = Arc::new(DummyBackend::new());
        let mut unit = geometry_unit(&backend);
        assert!(unit.has_variable("point_size"));
        assert!(!unit.has_variable("sprite"));
        assert_eq!(unit.resource_slot("sprite").unwrap().slot, BindingSlot::new(0, 1));

        unit.update_uniform("view_proj", Mat4::IDENTITY).unwrap();
        assert!(unit.constant_buffer("Frame").unwrap().is_dirty());
        unit.upload_updated_uniforms().unwrap();
        assert!(!unit.constant_buffer("Frame").unwrap().is_dirty());
    }

    #[test]
    fn try_update_reports_failures() {
        let backend: Arc<dyn GraphicsBackend> = Arc::new(DummyBackend::new());
        let mut unit = geometry_unit(&backend);
        assert!(unit.try_update_uniform("point_size", 4.0f32));
        assert!(!unit.try_update_uniform("point_size", Vec4::ONE));
        assert!(!unit.try_update_uniform("missing", 1.0f32));
        assert!(matches!(
            unit.update_uniform("missing", 1.0f32),
            Err(RenderError::UnknownUniform { .. })
        ));
    }

    #[test]
    fn input_layout_only_on_vertex_stage() {
        let backend: Arc<dyn GraphicsBackend> = Arc::new(DummyBackend::new());
        let shader = CompiledShader::from_wgsl("frag", ShaderStage::Fragment, "main", "");
        let reflection = ShaderReflection::default().with_input(
            "position",
            0,
            crate::backend::VertexFormat::Float32x3,
        );
        assert!(ShaderStageUnit::with_reflection(&backend, shader, reflection).is_err());
    }

    #[test]
    fn drop_destroys_shader_and_buffers() {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GraphicsBackend> = dummy.clone();
        let unit = geometry_unit(&backend);
        assert_eq!(dummy.live_resource_count(), 2);
        drop(unit);
        assert_eq!(dummy.live_resource_count(), 0);
    }
}
