//! Pipeline composition
//!
//! A [`Pipeline`] groups at most one [`ShaderStageUnit`] per stage together
//! with the fixed-function state its draws use. Activating it on a
//! [`RenderContext`] binds every unit and makes its texture and sampler names
//! resolvable through the context.

mod context;

pub use context::RenderContext;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::backend::{BindingSlot, PipelineState, ShaderStage, VertexBufferLayout};
use crate::error::{RenderError, RenderResult};
use crate::shader::{InputElement, ResourceKind, ShaderStageUnit, UniformValue};

static NEXT_PIPELINE_ID: AtomicU64 = AtomicU64::new(1);

/// Where one stage reads a named texture or sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageBinding {
    pub stage: ShaderStage,
    pub slot: BindingSlot,
    pub kind: ResourceKind,
}

/// Texture and sampler names declared by a pipeline's units.
#[derive(Debug, Default)]
pub struct ResourceBindings {
    pipeline_id: u64,
    pipeline: String,
    entries: HashMap<String, Vec<StageBinding>>,
}

impl ResourceBindings {
    pub fn pipeline(&self) -> &str {
        &self.pipeline
    }

    pub fn get(&self, name: &str) -> Option<&[StageBinding]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// A validated set of shader stage units.
pub struct Pipeline {
    id: u64,
    label: String,
    units: Vec<ShaderStageUnit>,
    state: PipelineState,
    bindings: Arc<ResourceBindings>,
}

impl Pipeline {
    /// Compose a pipeline. Fails if two units share a stage or if the vertex
    /// or fragment stage is missing.
    pub fn new(label: impl Into<String>, mut units: Vec<ShaderStageUnit>) -> RenderResult<Self> {
        let label = label.into();
        units.sort_by_key(|unit| unit.stage());
        if let Some(pair) = units.windows(2).find(|w| w[0].stage() == w[1].stage()) {
            return Err(RenderError::DuplicateStage {
                pipeline: label,
                stage: pair[0].stage(),
            });
        }
        for required in [ShaderStage::Vertex, ShaderStage::Fragment] {
            if !units.iter().any(|unit| unit.stage() == required) {
                return Err(RenderError::MissingStage {
                    pipeline: label,
                    stage: required,
                });
            }
        }

        let id = NEXT_PIPELINE_ID.fetch_add(1, Ordering::Relaxed);
        let mut entries: HashMap<String, Vec<StageBinding>> = HashMap::new();
        for unit in &units {
            for resource in unit.resource_slots() {
                entries
                    .entry(resource.name.clone())
                    .or_default()
                    .push(StageBinding {
                        stage: unit.stage(),
                        slot: resource.slot,
                        kind: resource.kind,
                    });
            }
        }

        log::debug!(
            "Created pipeline '{}' with stages {:?}",
            label,
            units.iter().map(|u| u.stage()).collect::<Vec<_>>()
        );

        Ok(Self {
            id,
            bindings: Arc::new(ResourceBindings {
                pipeline_id: id,
                pipeline: label.clone(),
                entries,
            }),
            label,
            units,
            state: PipelineState::default(),
        })
    }

    pub fn with_state(mut self, state: PipelineState) -> Self {
        self.state = state;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn bindings(&self) -> &ResourceBindings {
        &self.bindings
    }

    pub fn units(&self) -> &[ShaderStageUnit] {
        &self.units
    }

    pub fn unit(&self, stage: ShaderStage) -> Option<&ShaderStageUnit> {
        self.units.iter().find(|unit| unit.stage() == stage)
    }

    pub fn unit_mut(&mut self, stage: ShaderStage) -> Option<&mut ShaderStageUnit> {
        self.units.iter_mut().find(|unit| unit.stage() == stage)
    }

    /// Inputs read by the vertex stage.
    pub fn input_layout(&self) -> &[InputElement] {
        self.unit(ShaderStage::Vertex)
            .map(|unit| unit.input_layout())
            .unwrap_or(&[])
    }

    /// Check that a vertex buffer provides every input the vertex stage reads.
    pub fn check_vertex_layout(&self, layout: &VertexBufferLayout) -> RenderResult<()> {
        for input in self.input_layout() {
            match layout.attribute(input.location) {
                Some(attribute) if attribute.format == input.format => {}
                Some(attribute) => {
                    return Err(RenderError::InvalidParameter(format!(
                        "pipeline '{}' reads '{}' as {:?} but the vertex buffer provides {:?}",
                        self.label, input.name, input.format, attribute.format
                    )))
                }
                None => {
                    return Err(RenderError::InvalidParameter(format!(
                        "pipeline '{}' reads '{}' at location {} which the vertex buffer lacks",
                        self.label, input.name, input.location
                    )))
                }
            }
        }
        Ok(())
    }

    /// Unbind the previous shaders, bind every unit and make this the
    /// context's active pipeline.
    pub fn activate(&self, ctx: &mut RenderContext) {
        let backend = ctx.backend();
        backend.unbind_shaders();
        for unit in &self.units {
            unit.bind();
        }
        backend.set_pipeline_state(&self.state);
        ctx.set_active(Arc::clone(&self.bindings));
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.units.iter().any(|unit| unit.has_variable(name))
    }

    /// Write a uniform to every stage that declares it.
    ///
    /// Fails without writing anything if no stage declares the name or the
    /// value does not fit one of the declaring stages.
    pub fn update_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> RenderResult<()> {
        let value = value.into();
        let mut declared = false;
        for unit in self.units.iter().filter(|unit| unit.has_variable(name)) {
            declared = true;
            unit.check_uniform(name, &value)?;
        }
        if !declared {
            return Err(RenderError::UnknownUniform {
                name: name.to_string(),
                owner: format!("pipeline '{}'", self.label),
            });
        }
        for unit in self.units.iter_mut().filter(|unit| unit.has_variable(name)) {
            unit.set_uniform(name, value.clone())?;
        }
        Ok(())
    }

    /// Write a uniform to every stage that accepts it; returns whether at
    /// least one did.
    pub fn try_update_uniform(&mut self, name: &str, value: impl Into<UniformValue>) -> bool {
        let value = value.into();
        let mut accepted = false;
        for unit in &mut self.units {
            accepted |= unit.set_uniform(name, value.clone()).is_ok();
        }
        accepted
    }

    /// Upload dirty constant buffers of every stage.
    pub fn upload_updated_uniforms(&mut self) -> RenderResult<()> {
        for unit in &mut self.units {
            unit.upload_updated_uniforms()?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("units", &self.units)
            .field("state", &self.state)
            .finish()
    }
}

static_assertions::assert_impl_all!(Pipeline: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, GraphicsBackend};
    use crate::shader::{BufferLayout, CompiledShader, LayoutType, ShaderReflection};
    use glam::{Mat4, Vec4};

    fn unit(
        backend: &Arc<dyn GraphicsBackend>,
        stage: ShaderStage,
        reflection: ShaderReflection,
    ) -> ShaderStageUnit {
        let shader = CompiledShader::from_wgsl(format!("{}", stage), stage, "main", "");
        ShaderStageUnit::with_reflection(backend, shader, reflection).unwrap()
    }

    fn camera_buffer(group: u32) -> BufferLayout {
        BufferLayout::new("Camera", BindingSlot::new(group, 0), 80)
            .with_member("view", 0, LayoutType::leaf(64))
            .with_member("exposure", 64, LayoutType::leaf(4))
    }

    fn backend() -> Arc<dyn GraphicsBackend> {
        Arc::new(DummyBackend::new())
    }

    #[test]
    fn duplicate_stage_rejected() {
        let backend = backend();
        let units = vec![
            unit(&backend, ShaderStage::Vertex, ShaderReflection::default()),
            unit(&backend, ShaderStage::Vertex, ShaderReflection::default()),
            unit(&backend, ShaderStage::Fragment, ShaderReflection::default()),
        ];
        assert!(matches!(
            Pipeline::new("dup", units),
            Err(RenderError::DuplicateStage {
                stage: ShaderStage::Vertex,
                ..
            })
        ));
    }

    #[test]
    fn missing_fragment_rejected() {
        let backend = backend();
        let units = vec![unit(&backend, ShaderStage::Vertex, ShaderReflection::default())];
        assert!(matches!(
            Pipeline::new("vs-only", units),
            Err(RenderError::MissingStage {
                stage: ShaderStage::Fragment,
                ..
            })
        ));
    }

    #[test]
    fn units_sorted_by_stage() {
        let backend = backend();
        let units = vec![
            unit(&backend, ShaderStage::Fragment, ShaderReflection::default()),
            unit(&backend, ShaderStage::Geometry, ShaderReflection::default()),
            unit(&backend, ShaderStage::Vertex, ShaderReflection::default()),
        ];
        let pipeline = Pipeline::new("sorted", units).unwrap();
        let stages: Vec<ShaderStage> = pipeline.units().iter().map(|u| u.stage()).collect();
        assert_eq!(
            stages,
            vec![ShaderStage::Vertex, ShaderStage::Geometry, ShaderStage::Fragment]
        );
    }

    #[test]
    fn uniform_broadcast_reaches_every_declaring_stage() {
        let backend = backend();
        let units = vec![
            unit(
                &backend,
                ShaderStage::Vertex,
                ShaderReflection::default().with_constant_buffer(camera_buffer(0)),
            ),
            unit(
                &backend,
                ShaderStage::Fragment,
                ShaderReflection::default().with_constant_buffer(camera_buffer(1)),
            ),
        ];
        let mut pipeline = Pipeline::new("broadcast", units).unwrap();
        pipeline.update_uniform("view", Mat4::IDENTITY).unwrap();
        for unit in pipeline.units() {
            assert!(unit.constant_buffer("Camera").unwrap().is_dirty());
        }
        pipeline.upload_updated_uniforms().unwrap();
        for unit in pipeline.units() {
            assert!(!unit.constant_buffer("Camera").unwrap().is_dirty());
        }
    }

    #[test]
    fn oversize_broadcast_writes_nothing() {
        let backend = backend();
        let units = vec![
            unit(
                &backend,
                ShaderStage::Vertex,
                ShaderReflection::default().with_constant_buffer(camera_buffer(0)),
            ),
            unit(&backend, ShaderStage::Fragment, ShaderReflection::default()),
        ];
        let mut pipeline = Pipeline::new("oversize", units).unwrap();
        assert!(matches!(
            pipeline.update_uniform("exposure", Vec4::ONE),
            Err(RenderError::UniformTooLarge { .. })
        ));
        assert!(!pipeline.try_update_uniform("exposure", Vec4::ONE));
        assert!(!pipeline
            .unit(ShaderStage::Vertex)
            .unwrap()
            .constant_buffer("Camera")
            .unwrap()
            .is_dirty());
        assert!(pipeline.try_update_uniform("exposure", 1.5f32));
        assert!(matches!(
            pipeline.update_uniform("gamma", 2.2f32),
            Err(RenderError::UnknownUniform { .. })
        ));
    }
}
