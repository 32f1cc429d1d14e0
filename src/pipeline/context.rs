use std::sync::Arc;

use super::{Pipeline, ResourceBindings};
use crate::backend::{GraphicsBackend, RenderPassDescriptor};
use crate::error::{RenderError, RenderResult};
use crate::resources::{Sampler, TextureView};

/// Per-thread rendering state: the backend plus whichever pipeline was
/// activated last.
///
/// Texture and sampler binds are resolved by name against the active
/// pipeline, so a pipeline must be activated first.
pub struct RenderContext {
    backend: Arc<dyn GraphicsBackend>,
    active: Option<Arc<ResourceBindings>>,
}

impl RenderContext {
    pub fn new(backend: Arc<dyn GraphicsBackend>) -> Self {
        Self {
            backend,
            active: None,
        }
    }

    pub fn backend(&self) -> &Arc<dyn GraphicsBackend> {
        &self.backend
    }

    /// Label of the active pipeline.
    pub fn active_pipeline(&self) -> Option<&str> {
        self.active.as_deref().map(ResourceBindings::pipeline)
    }

    pub fn is_active(&self, pipeline: &Pipeline) -> bool {
        self.active
            .as_deref()
            .is_some_and(|bindings| bindings.pipeline_id == pipeline.id())
    }

    pub(super) fn set_active(&mut self, bindings: Arc<ResourceBindings>) {
        self.active = Some(bindings);
    }

    /// Forget the active pipeline and unbind its shaders.
    pub fn deactivate(&mut self) {
        if self.active.take().is_some() {
            self.backend.unbind_shaders();
        }
    }

    /// Bind `view` to every stage of the active pipeline that declares `name`.
    pub fn bind_texture(&self, name: &str, view: &TextureView) -> RenderResult<()> {
        let bindings = self.active_bindings()?;
        let targets = lookup(bindings, name)?;
        if let Some(binding) = targets.iter().find(|b| b.kind.is_sampler()) {
            return Err(RenderError::InvalidParameter(format!(
                "'{}' in pipeline '{}' is a sampler slot ({})",
                name,
                bindings.pipeline(),
                binding.slot
            )));
        }
        for binding in targets {
            self.backend
                .bind_texture(binding.stage, binding.slot, view.handle());
        }
        Ok(())
    }

    /// Like [`bind_texture`](Self::bind_texture) but reports failure as `false`.
    pub fn try_bind_texture(&self, name: &str, view: &TextureView) -> bool {
        self.bind_texture(name, view).is_ok()
    }

    /// Bind `sampler` to every stage of the active pipeline that declares `name`.
    pub fn bind_sampler(&self, name: &str, sampler: &Sampler) -> RenderResult<()> {
        let bindings = self.active_bindings()?;
        let targets = lookup(bindings, name)?;
        if let Some(binding) = targets.iter().find(|b| !b.kind.is_sampler()) {
            return Err(RenderError::InvalidParameter(format!(
                "'{}' in pipeline '{}' is a texture slot ({})",
                name,
                bindings.pipeline(),
                binding.slot
            )));
        }
        for binding in targets {
            self.backend
                .bind_sampler(binding.stage, binding.slot, sampler.handle());
        }
        Ok(())
    }

    pub fn try_bind_sampler(&self, name: &str, sampler: &Sampler) -> bool {
        self.bind_sampler(name, sampler).is_ok()
    }

    /// Run `record` inside a render pass. The pass is ended even when
    /// `record` fails.
    pub fn with_render_pass<R>(
        &mut self,
        desc: &RenderPassDescriptor,
        record: impl FnOnce(&mut Self) -> RenderResult<R>,
    ) -> RenderResult<R> {
        self.backend.begin_render_pass(desc)?;
        let result = record(self);
        let ended = self.backend.end_render_pass();
        let value = result?;
        ended?;
        Ok(value)
    }

    fn active_bindings(&self) -> RenderResult<&ResourceBindings> {
        self.active.as_deref().ok_or(RenderError::NoActivePipeline)
    }
}

fn lookup<'a>(
    bindings: &'a ResourceBindings,
    name: &str,
) -> RenderResult<&'a [super::StageBinding]> {
    bindings
        .get(name)
        .ok_or_else(|| RenderError::UnknownResource {
            name: name.to_string(),
            pipeline: bindings.pipeline().to_string(),
        })
}

impl std::fmt::Debug for RenderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderContext")
            .field("backend", &self.backend.name())
            .field("active", &self.active_pipeline())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{
        BindingSlot, DummyBackend, SamplerDescriptor, ShaderStage, TextureDescriptor,
        TextureFormat, TextureUsage,
    };
    use crate::resources::{ShaderResource, Texture};
    use crate::shader::{CompiledShader, ResourceKind, ShaderReflection, ShaderStageUnit};

    fn pipeline(backend: &Arc<dyn GraphicsBackend>) -> Pipeline {
        let vs = ShaderStageUnit::with_reflection(
            backend,
            CompiledShader::from_wgsl("vs", ShaderStage::Vertex, "main", ""),
            ShaderReflection::default(),
        )
        .unwrap();
        let fs = ShaderStageUnit::with_reflection(
            backend,
            CompiledShader::from_wgsl("fs", ShaderStage::Fragment, "main", ""),
            ShaderReflection::default()
                .with_resource("albedo_map", BindingSlot::new(1, 0), ResourceKind::Texture)
                .with_resource("albedo_sampler", BindingSlot::new(1, 1), ResourceKind::Sampler),
        )
        .unwrap();
        Pipeline::new("textured", vec![vs, fs]).unwrap()
    }

    #[test]
    fn binds_require_active_pipeline() {
        let backend: Arc<dyn GraphicsBackend> = Arc::new(DummyBackend::new());
        let pipeline = pipeline(&backend);
        let texture = Texture::new(
            &backend,
            TextureDescriptor::new_2d(2, 2, TextureFormat::Rgba8Unorm, TextureUsage::TEXTURE_BINDING),
        )
        .unwrap();
        let view = texture.view::<ShaderResource>().unwrap();
        let sampler = Sampler::new(&backend, &SamplerDescriptor::default()).unwrap();

        let mut ctx = RenderContext::new(Arc::clone(&backend));
        assert!(matches!(
            ctx.bind_texture("albedo_map", view),
            Err(RenderError::NoActivePipeline)
        ));

        pipeline.activate(&mut ctx);
        assert!(ctx.is_active(&pipeline));
        assert_eq!(ctx.active_pipeline(), Some("textured"));
        ctx.bind_texture("albedo_map", view).unwrap();
        ctx.bind_sampler("albedo_sampler", &sampler).unwrap();
        assert!(matches!(
            ctx.bind_texture("normal_map", view),
            Err(RenderError::UnknownResource { .. })
        ));
        assert!(!ctx.try_bind_sampler("albedo_map", &sampler));

        ctx.deactivate();
        assert!(!ctx.try_bind_texture("albedo_map", view));
    }
}
