//! Post-processing: exposure, tone mapping, an ambient floor and gamma, from
//! the radiance target into the back buffer.

use std::sync::Arc;

use super::gbuffer::{Defaults, GBuffer};
use super::shaders;
use crate::backend::{
    ColorAttachment, GraphicsBackend, LoadOp, PipelineState, RenderPassDescriptor, ShaderStage,
    StoreOp, Viewport,
};
use crate::error::RenderResult;
use crate::frame::FrameBuffer;
use crate::pipeline::{Pipeline, RenderContext};
use crate::resources::ShaderResource;
use crate::shader::{CompiledShader, ShaderStageUnit};

/// Tone mapping curve applied before gamma correction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TonemapOperator {
    Reinhard,
    #[default]
    Aces,
    Uncharted2,
    /// Clamp only.
    None,
}

impl TonemapOperator {
    fn code(self) -> u32 {
        match self {
            TonemapOperator::Reinhard => 0,
            TonemapOperator::Aces => 1,
            TonemapOperator::Uncharted2 => 2,
            TonemapOperator::None => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PostSettings {
    pub tonemap: TonemapOperator,
    pub exposure: f32,
    pub gamma: f32,
    /// Fraction of unlit albedo kept visible where lighting is darker.
    pub ambient_floor: f32,
    pub clear_color: [f32; 4],
}

pub struct PostPass {
    pipeline: Pipeline,
}

impl PostPass {
    pub fn new(backend: &Arc<dyn GraphicsBackend>) -> RenderResult<Self> {
        let units = vec![
            ShaderStageUnit::new(
                backend,
                CompiledShader::from_wgsl("post", ShaderStage::Vertex, "vs_fullscreen", shaders::POST),
            )?,
            ShaderStageUnit::new(
                backend,
                CompiledShader::from_wgsl("post", ShaderStage::Fragment, "fs_main", shaders::POST),
            )?,
        ];
        Ok(Self {
            pipeline: Pipeline::new("post", units)?.with_state(PipelineState::fullscreen()),
        })
    }

    pub fn render(
        &mut self,
        ctx: &mut RenderContext,
        gbuffer: &GBuffer,
        defaults: &Defaults,
        target: &FrameBuffer,
        settings: &PostSettings,
    ) -> RenderResult<()> {
        let desc = RenderPassDescriptor {
            label: Some("post".to_string()),
            color_attachments: vec![ColorAttachment {
                view: target.color_target()?.handle(),
                load_op: LoadOp::Clear(settings.clear_color),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        };
        let radiance = gbuffer.radiance().view::<ShaderResource>()?;
        let albedo = gbuffer.albedo().view::<ShaderResource>()?;
        let ao = gbuffer.ao().view::<ShaderResource>()?;

        let pipeline = &mut self.pipeline;
        ctx.with_render_pass(&desc, |ctx| {
            ctx.backend()
                .set_viewport(Viewport::full(target.width(), target.height()));
            pipeline.activate(ctx);
            ctx.bind_texture("radiance_map", radiance)?;
            ctx.bind_texture("gbuffer_albedo", albedo)?;
            ctx.bind_texture("gbuffer_ao", ao)?;
            ctx.bind_sampler("post_sampler", &defaults.post_sampler)?;
            pipeline.update_uniform("exposure", settings.exposure)?;
            pipeline.update_uniform("gamma", settings.gamma.max(0.01))?;
            pipeline.update_uniform("tonemap_operator", settings.tonemap.code())?;
            pipeline.update_uniform("ambient_floor", settings.ambient_floor)?;
            pipeline.upload_updated_uniforms()?;
            ctx.backend().draw(0..3, 0..1)?;
            Ok(())
        })
    }
}

impl std::fmt::Debug for PostPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostPass").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_codes_are_distinct() {
        let codes: Vec<u32> = [
            TonemapOperator::Reinhard,
            TonemapOperator::Aces,
            TonemapOperator::Uncharted2,
            TonemapOperator::None,
        ]
        .iter()
        .map(|op| op.code())
        .collect();
        assert_eq!(codes, vec![0, 1, 2, 3]);
    }
}
