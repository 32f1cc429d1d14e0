//! Lighting pass: one additive full-screen draw per enabled light.

use std::sync::Arc;

use glam::{Mat4, Vec4};

use super::cascades::MAX_CASCADES;
use super::gbuffer::{Defaults, GBuffer};
use super::shaders;
use super::shadow_pass::ShadowPass;
use crate::backend::{BlendState, GraphicsBackend, PipelineState, ShaderStage, Viewport};
use crate::error::RenderResult;
use crate::pipeline::{Pipeline, RenderContext};
use crate::scene::{Camera, Light, LightKind, SceneFrame};
use crate::shader::{CompiledShader, ShaderStageUnit, UniformValue};

fn light_pipeline(
    backend: &Arc<dyn GraphicsBackend>,
    kind: &str,
    body: &str,
) -> RenderResult<Pipeline> {
    let source = shaders::assemble(&[shaders::LIGHTING_COMMON, body]);
    let label = format!("lighting/{}", kind);
    let units = vec![
        ShaderStageUnit::new(
            backend,
            CompiledShader::from_wgsl(label.as_str(), ShaderStage::Vertex, "vs_fullscreen", source.as_str()),
        )?,
        ShaderStageUnit::new(
            backend,
            CompiledShader::from_wgsl(label.as_str(), ShaderStage::Fragment, "fs_main", source),
        )?,
    ];
    Ok(Pipeline::new(label, units)?
        .with_state(PipelineState::fullscreen().with_blend(Some(BlendState::additive()))))
}

pub struct LightingPass {
    point: Pipeline,
    spot: Pipeline,
    directional: Pipeline,
    ambient: Pipeline,
}

impl LightingPass {
    pub fn new(backend: &Arc<dyn GraphicsBackend>) -> RenderResult<Self> {
        Ok(Self {
            point: light_pipeline(backend, "point", shaders::POINT_LIGHT)?,
            spot: light_pipeline(backend, "spot", shaders::SPOT_LIGHT)?,
            directional: light_pipeline(backend, "directional", shaders::DIRECTIONAL_LIGHT)?,
            ambient: light_pipeline(backend, "ambient", shaders::AMBIENT_LIGHT)?,
        })
    }

    fn pipeline_for(&mut self, kind: &LightKind) -> &mut Pipeline {
        match kind {
            LightKind::Point { .. } => &mut self.point,
            LightKind::Spot { .. } => &mut self.spot,
            LightKind::Directional { .. } => &mut self.directional,
            LightKind::Ambient => &mut self.ambient,
        }
    }

    pub fn render(
        &mut self,
        ctx: &mut RenderContext,
        gbuffer: &GBuffer,
        defaults: &Defaults,
        shadows: &ShadowPass,
        scene: &SceneFrame,
        camera: &Camera,
    ) -> RenderResult<()> {
        let desc = gbuffer.lighting_pass_desc()?;
        let inputs = gbuffer.shader_inputs()?;
        let (width, height) = gbuffer.size();

        ctx.with_render_pass(&desc, |ctx| {
            let backend = Arc::clone(ctx.backend());
            backend.set_viewport(Viewport::full(width, height));

            let mut drawn = 0;
            for light in scene.enabled_lights() {
                let pipeline = self.pipeline_for(&light.kind);
                pipeline.activate(ctx);
                for (name, view) in &inputs {
                    ctx.bind_texture(name, view)?;
                }
                pipeline.update_uniform("light_color", light.color)?;
                pipeline.update_uniform("light_intensity", light.intensity)?;

                if !matches!(light.kind, LightKind::Ambient) {
                    let map = shadows.map(light.id);
                    let shadow_view = match map {
                        Some(map) => map.view()?,
                        None => defaults.empty_shadow()?,
                    };
                    ctx.bind_texture("shadow_map", shadow_view)?;
                    ctx.bind_sampler("shadow_sampler", &defaults.shadow_sampler)?;
                    pipeline.update_uniform("shadows_enabled", map.is_some())?;
                    pipeline.update_uniform("camera_position", camera.position)?;
                    write_light_uniforms(pipeline, light, map.map(|m| (m.view_projs(), m.splits())), camera)?;
                }

                pipeline.upload_updated_uniforms()?;
                backend.draw(0..3, 0..1)?;
                drawn += 1;
            }
            log::trace!("Lighting pass: {} lights", drawn);
            Ok(())
        })
    }
}

/// Write the kind-specific uniforms of `light`. `shadow` carries the matrices
/// and cascade splits of its shadow map, if it has one.
fn write_light_uniforms(
    pipeline: &mut Pipeline,
    light: &Light,
    shadow: Option<(&[Mat4], &[f32])>,
    camera: &Camera,
) -> RenderResult<()> {
    match light.kind {
        LightKind::Point { position, radius } => {
            pipeline.update_uniform("light_position", position)?;
            pipeline.update_uniform("light_radius", radius)?;
            if let Some((matrices, _)) = shadow {
                pipeline.update_uniform("face_view_proj", UniformValue::from_slice(matrices))?;
            }
        }
        LightKind::Spot {
            position,
            direction,
            radius,
            inner_angle,
            outer_angle,
        } => {
            pipeline.update_uniform("light_position", position)?;
            pipeline.update_uniform("light_direction", direction)?;
            pipeline.update_uniform("light_radius", radius)?;
            pipeline.update_uniform("cos_inner", inner_angle.cos())?;
            pipeline.update_uniform("cos_outer", outer_angle.cos())?;
            if let Some((matrices, _)) = shadow {
                pipeline.update_uniform("light_view_proj", matrices[0])?;
            }
        }
        LightKind::Directional { direction } => {
            pipeline.update_uniform("light_direction", direction)?;
            pipeline.update_uniform("view", camera.view_matrix())?;
            if let Some((matrices, splits)) = shadow {
                let count = matrices.len().min(MAX_CASCADES);
                let mut padded = [Mat4::IDENTITY; MAX_CASCADES];
                padded[..count].copy_from_slice(&matrices[..count]);
                let mut split_distances = [camera.far(); MAX_CASCADES];
                for (slot, split) in split_distances.iter_mut().zip(splits) {
                    *slot = *split;
                }
                pipeline.update_uniform("cascade_view_proj", UniformValue::from_slice(&padded))?;
                pipeline.update_uniform("cascade_splits", Vec4::from_array(split_distances))?;
                pipeline.update_uniform("cascade_count", count as u32)?;
            }
        }
        LightKind::Ambient => {}
    }
    Ok(())
}

impl std::fmt::Debug for LightingPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LightingPass").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, RecordedCommand};
    use crate::scene::{AmbientLight, DirectionalLight, PointLight, SpotLight};
    use glam::Vec3;

    #[test]
    fn one_draw_per_enabled_light() {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GraphicsBackend> = dummy.clone();
        let mut ctx = RenderContext::new(Arc::clone(&backend));
        let gbuffer = GBuffer::new(&backend, 16, 16).unwrap();
        let defaults = Defaults::new(&backend).unwrap();
        let shadows = ShadowPass::new(&backend).unwrap();
        let mut pass = LightingPass::new(&backend).unwrap();

        let mut scene = SceneFrame::new();
        scene.add_light(Light::point(1, Vec3::Y, &PointLight::default()));
        scene.add_light(Light::spot(2, Vec3::Y, &SpotLight::default()));
        scene.add_light(Light::directional(3, &DirectionalLight::default()));
        scene.add_light(Light::ambient(4, &AmbientLight::default()));
        scene.add_light(Light::point(
            5,
            Vec3::ZERO,
            &PointLight {
                enabled: false,
                ..Default::default()
            },
        ));

        pass.render(&mut ctx, &gbuffer, &defaults, &shadows, &scene, &Camera::default())
            .unwrap();

        let shaders: Vec<_> = dummy
            .commands()
            .into_iter()
            .filter_map(|command| match command {
                RecordedCommand::Draw {
                    fragment_shader, ..
                } => fragment_shader,
                _ => None,
            })
            .collect();
        assert_eq!(
            shaders,
            vec![
                "lighting/point",
                "lighting/spot",
                "lighting/directional",
                "lighting/ambient"
            ]
        );
    }
}
