//! Geometry pass: meshes and particles into the G-buffer.

use std::sync::Arc;

use super::gbuffer::{Defaults, GBuffer};
use super::shaders;
use crate::backend::{
    CullMode, DepthState, GraphicsBackend, PipelineState, PrimitiveTopology, ShaderStage, Viewport,
};
use crate::error::RenderResult;
use crate::pipeline::{Pipeline, RenderContext};
use crate::resources::{MaterialSlot, ShaderResource};
use crate::scene::{Camera, Particle, SceneFrame};
use crate::shader::{CompiledShader, ShaderStageUnit};

pub struct GeometryPass {
    meshes: Pipeline,
    particles: Pipeline,
    mesh_locations: Vec<u32>,
}

fn program(
    backend: &Arc<dyn GraphicsBackend>,
    label: &str,
    source: &str,
) -> RenderResult<Vec<ShaderStageUnit>> {
    Ok(vec![
        ShaderStageUnit::new(
            backend,
            CompiledShader::from_wgsl(label, ShaderStage::Vertex, "vs_main", source),
        )?,
        ShaderStageUnit::new(
            backend,
            CompiledShader::from_wgsl(label, ShaderStage::Fragment, "fs_main", source),
        )?,
    ])
}

impl GeometryPass {
    pub fn new(backend: &Arc<dyn GraphicsBackend>) -> RenderResult<Self> {
        let meshes = Pipeline::new(
            "geometry",
            program(
                backend,
                "geometry",
                &shaders::assemble(&[shaders::GBUFFER_OUTPUT, shaders::GEOMETRY]),
            )?,
        )?;
        let particles = Pipeline::new(
            "particles",
            program(
                backend,
                "particles",
                &shaders::assemble(&[shaders::GBUFFER_OUTPUT, shaders::PARTICLES]),
            )?,
        )?
        .with_state(
            PipelineState::default()
                .with_topology(PrimitiveTopology::PointList)
                .with_cull_mode(CullMode::None)
                .with_depth(Some(DepthState::default())),
        );
        let mesh_locations = meshes.input_layout().iter().map(|i| i.location).collect();
        Ok(Self {
            meshes,
            particles,
            mesh_locations,
        })
    }

    pub fn render(
        &mut self,
        ctx: &mut RenderContext,
        gbuffer: &GBuffer,
        defaults: &Defaults,
        scene: &SceneFrame,
        camera: &Camera,
    ) -> RenderResult<()> {
        let desc = gbuffer.geometry_pass_desc()?;
        let (width, height) = gbuffer.size();
        let view_proj = camera.view_projection_matrix();

        ctx.with_render_pass(&desc, |ctx| {
            let backend = Arc::clone(ctx.backend());
            backend.set_viewport(Viewport::full(width, height));

            if !scene.drawables.is_empty() {
                let pipeline = &mut self.meshes;
                pipeline.activate(ctx);
                ctx.bind_sampler("material_sampler", &defaults.material_sampler)?;
                pipeline.update_uniform("view_proj", view_proj)?;
                pipeline.update_uniform("camera_position", camera.position)?;

                for drawable in &scene.drawables {
                    pipeline.check_vertex_layout(drawable.mesh.layout())?;
                    pipeline.update_uniform("model", drawable.world)?;
                    pipeline.update_uniform("normal_matrix", drawable.world.inverse().transpose())?;
                    for (name, value) in drawable.material.uniforms() {
                        pipeline.update_uniform(name, value)?;
                    }
                    for slot in MaterialSlot::ALL {
                        let view = match drawable.material.texture(slot) {
                            Some(texture) => texture.view::<ShaderResource>()?,
                            None => defaults.material_texture(slot)?,
                        };
                        ctx.bind_texture(slot.texture_name(), view)?;
                    }
                    pipeline.upload_updated_uniforms()?;
                    drawable.mesh.bind(backend.as_ref(), &self.mesh_locations);
                    drawable.mesh.draw(backend.as_ref())?;
                }
            }

            let systems: Vec<_> = scene.particles.iter().filter(|s| s.count() > 0).collect();
            if !systems.is_empty() {
                let pipeline = &mut self.particles;
                pipeline.activate(ctx);
                pipeline.update_uniform("view_proj", view_proj)?;
                pipeline.update_uniform("camera_position", camera.position)?;
                pipeline.upload_updated_uniforms()?;
                let layout = Particle::layout();
                for system in systems {
                    backend.set_vertex_buffer(0, system.buffer().handle(), &layout);
                    backend.draw(0..system.count(), 0..1)?;
                }
            }

            log::trace!(
                "Geometry pass: {} drawables, {} particle systems",
                scene.drawables.len(),
                scene.particles.len()
            );
            Ok(())
        })
    }
}

impl std::fmt::Debug for GeometryPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeometryPass")
            .field("meshes", &self.meshes.label())
            .field("particles", &self.particles.label())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, RecordedCommand};
    use crate::resources::{GpuMesh, Material, Mesh};
    use crate::scene::ParticleSystem;
    use glam::{Mat4, Vec3, Vec4};

    #[test]
    fn draws_meshes_then_particles() {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GraphicsBackend> = dummy.clone();
        let mut ctx = RenderContext::new(Arc::clone(&backend));
        let gbuffer = GBuffer::new(&backend, 32, 32).unwrap();
        let defaults = Defaults::new(&backend).unwrap();
        let mut pass = GeometryPass::new(&backend).unwrap();

        let mut scene = SceneFrame::new();
        let cube = Arc::new(GpuMesh::upload(&backend, &Mesh::cube()).unwrap());
        scene.add_drawable(Mat4::IDENTITY, cube.clone(), Arc::new(Material::gold()));
        scene.add_drawable(
            Mat4::from_translation(Vec3::X),
            cube,
            Arc::new(Material::plastic(Vec3::ONE)),
        );
        let particle = Particle {
            position: Vec3::ZERO,
            size: 1.0,
            color: Vec4::ONE,
        };
        scene.add_particles(Arc::new(
            ParticleSystem::new(&backend, "sparks", &[particle; 4]).unwrap(),
        ));

        pass.render(&mut ctx, &gbuffer, &defaults, &scene, &Camera::default())
            .unwrap();

        let topologies: Vec<_> = dummy
            .commands()
            .into_iter()
            .filter_map(|command| match command {
                RecordedCommand::Draw { topology, .. } => Some(topology),
                _ => None,
            })
            .collect();
        assert_eq!(
            topologies,
            vec![
                PrimitiveTopology::TriangleList,
                PrimitiveTopology::TriangleList,
                PrimitiveTopology::PointList
            ]
        );
        assert_eq!(dummy.pass_labels(), vec!["geometry".to_string()]);
    }
}
