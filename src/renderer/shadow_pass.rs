//! Shadow map rendering.
//!
//! Every enabled light with a shadow resolution owns a depth array cached by
//! light id: one layer per cascade (directional), one (spot) or six cube
//! faces (point). Maps of lights that disappear from the scene are dropped.

use std::collections::HashMap;
use std::sync::Arc;

use glam::Mat4;

use super::cascades;
use super::shaders;
use crate::backend::{
    CullMode, DepthStencilAttachment, GraphicsBackend, PipelineState, RenderPassDescriptor,
    ShaderStage, StoreOp, TextureDescriptor, TextureFormat, TextureUsage, Viewport,
};
use crate::error::RenderResult;
use crate::pipeline::{Pipeline, RenderContext};
use crate::resources::{DepthStencil, ShaderResource, Texture, TextureView};
use crate::scene::{Camera, Light, LightKind, SceneFrame};
use crate::shader::{CompiledShader, ShaderStageUnit};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapShape {
    Cascaded(u32),
    Single,
    Cube,
}

impl MapShape {
    fn layers(self) -> u32 {
        match self {
            MapShape::Cascaded(count) => count,
            MapShape::Single => 1,
            MapShape::Cube => 6,
        }
    }
}

/// Depth layers of one light plus the matrices they were rendered with.
pub struct ShadowMap {
    texture: Texture,
    shape: MapShape,
    resolution: u32,
    view_projs: Vec<Mat4>,
    splits: Vec<f32>,
}

impl ShadowMap {
    pub fn view(&self) -> RenderResult<&Arc<TextureView>> {
        self.texture.view::<ShaderResource>()
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn layers(&self) -> u32 {
        self.shape.layers()
    }

    pub fn view_projs(&self) -> &[Mat4] {
        &self.view_projs
    }

    /// Far view distance of each cascade; empty for spot and point maps.
    pub fn splits(&self) -> &[f32] {
        &self.splits
    }
}

/// Cascade settings handed down from the renderer configuration.
#[derive(Debug, Clone, Copy)]
pub struct CascadeSettings {
    pub count: usize,
    pub lambda: f32,
}

pub struct ShadowPass {
    backend: Arc<dyn GraphicsBackend>,
    pipeline: Pipeline,
    maps: HashMap<u64, ShadowMap>,
}

impl ShadowPass {
    pub fn new(backend: &Arc<dyn GraphicsBackend>) -> RenderResult<Self> {
        let units = vec![
            ShaderStageUnit::new(
                backend,
                CompiledShader::from_wgsl("shadow", ShaderStage::Vertex, "vs_main", shaders::SHADOW),
            )?,
            ShaderStageUnit::new(
                backend,
                CompiledShader::from_wgsl("shadow", ShaderStage::Fragment, "fs_main", shaders::SHADOW),
            )?,
        ];
        let pipeline = Pipeline::new("shadow", units)?
            .with_state(PipelineState::default().with_cull_mode(CullMode::None));
        Ok(Self {
            backend: Arc::clone(backend),
            pipeline,
            maps: HashMap::new(),
        })
    }

    pub fn map(&self, light_id: u64) -> Option<&ShadowMap> {
        self.maps.get(&light_id)
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    /// Render a depth map for every shadow-casting light in `scene`.
    pub fn render(
        &mut self,
        ctx: &mut RenderContext,
        scene: &SceneFrame,
        camera: &Camera,
        cascades: CascadeSettings,
    ) -> RenderResult<()> {
        let casters: Vec<&Light> = scene.shadow_casters().collect();
        let before = self.maps.len();
        self.maps
            .retain(|id, _| casters.iter().any(|light| light.id == *id));
        if self.maps.len() != before {
            log::debug!("Evicted {} shadow maps", before - self.maps.len());
        }

        for light in casters {
            let Some(resolution) = light.shadow_resolution.filter(|r| *r > 0) else {
                continue;
            };
            let (shape, view_projs, splits) = match light.kind {
                LightKind::Directional { direction } => {
                    let splits = cascades::cascade_splits(
                        camera.near(),
                        camera.far(),
                        cascades.count,
                        cascades.lambda,
                    );
                    let matrices = cascades::cascade_matrices(camera, direction, &splits);
                    (MapShape::Cascaded(splits.len() as u32), matrices, splits)
                }
                LightKind::Spot {
                    position,
                    direction,
                    radius,
                    outer_angle,
                    ..
                } => (
                    MapShape::Single,
                    vec![cascades::spot_matrix(position, direction, outer_angle, radius)],
                    Vec::new(),
                ),
                LightKind::Point { position, radius } => (
                    MapShape::Cube,
                    cascades::point_matrices(position, radius).to_vec(),
                    Vec::new(),
                ),
                LightKind::Ambient => continue,
            };

            let stale = self
                .maps
                .get(&light.id)
                .map_or(true, |map| map.shape != shape || map.resolution != resolution);
            if stale {
                let texture = Texture::new(
                    &self.backend,
                    TextureDescriptor::new_2d(
                        resolution,
                        resolution,
                        TextureFormat::Depth32Float,
                        TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
                    )
                    .with_label(format!("shadow/{}", light.id))
                    .with_array_layers(shape.layers())
                    .as_array(),
                )?;
                log::debug!(
                    "Allocated {}x{} shadow map with {} layers for {} light {}",
                    resolution,
                    resolution,
                    shape.layers(),
                    light.kind.name(),
                    light.id
                );
                self.maps.insert(
                    light.id,
                    ShadowMap {
                        texture,
                        shape,
                        resolution,
                        view_projs: Vec::new(),
                        splits: Vec::new(),
                    },
                );
            }

            let Some(map) = self.maps.get_mut(&light.id) else {
                continue;
            };
            map.view_projs = view_projs;
            map.splits = splits;

            let pipeline = &mut self.pipeline;
            for (layer, view_proj) in map.view_projs.iter().enumerate() {
                let desc = RenderPassDescriptor {
                    label: Some(format!("shadow:{}:{}", light.id, layer)),
                    color_attachments: Vec::new(),
                    depth_stencil_attachment: Some(DepthStencilAttachment {
                        view: map
                            .texture
                            .view_slice::<DepthStencil>(layer as u32)?
                            .handle(),
                        depth_clear: Some(1.0),
                        depth_store_op: StoreOp::Store,
                    }),
                };
                ctx.with_render_pass(&desc, |ctx| {
                    pipeline.activate(ctx);
                    let backend = Arc::clone(ctx.backend());
                    backend.set_viewport(Viewport::full(resolution, resolution));
                    pipeline.update_uniform("light_view_proj", *view_proj)?;
                    for drawable in &scene.drawables {
                        pipeline.update_uniform("model", drawable.world)?;
                        pipeline.upload_updated_uniforms()?;
                        drawable.mesh.bind(backend.as_ref(), &[0]);
                        drawable.mesh.draw(backend.as_ref())?;
                    }
                    Ok(())
                })?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ShadowPass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowPass")
            .field("maps", &self.maps.len())
            .finish()
    }
}
