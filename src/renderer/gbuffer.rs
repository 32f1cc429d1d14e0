//! G-buffer render targets and the fallback resources passes bind when a
//! material or light leaves a slot empty.

use std::sync::Arc;

use crate::backend::{
    ColorAttachment, DepthStencilAttachment, GraphicsBackend, LoadOp, RenderPassDescriptor,
    SamplerDescriptor, StoreOp, TextureDescriptor, TextureFormat, TextureUsage,
};
use crate::error::RenderResult;
use crate::resources::{
    DepthStencil, MaterialSlot, RenderTarget, Sampler, ShaderResource, Texture, TextureData,
    TextureView,
};

/// Color attachments in shader output order, with the value they clear to.
const COLOR_TARGETS: [(&str, TextureFormat, [f32; 4]); 6] = [
    ("position", TextureFormat::Rgba16Float, [0.0, 0.0, 0.0, 0.0]),
    ("albedo", TextureFormat::Rgba8Unorm, [0.0, 0.0, 0.0, 0.0]),
    ("normal", TextureFormat::Rgba16Float, [0.0, 0.0, 1.0, 0.0]),
    ("metallic", TextureFormat::R8Unorm, [0.0, 0.0, 0.0, 0.0]),
    ("roughness", TextureFormat::R8Unorm, [1.0, 0.0, 0.0, 0.0]),
    ("ao", TextureFormat::R8Unorm, [1.0, 0.0, 0.0, 0.0]),
];

pub struct GBuffer {
    width: u32,
    height: u32,
    targets: Vec<Texture>,
    depth: Texture,
    radiance: Texture,
}

impl GBuffer {
    pub fn new(backend: &Arc<dyn GraphicsBackend>, width: u32, height: u32) -> RenderResult<Self> {
        let usage = TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING;
        let targets = COLOR_TARGETS
            .iter()
            .map(|(name, format, _)| {
                Texture::new(
                    backend,
                    TextureDescriptor::new_2d(width, height, *format, usage)
                        .with_label(format!("gbuffer/{}", name)),
                )
            })
            .collect::<RenderResult<Vec<_>>>()?;
        let depth = Texture::new(
            backend,
            TextureDescriptor::new_2d(
                width,
                height,
                TextureFormat::Depth32Float,
                TextureUsage::RENDER_ATTACHMENT,
            )
                .with_label("gbuffer/depth"),
        )?;
        let radiance = Texture::new(
            backend,
            TextureDescriptor::new_2d(width, height, TextureFormat::Rgba16Float, usage)
                .with_label("gbuffer/radiance"),
        )?;
        log::debug!("Created G-buffer {}x{}", width, height);
        Ok(Self {
            width,
            height,
            targets,
            depth,
            radiance,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pass that clears and writes every G-buffer attachment.
    pub fn geometry_pass_desc(&self) -> RenderResult<RenderPassDescriptor> {
        let color_attachments = self
            .targets
            .iter()
            .zip(COLOR_TARGETS.iter())
            .map(|(texture, (_, _, clear))| {
                Ok(ColorAttachment {
                    view: texture.view::<RenderTarget>()?.handle(),
                    load_op: LoadOp::Clear(*clear),
                    store_op: StoreOp::Store,
                })
            })
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(RenderPassDescriptor {
            label: Some("geometry".to_string()),
            color_attachments,
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: self.depth.view::<DepthStencil>()?.handle(),
                depth_clear: Some(1.0),
                depth_store_op: StoreOp::Store,
            }),
        })
    }

    /// Pass accumulating light contributions into the radiance target.
    pub fn lighting_pass_desc(&self) -> RenderResult<RenderPassDescriptor> {
        Ok(RenderPassDescriptor {
            label: Some("lighting".to_string()),
            color_attachments: vec![ColorAttachment {
                view: self.radiance.view::<RenderTarget>()?.handle(),
                load_op: LoadOp::Clear([0.0, 0.0, 0.0, 0.0]),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: None,
        })
    }

    /// Sampled views of the color targets keyed by shader binding name.
    /// Depth is not among them; coverage lives in the position target's w.
    pub fn shader_inputs(&self) -> RenderResult<Vec<(String, &Arc<TextureView>)>> {
        self
            .targets
            .iter()
            .zip(COLOR_TARGETS.iter())
            .map(|(texture, (name, _, _))| {
                Ok((format!("gbuffer_{}", name), texture.view::<ShaderResource>()?))
            })
            .collect()
    }

    pub fn albedo(&self) -> &Texture {
        &self.targets[1]
    }

    pub fn ao(&self) -> &Texture {
        &self.targets[5]
    }

    pub fn radiance(&self) -> &Texture {
        &self.radiance
    }
}

impl std::fmt::Debug for GBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

/// Samplers and 1x1 stand-in textures shared by all passes.
pub struct Defaults {
    white: Texture,
    flat_normal: Texture,
    /// Depth array that is never rendered to; bound when a light has no map.
    empty_shadow: Texture,
    pub material_sampler: Sampler,
    pub shadow_sampler: Sampler,
    pub post_sampler: Sampler,
}

impl Defaults {
    pub fn new(backend: &Arc<dyn GraphicsBackend>) -> RenderResult<Self> {
        let empty_shadow = Texture::new(
            backend,
            TextureDescriptor::new_2d(1, 1, TextureFormat::Depth32Float, TextureUsage::TEXTURE_BINDING)
                .with_label("shadow/empty")
                .as_array(),
        )?;
        Ok(Self {
            white: Texture::from_data(backend, &TextureData::white())?,
            flat_normal: Texture::from_data(backend, &TextureData::default_normal())?,
            empty_shadow,
            material_sampler: Sampler::new(backend, &SamplerDescriptor::repeating("material"))?,
            shadow_sampler: Sampler::new(backend, &SamplerDescriptor::shadow("shadow"))?,
            post_sampler: Sampler::new(backend, &SamplerDescriptor::default())?,
        })
    }

    /// Texture bound when a material leaves `slot` empty.
    pub fn material_texture(&self, slot: MaterialSlot) -> RenderResult<&Arc<TextureView>> {
        match slot {
            MaterialSlot::Normal => self.flat_normal.view::<ShaderResource>(),
            _ => self.white.view::<ShaderResource>(),
        }
    }

    pub fn empty_shadow(&self) -> RenderResult<&Arc<TextureView>> {
        self.empty_shadow.view::<ShaderResource>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;
    use crate::backend::TextureViewDimension;

    #[test]
    fn geometry_pass_covers_every_target() {
        let backend: Arc<dyn GraphicsBackend> = Arc::new(DummyBackend::new());
        let gbuffer = GBuffer::new(&backend, 64, 32).unwrap();
        let desc = gbuffer.geometry_pass_desc().unwrap();
        assert_eq!(desc.color_attachments.len(), 6);
        assert!(desc.depth_stencil_attachment.is_some());

        backend.begin_render_pass(&desc).unwrap();
        backend.end_render_pass().unwrap();

        let names: Vec<_> = gbuffer
            .shader_inputs()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names.len(), 6);
        assert!(!names.contains(&"gbuffer_depth".to_string()));
        assert!(!gbuffer.depth.has_views::<ShaderResource>());
        assert_eq!(gbuffer.albedo().format(), TextureFormat::Rgba8Unorm);
        assert_eq!(gbuffer.ao().format(), TextureFormat::R8Unorm);
    }

    #[test]
    fn empty_shadow_is_an_array() {
        let backend: Arc<dyn GraphicsBackend> = Arc::new(DummyBackend::new());
        let defaults = Defaults::new(&backend).unwrap();
        assert_eq!(
            defaults.empty_shadow().unwrap().dimension(),
            TextureViewDimension::D2Array
        );
        assert!(defaults.shadow_sampler.is_comparison());
    }
}
