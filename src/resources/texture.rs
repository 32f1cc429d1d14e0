//! Textures and their view collections

use std::sync::Arc;

use super::view::{
    DepthStencil, RenderTarget, ResourceViewCollection, ShaderResource, TextureView, ViewKind,
};
use crate::backend::*;
use crate::error::{RenderError, RenderResult};

/// CPU-side texel data for uploading
pub struct TextureData {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub data: Vec<u8>,
    pub name: String,
}

impl TextureData {
    /// Create a solid color texture
    pub fn solid_color(color: [u8; 4], name: &str) -> Self {
        Self {
            width: 1,
            height: 1,
            format: TextureFormat::Rgba8Unorm,
            data: color.to_vec(),
            name: name.to_string(),
        }
    }

    /// Create a default white texture
    pub fn white() -> Self {
        Self::solid_color([255, 255, 255, 255], "white")
    }

    /// Create a default normal map (pointing up)
    pub fn default_normal() -> Self {
        // (0, 0, 1) in tangent space, encoded as (0.5, 0.5, 1.0)
        Self::solid_color([128, 128, 255, 255], "default_normal")
    }

    /// Create a checkerboard texture
    pub fn checkerboard(size: u32, color1: [u8; 4], color2: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((size * size * 4) as usize);

        for y in 0..size {
            for x in 0..size {
                let is_even = ((x / 8) + (y / 8)) % 2 == 0;
                let color = if is_even { color1 } else { color2 };
                data.extend_from_slice(&color);
            }
        }

        Self {
            width: size,
            height: size,
            format: TextureFormat::Rgba8Unorm,
            data,
            name: "checkerboard".to_string(),
        }
    }
}

/// A GPU texture together with every view its usage permits.
///
/// Views are destroyed before the texture when it is dropped.
pub struct Texture {
    backend: Arc<dyn GraphicsBackend>,
    handle: TextureHandle,
    desc: TextureDescriptor,
    pub(crate) render_targets: Option<ResourceViewCollection<RenderTarget>>,
    pub(crate) depth_stencils: Option<ResourceViewCollection<DepthStencil>>,
    pub(crate) shader_resources: Option<ResourceViewCollection<ShaderResource>>,
}

impl Texture {
    /// Allocate a texture and build its view collections.
    pub fn new(backend: &Arc<dyn GraphicsBackend>, desc: TextureDescriptor) -> RenderResult<Self> {
        let (render_target, depth_stencil, shader_resource) = permitted_views(&desc)?;
        if desc.mip_levels == 0 || desc.mip_levels > desc.max_mip_levels() {
            return Err(RenderError::InvalidParameter(format!(
                "texture {:?} requests {} mips, at most {} allowed",
                desc.label,
                desc.mip_levels,
                desc.max_mip_levels()
            )));
        }

        let handle = backend.create_texture(&desc)?;
        let mut texture = Self {
            backend: Arc::clone(backend),
            handle,
            desc,
            render_targets: None,
            depth_stencils: None,
            shader_resources: None,
        };
        // On error `texture` drops here and frees whatever was created.
        if render_target {
            texture.render_targets = Some(ResourceViewCollection::build(
                backend,
                handle,
                &texture.desc,
            )?);
        }
        if depth_stencil {
            texture.depth_stencils = Some(ResourceViewCollection::build(
                backend,
                handle,
                &texture.desc,
            )?);
        }
        if shader_resource {
            texture.shader_resources = Some(ResourceViewCollection::build(
                backend,
                handle,
                &texture.desc,
            )?);
        }

        log::debug!(
            "Created texture {:?} {}x{} ({} layers, {} mips, {:?})",
            texture.desc.label,
            texture.desc.width,
            texture.desc.height,
            texture.desc.array_layers,
            texture.desc.mip_levels,
            texture.desc.format
        );
        Ok(texture)
    }

    /// Create a sampled texture and upload its texels.
    pub fn from_data(backend: &Arc<dyn GraphicsBackend>, data: &TextureData) -> RenderResult<Self> {
        let texture = Self::new(
            backend,
            TextureDescriptor::new_2d(
                data.width,
                data.height,
                data.format,
                TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            )
            .with_label(data.name.clone()),
        )?;
        texture.write(0, 0, &data.data)?;
        Ok(texture)
    }

    /// Upload one mip level of one array layer.
    pub fn write(&self, mip_level: u32, array_layer: u32, data: &[u8]) -> RenderResult<()> {
        self.backend
            .write_texture(self.handle, mip_level, array_layer, data)?;
        Ok(())
    }

    pub fn has_views<K: ViewKind>(&self) -> bool {
        K::collection(self).is_some()
    }

    /// The collection of `K` views, or an error if the usage did not permit it.
    pub fn views<K: ViewKind>(&self) -> RenderResult<&ResourceViewCollection<K>> {
        K::collection(self).ok_or_else(|| RenderError::ViewNotGenerated {
            texture: self.label().to_string(),
            kind: K::ID.name(),
        })
    }

    /// General view spanning the whole range.
    pub fn view<K: ViewKind>(&self) -> RenderResult<&Arc<TextureView>> {
        Ok(self.views::<K>()?.general())
    }

    pub fn view_slice<K: ViewKind>(&self, slice: u32) -> RenderResult<&Arc<TextureView>> {
        self.views::<K>()?
            .slice(slice)
            .ok_or_else(|| self.out_of_range::<K>(slice, 0))
    }

    pub fn view_mip<K: ViewKind>(&self, slice: u32, mip: u32) -> RenderResult<&Arc<TextureView>> {
        self.views::<K>()?
            .mip(slice, mip)
            .ok_or_else(|| self.out_of_range::<K>(slice, mip))
    }

    fn out_of_range<K: ViewKind>(&self, slice: u32, mip: u32) -> RenderError {
        RenderError::ViewIndexOutOfRange {
            texture: self.label().to_string(),
            kind: K::ID.name(),
            slice,
            mip,
        }
    }

    pub fn handle(&self) -> TextureHandle {
        self.handle
    }

    pub fn desc(&self) -> &TextureDescriptor {
        &self.desc
    }

    pub fn label(&self) -> &str {
        self.desc.label.as_deref().unwrap_or("unnamed")
    }

    pub fn width(&self) -> u32 {
        self.desc.width
    }

    pub fn height(&self) -> u32 {
        self.desc.height
    }

    pub fn format(&self) -> TextureFormat {
        self.desc.format
    }

    pub fn array_layers(&self) -> u32 {
        self.desc.array_layers
    }

    pub fn mip_levels(&self) -> u32 {
        self.desc.mip_levels
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        self.render_targets.take();
        self.depth_stencils.take();
        self.shader_resources.take();
        self.backend.destroy_texture(self.handle);
    }
}

impl std::fmt::Debug for Texture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture")
            .field("handle", &self.handle)
            .field("desc", &self.desc)
            .field("render_targets", &self.render_targets.is_some())
            .field("depth_stencils", &self.depth_stencils.is_some())
            .field("shader_resources", &self.shader_resources.is_some())
            .finish()
    }
}

/// Which view kinds a descriptor's format and usage allow, as
/// (render target, depth stencil, shader resource).
fn permitted_views(desc: &TextureDescriptor) -> RenderResult<(bool, bool, bool)> {
    let depth = desc.format.is_depth();
    let unsupported = desc.usage.is_empty()
        || (depth && desc.usage.contains(TextureUsage::STORAGE_BINDING));
    if unsupported {
        return Err(RenderError::UnsupportedTexture {
            format: desc.format,
            usage: desc.usage,
        });
    }
    let attachment = desc.usage.contains(TextureUsage::RENDER_ATTACHMENT);
    Ok((
        attachment && !depth,
        attachment && depth,
        desc.usage.contains(TextureUsage::TEXTURE_BINDING),
    ))
}

static_assertions::assert_impl_all!(Texture: Send, Sync);
