//! Typed texture views.
//!
//! Every texture carries one [`ResourceViewCollection`] per view kind its usage
//! permits. A collection holds a general view over the whole range, one view
//! per array slice and one per (slice, mip) pair, all created up front.

use std::marker::PhantomData;
use std::sync::Arc;

use super::texture::Texture;
use crate::backend::{
    GraphicsBackend, TextureAspect, TextureDescriptor, TextureFormat, TextureHandle,
    TextureViewDescriptor, TextureViewDimension, TextureViewHandle,
};
use crate::error::RenderResult;

mod sealed {
    pub trait Sealed {}
}

/// Runtime tag of a view kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKindId {
    RenderTarget,
    DepthStencil,
    ShaderResource,
}

impl ViewKindId {
    pub fn name(self) -> &'static str {
        match self {
            ViewKindId::RenderTarget => "render target",
            ViewKindId::DepthStencil => "depth stencil",
            ViewKindId::ShaderResource => "shader resource",
        }
    }

    /// Attachment views address one mip at a time; shader views see the
    /// whole chain.
    fn is_attachment(self) -> bool {
        !matches!(self, ViewKindId::ShaderResource)
    }
}

/// Type-level view kind used to select a collection on a [`Texture`].
pub trait ViewKind: sealed::Sealed + Sized + 'static {
    const ID: ViewKindId;

    fn collection(texture: &Texture) -> Option<&ResourceViewCollection<Self>>;
}

/// Color attachment views.
#[derive(Debug)]
pub struct RenderTarget;

/// Depth attachment views.
#[derive(Debug)]
pub struct DepthStencil;

/// Shader-readable views.
#[derive(Debug)]
pub struct ShaderResource;

impl sealed::Sealed for RenderTarget {}
impl sealed::Sealed for DepthStencil {}
impl sealed::Sealed for ShaderResource {}

impl ViewKind for RenderTarget {
    const ID: ViewKindId = ViewKindId::RenderTarget;

    fn collection(texture: &Texture) -> Option<&ResourceViewCollection<Self>> {
        texture.render_targets.as_ref()
    }
}

impl ViewKind for DepthStencil {
    const ID: ViewKindId = ViewKindId::DepthStencil;

    fn collection(texture: &Texture) -> Option<&ResourceViewCollection<Self>> {
        texture.depth_stencils.as_ref()
    }
}

impl ViewKind for ShaderResource {
    const ID: ViewKindId = ViewKindId::ShaderResource;

    fn collection(texture: &Texture) -> Option<&ResourceViewCollection<Self>> {
        texture.shader_resources.as_ref()
    }
}

/// A view onto a range of a texture, destroyed on drop.
pub struct TextureView {
    backend: Arc<dyn GraphicsBackend>,
    handle: TextureViewHandle,
    texture: TextureHandle,
    kind: ViewKindId,
    format: TextureFormat,
    desc: TextureViewDescriptor,
    width: u32,
    height: u32,
}

impl TextureView {
    pub fn handle(&self) -> TextureViewHandle {
        self.handle
    }

    pub fn texture_handle(&self) -> TextureHandle {
        self.texture
    }

    pub fn kind(&self) -> ViewKindId {
        self.kind
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn base_mip_level(&self) -> u32 {
        self.desc.base_mip_level
    }

    pub fn mip_level_count(&self) -> u32 {
        self.desc.mip_level_count
    }

    pub fn base_array_layer(&self) -> u32 {
        self.desc.base_array_layer
    }

    pub fn array_layer_count(&self) -> u32 {
        self.desc.array_layer_count
    }

    pub fn dimension(&self) -> TextureViewDimension {
        self.desc.dimension
    }

    /// Size of the view's most detailed mip.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl Drop for TextureView {
    fn drop(&mut self) {
        self.backend.destroy_texture_view(self.handle);
    }
}

impl std::fmt::Debug for TextureView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureView")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("mips", &(self.desc.base_mip_level, self.desc.mip_level_count))
            .field(
                "layers",
                &(self.desc.base_array_layer, self.desc.array_layer_count),
            )
            .finish()
    }
}

/// General, per-slice and per-(slice, mip) views of one kind.
pub struct ResourceViewCollection<K: ViewKind> {
    general: Arc<TextureView>,
    slices: Vec<Arc<TextureView>>,
    mips: Vec<Vec<Arc<TextureView>>>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: ViewKind> ResourceViewCollection<K> {
    pub(crate) fn build(
        backend: &Arc<dyn GraphicsBackend>,
        texture: TextureHandle,
        desc: &TextureDescriptor,
    ) -> RenderResult<Self> {
        let builder = ViewBuilder {
            backend,
            texture,
            desc,
            kind: K::ID,
        };
        let attachment = K::ID.is_attachment();
        let layers = desc.array_layers;
        let mips = desc.mip_levels;
        let range_mips = if attachment { 1 } else { mips };
        let single = layers == 1 && !desc.is_array;

        let general_dimension = if single {
            TextureViewDimension::D2
        } else {
            TextureViewDimension::D2Array
        };
        let general = builder.create("general", 0, range_mips, 0, layers, general_dimension)?;

        let mut slices = Vec::with_capacity(layers as usize);
        for slice in 0..layers {
            if single {
                slices.push(Arc::clone(&general));
            } else {
                slices.push(builder.create(
                    &format!("slice{}", slice),
                    0,
                    range_mips,
                    slice,
                    1,
                    TextureViewDimension::D2,
                )?);
            }
        }

        let mut table = Vec::with_capacity(layers as usize);
        for (slice, slice_view) in (0..layers).zip(&slices) {
            let mut row = Vec::with_capacity(mips as usize);
            for mip in 0..mips {
                // Mip 0 of an attachment slice is the slice view itself.
                if mip == 0 && (attachment || mips == 1) {
                    row.push(Arc::clone(slice_view));
                    continue;
                }
                row.push(builder.create(
                    &format!("slice{}/mip{}", slice, mip),
                    mip,
                    1,
                    slice,
                    1,
                    TextureViewDimension::D2,
                )?);
            }
            table.push(row);
        }

        Ok(Self {
            general,
            slices,
            mips: table,
            _kind: PhantomData,
        })
    }

    /// View over every slice (and, for shader resources, every mip).
    pub fn general(&self) -> &Arc<TextureView> {
        &self.general
    }

    pub fn slice(&self, slice: u32) -> Option<&Arc<TextureView>> {
        self.slices.get(slice as usize)
    }

    pub fn mip(&self, slice: u32, mip: u32) -> Option<&Arc<TextureView>> {
        self.mips.get(slice as usize)?.get(mip as usize)
    }

    pub fn slice_count(&self) -> u32 {
        self.slices.len() as u32
    }

    pub fn mip_count(&self) -> u32 {
        self.mips.first().map(|row| row.len() as u32).unwrap_or(0)
    }
}

struct ViewBuilder<'a> {
    backend: &'a Arc<dyn GraphicsBackend>,
    texture: TextureHandle,
    desc: &'a TextureDescriptor,
    kind: ViewKindId,
}

impl ViewBuilder<'_> {
    fn create(
        &self,
        suffix: &str,
        base_mip_level: u32,
        mip_level_count: u32,
        base_array_layer: u32,
        array_layer_count: u32,
        dimension: TextureViewDimension,
    ) -> RenderResult<Arc<TextureView>> {
        // Depth-stencil textures are sampled through their depth aspect.
        let aspect = if self.kind == ViewKindId::ShaderResource && self.desc.format.has_stencil() {
            TextureAspect::DepthOnly
        } else {
            TextureAspect::All
        };
        let view_desc = TextureViewDescriptor {
            label: Some(format!(
                "{}/{}/{}",
                self.desc.label.as_deref().unwrap_or("texture"),
                self.kind.name(),
                suffix
            )),
            dimension,
            aspect,
            base_mip_level,
            mip_level_count,
            base_array_layer,
            array_layer_count,
        };
        let handle = self.backend.create_texture_view(self.texture, &view_desc)?;
        let (width, height) = self.desc.mip_size(base_mip_level);
        Ok(Arc::new(TextureView {
            backend: Arc::clone(self.backend),
            handle,
            texture: self.texture,
            kind: self.kind,
            format: self.desc.format,
            desc: view_desc,
            width,
            height,
        }))
    }
}
