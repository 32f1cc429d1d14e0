use std::sync::Arc;

use crate::backend::{
    GraphicsBackend, TextureDescriptor, TextureFormat, TextureHandle, TextureUsage,
    TextureViewHandle,
};
use crate::error::RenderResult;
use crate::resources::{DepthStencil, RenderTarget, ShaderResource, Texture, TextureView};

/// What the presentation thread needs to show a finished frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresentationHandle {
    pub texture: TextureHandle,
    /// Shader-resource view over the color texture.
    pub view: TextureViewHandle,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// A color and depth target pair of equal size, owned by a [`FrameBufferPool`].
///
/// [`FrameBufferPool`]: super::FrameBufferPool
pub struct FrameBuffer {
    id: u64,
    pool_id: u64,
    color: Texture,
    depth: Texture,
    presentation: PresentationHandle,
}

impl FrameBuffer {
    pub(crate) fn new(
        backend: &Arc<dyn GraphicsBackend>,
        pool_id: u64,
        id: u64,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> RenderResult<Self> {
        let color = Texture::new(
            backend,
            TextureDescriptor::new_2d(
                width,
                height,
                format,
                TextureUsage::RENDER_ATTACHMENT
                    | TextureUsage::TEXTURE_BINDING
                    | TextureUsage::COPY_SRC,
            )
            .with_label(format!("frame{}.{}/color", pool_id, id)),
        )?;
        let depth = Texture::new(
            backend,
            TextureDescriptor::new_2d(
                width,
                height,
                TextureFormat::Depth32Float,
                TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            )
            .with_label(format!("frame{}.{}/depth", pool_id, id)),
        )?;
        let presentation = PresentationHandle {
            texture: color.handle(),
            view: color.view::<ShaderResource>()?.handle(),
            width,
            height,
            format,
        };
        Ok(Self {
            id,
            pool_id,
            color,
            depth,
            presentation,
        })
    }

    /// Index within the owning pool.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pool_id(&self) -> u64 {
        self.pool_id
    }

    pub fn width(&self) -> u32 {
        self.color.width()
    }

    pub fn height(&self) -> u32 {
        self.color.height()
    }

    pub fn format(&self) -> TextureFormat {
        self.color.format()
    }

    pub fn color(&self) -> &Texture {
        &self.color
    }

    pub fn depth(&self) -> &Texture {
        &self.depth
    }

    pub fn color_target(&self) -> RenderResult<&Arc<TextureView>> {
        self.color.view::<RenderTarget>()
    }

    pub fn depth_target(&self) -> RenderResult<&Arc<TextureView>> {
        self.depth.view::<DepthStencil>()
    }

    pub fn presentation_handle(&self) -> PresentationHandle {
        self.presentation
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("id", &self.id)
            .field("pool_id", &self.pool_id)
            .field("size", &(self.width(), self.height()))
            .finish()
    }
}
