//! Deferred renderer
//!
//! Each frame runs, in order:
//! 1. pending resize (new frame buffer pool, slots and G-buffer)
//! 2. shadow maps for every shadow-casting light
//! 3. geometry pass into the G-buffer
//! 4. additive lighting pass into the radiance target
//! 5. post-processing into the back buffer
//! 6. flush, fence wait and publication of the back buffer
//!
//! A frame without a scene or camera only clears the back buffer.

pub mod cascades;
mod gbuffer;
mod geometry_pass;
mod lighting_pass;
mod post_pass;
pub mod shaders;
mod shadow_pass;

pub use gbuffer::{Defaults, GBuffer};
pub use geometry_pass::GeometryPass;
pub use lighting_pass::LightingPass;
pub use post_pass::{PostPass, PostSettings, TonemapOperator};
pub use shadow_pass::{CascadeSettings, ShadowMap, ShadowPass};

use std::sync::Arc;

use crate::backend::{
    ColorAttachment, DepthStencilAttachment, GraphicsBackend, LoadOp, RenderPassDescriptor,
    StoreOp,
};
use crate::error::{RenderError, RenderResult};
use crate::frame::{FrameBuffer, FrameBufferPool, FramePresenter, FrameSlots, ResizeHandle};
use crate::pipeline::RenderContext;
use crate::scene::SceneFrame;
use crate::RendererConfig;

pub struct DeferredRenderer {
    backend: Arc<dyn GraphicsBackend>,
    config: RendererConfig,
    ctx: RenderContext,
    pool: FrameBufferPool,
    slots: FrameSlots,
    resize: ResizeHandle,
    gbuffer: GBuffer,
    defaults: Defaults,
    shadow_pass: ShadowPass,
    geometry_pass: GeometryPass,
    lighting_pass: LightingPass,
    post_pass: PostPass,
}

impl DeferredRenderer {
    /// Create every pipeline and the initial frame buffers.
    pub fn new(backend: Arc<dyn GraphicsBackend>, config: RendererConfig) -> RenderResult<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(RenderError::InvalidParameter(format!(
                "render target size {}x{} is empty",
                config.width, config.height
            )));
        }
        let mut pool = FrameBufferPool::new(
            &backend,
            config.frame_pool_capacity.max(3),
            config.width,
            config.height,
            config.frame_format,
        )?;
        let slots = FrameSlots::new(&mut pool)?;
        let gbuffer = GBuffer::new(&backend, config.width, config.height)?;
        let defaults = Defaults::new(&backend)?;
        let shadow_pass = ShadowPass::new(&backend)?;
        let geometry_pass = GeometryPass::new(&backend)?;
        let lighting_pass = LightingPass::new(&backend)?;
        let post_pass = PostPass::new(&backend)?;

        log::info!(
            "Deferred renderer ready on {} backend ({}x{}, {:?})",
            backend.name(),
            config.width,
            config.height,
            config.frame_format
        );
        Ok(Self {
            ctx: RenderContext::new(Arc::clone(&backend)),
            backend,
            config,
            pool,
            slots,
            resize: ResizeHandle::new(),
            gbuffer,
            defaults,
            shadow_pass,
            geometry_pass,
            lighting_pass,
            post_pass,
        })
    }

    pub fn backend(&self) -> &Arc<dyn GraphicsBackend> {
        &self.backend
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Handle for the thread that displays finished frames.
    pub fn presenter(&self) -> FramePresenter {
        self.slots.presenter()
    }

    /// Handle through which any thread can request a resize; it is applied
    /// at the start of the next frame.
    pub fn resize_handle(&self) -> ResizeHandle {
        self.resize.clone()
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.resize.request(width, height);
    }

    /// Current render target size.
    pub fn size(&self) -> (u32, u32) {
        self.pool.size()
    }

    pub fn back_buffer(&self) -> &Arc<FrameBuffer> {
        self.slots.back()
    }

    pub fn pool(&self) -> &FrameBufferPool {
        &self.pool
    }

    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    pub fn shadow_map_count(&self) -> usize {
        self.shadow_pass.map_count()
    }

    /// Frames published so far.
    pub fn frame_count(&self) -> u64 {
        self.slots.published()
    }

    /// Render one frame and publish it to the presenter.
    ///
    /// Returns the published frame number. A fence timeout leaves the frame
    /// unpublished and is reported as an error for which
    /// [`RenderError::is_fence_timeout`] holds; the next call may retry.
    pub fn render_frame(&mut self, scene: Option<&SceneFrame>) -> RenderResult<u64> {
        self.apply_resize()?;
        let target = Arc::clone(self.slots.back());

        match scene.and_then(|scene| scene.camera.clone().map(|camera| (scene, camera))) {
            Some((scene, mut camera)) => {
                let (width, height) = self.size();
                camera.set_aspect(width as f32, height as f32);

                self.shadow_pass.render(
                    &mut self.ctx,
                    scene,
                    &camera,
                    CascadeSettings {
                        count: self.config.shadow_cascades,
                        lambda: self.config.cascade_split_lambda,
                    },
                )?;
                self.geometry_pass.render(
                    &mut self.ctx,
                    &self.gbuffer,
                    &self.defaults,
                    scene,
                    &camera,
                )?;
                self.lighting_pass.render(
                    &mut self.ctx,
                    &self.gbuffer,
                    &self.defaults,
                    &self.shadow_pass,
                    scene,
                    &camera,
                )?;
                self.post_pass.render(
                    &mut self.ctx,
                    &self.gbuffer,
                    &self.defaults,
                    &target,
                    &self.config.post_settings(),
                )?;
            }
            None => {
                log::trace!("No scene or camera, clearing frame");
                self.clear(&target)?;
            }
        }
        self.ctx.deactivate();

        let frame = self
            .slots
            .flush_and_swap(self.backend.as_ref(), self.config.fence_timeout)?;
        log::trace!("Published frame {}", frame);
        Ok(frame)
    }

    fn clear(&mut self, target: &FrameBuffer) -> RenderResult<()> {
        let desc = RenderPassDescriptor {
            label: Some("clear".to_string()),
            color_attachments: vec![ColorAttachment {
                view: target.color_target()?.handle(),
                load_op: LoadOp::Clear(self.config.clear_color),
                store_op: StoreOp::Store,
            }],
            depth_stencil_attachment: Some(DepthStencilAttachment {
                view: target.depth_target()?.handle(),
                depth_clear: Some(1.0),
                depth_store_op: StoreOp::Store,
            }),
        };
        self.ctx.with_render_pass(&desc, |_| Ok(()))
    }

    fn apply_resize(&mut self) -> RenderResult<()> {
        let Some((width, height)) = self.resize.take() else {
            return Ok(());
        };
        if width == 0 || height == 0 {
            log::warn!("Ignoring resize to {}x{}", width, height);
            return Ok(());
        }
        if (width, height) == self.pool.size() {
            return Ok(());
        }

        let mut pool = FrameBufferPool::new(
            &self.backend,
            self.config.frame_pool_capacity.max(3),
            width,
            height,
            self.config.frame_format,
        )?;
        let gbuffer = GBuffer::new(&self.backend, width, height)?;
        for old in self.slots.replace(&mut pool)? {
            self.pool.release(&old)?;
        }
        self.pool = pool;
        self.gbuffer = gbuffer;
        self.config.width = width;
        self.config.height = height;
        log::info!("Resized render targets to {}x{}", width, height);
        Ok(())
    }
}

impl std::fmt::Debug for DeferredRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredRenderer")
            .field("backend", &self.backend.name())
            .field("size", &self.size())
            .field("frames", &self.slots.published())
            .field("shadow_maps", &self.shadow_pass.map_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn renderer() -> (Arc<DummyBackend>, DeferredRenderer) {
        let dummy = Arc::new(DummyBackend::new());
        let renderer = DeferredRenderer::new(
            dummy.clone(),
            RendererConfig::default().with_size(64, 48),
        )
        .unwrap();
        (dummy, renderer)
    }

    #[test]
    fn missing_camera_clears() {
        let (dummy, mut renderer) = renderer();
        assert_eq!(renderer.render_frame(None).unwrap(), 1);
        assert_eq!(renderer.render_frame(Some(&SceneFrame::new())).unwrap(), 2);
        assert_eq!(dummy.pass_labels(), vec!["clear", "clear"]);
    }

    #[test]
    fn resize_applies_on_next_frame() {
        let (_dummy, mut renderer) = renderer();
        let handle = renderer.resize_handle();
        handle.request(0, 10);
        renderer.render_frame(None).unwrap();
        assert_eq!(renderer.size(), (64, 48));

        handle.request(32, 16);
        assert_eq!(renderer.size(), (64, 48));
        renderer.render_frame(None).unwrap();
        assert_eq!(renderer.size(), (32, 16));
        assert_eq!(renderer.back_buffer().width(), 32);
        assert_eq!(renderer.gbuffer().size(), (32, 16));
    }
}
