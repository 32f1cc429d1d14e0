//! GPU buffers released on drop.

use std::sync::Arc;

use crate::backend::{BufferDescriptor, BufferHandle, GraphicsBackend};
use crate::error::RenderResult;

/// A GPU buffer owned by the renderer.
pub struct Buffer {
    backend: Arc<dyn GraphicsBackend>,
    handle: BufferHandle,
    desc: BufferDescriptor,
}

impl Buffer {
    pub fn new(backend: &Arc<dyn GraphicsBackend>, desc: BufferDescriptor) -> RenderResult<Self> {
        let handle = backend.create_buffer(&desc)?;
        Ok(Self {
            backend: Arc::clone(backend),
            handle,
            desc,
        })
    }

    pub fn with_data(
        backend: &Arc<dyn GraphicsBackend>,
        desc: BufferDescriptor,
        data: &[u8],
    ) -> RenderResult<Self> {
        let handle = backend.create_buffer_init(&desc, data)?;
        Ok(Self {
            backend: Arc::clone(backend),
            handle,
            desc,
        })
    }

    pub fn handle(&self) -> BufferHandle {
        self.handle
    }

    pub fn size(&self) -> u64 {
        self.desc.size
    }

    pub fn label(&self) -> Option<&str> {
        self.desc.label.as_deref()
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> RenderResult<()> {
        self.backend.write_buffer(self.handle, offset, data)?;
        Ok(())
    }

    /// Read the whole buffer back, waiting for pending GPU work.
    pub fn read(&self) -> RenderResult<Vec<u8>> {
        Ok(self.backend.read_buffer(self.handle, 0, self.desc.size)?)
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.backend.destroy_buffer(self.handle);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("handle", &self.handle)
            .field("label", &self.desc.label)
            .field("size", &self.desc.size)
            .finish()
    }
}

static_assertions::assert_impl_all!(Buffer: Send, Sync);
