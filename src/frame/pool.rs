use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::FrameBuffer;
use crate::backend::{GraphicsBackend, TextureFormat};
use crate::error::{RenderError, RenderResult};

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// A growable set of equally sized frame buffers.
///
/// `get` never blocks: when every buffer is outstanding the pool doubles.
/// Capacity never shrinks.
pub struct FrameBufferPool {
    id: u64,
    backend: Arc<dyn GraphicsBackend>,
    width: u32,
    height: u32,
    format: TextureFormat,
    buffers: Vec<Arc<FrameBuffer>>,
    outstanding: Vec<bool>,
    free: Vec<usize>,
}

impl FrameBufferPool {
    /// Allocate `capacity` buffers up front.
    pub fn new(
        backend: &Arc<dyn GraphicsBackend>,
        capacity: usize,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> RenderResult<Self> {
        if capacity == 0 {
            return Err(RenderError::InvalidParameter(
                "frame buffer pool capacity must be at least 1".into(),
            ));
        }
        let mut pool = Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            backend: Arc::clone(backend),
            width,
            height,
            format,
            buffers: Vec::with_capacity(capacity),
            outstanding: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
        };
        pool.grow(capacity)?;
        log::info!(
            "Created frame buffer pool {} ({} x {}x{} {:?})",
            pool.id,
            capacity,
            width,
            height,
            format
        );
        Ok(pool)
    }

    /// Add `additional` buffers. Nothing is committed unless all of them
    /// were created; partial allocations are dropped.
    fn grow(&mut self, additional: usize) -> RenderResult<()> {
        let start = self.buffers.len();
        let created = (start..start + additional)
            .map(|index| {
                FrameBuffer::new(
                    &self.backend,
                    self.id,
                    index as u64,
                    self.width,
                    self.height,
                    self.format,
                )
                .map(Arc::new)
            })
            .collect::<RenderResult<Vec<_>>>()?;
        self.buffers.extend(created);
        self.outstanding.resize(self.buffers.len(), false);
        // Lowest index on top of the stack.
        self.free.extend((start..self.buffers.len()).rev());
        Ok(())
    }

    /// Take a free buffer, doubling the pool first if none is left.
    pub fn get(&mut self) -> RenderResult<Arc<FrameBuffer>> {
        if self.free.is_empty() {
            let additional = self.buffers.len();
            log::debug!(
                "Frame buffer pool {} exhausted, growing {} -> {}",
                self.id,
                additional,
                additional * 2
            );
            self.grow(additional)?;
        }
        let index = self.free.pop().ok_or_else(|| {
            RenderError::InvalidParameter(format!("frame buffer pool {} is empty", self.id))
        })?;
        self.outstanding[index] = true;
        Ok(Arc::clone(&self.buffers[index]))
    }

    /// Return a buffer obtained from [`get`](Self::get).
    pub fn release(&mut self, buffer: &Arc<FrameBuffer>) -> RenderResult<()> {
        if buffer.pool_id() != self.id {
            return Err(RenderError::ForeignFrameBuffer {
                buffer: buffer.id(),
                owner: buffer.pool_id(),
                pool: self.id,
            });
        }
        let index = buffer.id() as usize;
        match self.outstanding.get_mut(index) {
            Some(outstanding) if *outstanding => {
                *outstanding = false;
                self.free.push(index);
                Ok(())
            }
            _ => Err(RenderError::FrameBufferNotOutstanding {
                buffer: buffer.id(),
                pool: self.id,
            }),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    pub fn outstanding(&self) -> usize {
        self.capacity() - self.available()
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }
}

impl std::fmt::Debug for FrameBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBufferPool")
            .field("id", &self.id)
            .field("size", &(self.width, self.height))
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyBackend;

    fn pool(capacity: usize) -> FrameBufferPool {
        let backend: Arc<dyn GraphicsBackend> = Arc::new(DummyBackend::new());
        FrameBufferPool::new(&backend, capacity, 16, 16, TextureFormat::Rgba8Unorm).unwrap()
    }

    #[test]
    fn get_never_returns_outstanding_buffer() {
        let mut pool = pool(1);
        let first = pool.get().unwrap();
        let second = pool.get().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.available(), 0);

        pool.release(&first).unwrap();
        let third = pool.get().unwrap();
        assert!(Arc::ptr_eq(&first, &third));
    }

    #[test]
    fn double_release_fails() {
        let mut pool = pool(2);
        let buffer = pool.get().unwrap();
        pool.release(&buffer).unwrap();
        assert!(matches!(
            pool.release(&buffer),
            Err(RenderError::FrameBufferNotOutstanding { .. })
        ));
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn failed_growth_leaves_pool_unchanged() {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GraphicsBackend> = dummy.clone();
        let mut pool =
            FrameBufferPool::new(&backend, 2, 16, 16, TextureFormat::Rgba8Unorm).unwrap();
        let first = pool.get().unwrap();
        let _second = pool.get().unwrap();

        // Room for one more color + depth pair, not the two growth needs.
        dummy.set_texture_limit(Some(dummy.live_texture_count() + 2));
        assert!(pool.get().is_err());
        assert_eq!(pool.capacity(), 2);
        assert_eq!(pool.available(), 0);
        assert_eq!(dummy.live_texture_count(), 4);

        dummy.set_texture_limit(None);
        let third = pool.get().unwrap();
        assert_eq!(pool.capacity(), 4);
        assert_eq!(third.id(), 2);
        pool.release(&first).unwrap();
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn zero_capacity_rejected() {
        let backend: Arc<dyn GraphicsBackend> = Arc::new(DummyBackend::new());
        assert!(FrameBufferPool::new(&backend, 0, 4, 4, TextureFormat::Rgba8Unorm).is_err());
    }
}
