//! Triple-buffered hand-off between the render and presentation threads.
//!
//! The render thread owns the back buffer outright. Middle and front sit
//! behind one lock that is held only while references are exchanged.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{FrameBuffer, FrameBufferPool, PresentationHandle};
use crate::backend::GraphicsBackend;
use crate::error::RenderResult;

struct SharedSlots {
    middle: Arc<FrameBuffer>,
    front: Arc<FrameBuffer>,
    middle_frame: u64,
    front_frame: u64,
    /// Middle holds a frame the presenter has not picked up yet.
    fresh: bool,
}

/// Render-thread side of the triple buffer.
pub struct FrameSlots {
    back: Arc<FrameBuffer>,
    shared: Arc<Mutex<SharedSlots>>,
    published: u64,
}

impl FrameSlots {
    /// Take three buffers from `pool`.
    pub fn new(pool: &mut FrameBufferPool) -> RenderResult<Self> {
        let back = pool.get()?;
        let middle = pool.get()?;
        let front = pool.get()?;
        Ok(Self {
            back,
            shared: Arc::new(Mutex::new(SharedSlots {
                middle,
                front,
                middle_frame: 0,
                front_frame: 0,
                fresh: false,
            })),
            published: 0,
        })
    }

    /// The buffer the render thread draws into.
    pub fn back(&self) -> &Arc<FrameBuffer> {
        &self.back
    }

    /// Number of frames published so far.
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Flush recorded work, wait for the GPU and publish the back buffer.
    ///
    /// On a fence timeout nothing is swapped and the back buffer stays with
    /// the render thread.
    pub fn flush_and_swap(
        &mut self,
        backend: &dyn GraphicsBackend,
        timeout: Option<Duration>,
    ) -> RenderResult<u64> {
        backend.flush()?;
        let fence = backend.insert_fence()?;
        if let Err(err) = backend.wait_fence(&fence, timeout) {
            log::error!(
                "Frame {} not published: {}",
                self.published + 1,
                err
            );
            return Err(err.into());
        }

        self.published += 1;
        let mut shared = self.shared.lock();
        std::mem::swap(&mut self.back, &mut shared.middle);
        shared.middle_frame = self.published;
        shared.fresh = true;
        Ok(self.published)
    }

    /// Swap in three new buffers from `pool`, returning the old back, middle
    /// and front buffers.
    pub fn replace(&mut self, pool: &mut FrameBufferPool) -> RenderResult<[Arc<FrameBuffer>; 3]> {
        let back = pool.get()?;
        let middle = pool.get()?;
        let front = pool.get()?;

        let mut shared = self.shared.lock();
        let old_middle = std::mem::replace(&mut shared.middle, middle);
        let old_front = std::mem::replace(&mut shared.front, front);
        shared.fresh = false;
        shared.middle_frame = self.published;
        shared.front_frame = self.published;
        drop(shared);

        let old_back = std::mem::replace(&mut self.back, back);
        Ok([old_back, old_middle, old_front])
    }

    /// Handle for the presentation thread.
    pub fn presenter(&self) -> FramePresenter {
        FramePresenter {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// A frame handed to the presentation thread.
#[derive(Debug, Clone)]
pub struct PresentedFrame {
    pub frame_buffer: Arc<FrameBuffer>,
    pub handle: PresentationHandle,
    pub frame_number: u64,
    /// False when no new frame was published since the last call.
    pub fresh: bool,
}

/// Presentation-thread side of the triple buffer.
///
/// A presented buffer may be recycled as the back buffer once the next
/// frame is picked up, so it should not be read after the following call.
#[derive(Clone)]
pub struct FramePresenter {
    shared: Arc<Mutex<SharedSlots>>,
}

impl FramePresenter {
    /// Promote a freshly published frame to front, then return front.
    pub fn next_front_buffer(&self) -> PresentedFrame {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        let fresh = shared.fresh;
        if fresh {
            std::mem::swap(&mut shared.middle, &mut shared.front);
            std::mem::swap(&mut shared.middle_frame, &mut shared.front_frame);
            shared.fresh = false;
        }
        let frame_buffer = Arc::clone(&shared.front);
        let frame_number = shared.front_frame;
        drop(guard);

        PresentedFrame {
            handle: frame_buffer.presentation_handle(),
            frame_buffer,
            frame_number,
            fresh,
        }
    }
}

impl std::fmt::Debug for FramePresenter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FramePresenter").finish_non_exhaustive()
    }
}

/// Pending resize requested from any thread, consumed by the render thread.
#[derive(Debug, Clone, Default)]
pub struct ResizeHandle {
    pending: Arc<Mutex<Option<(u32, u32)>>>,
}

impl ResizeHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a new size. A later request replaces an unconsumed one.
    pub fn request(&self, width: u32, height: u32) {
        *self.pending.lock() = Some((width, height));
    }

    pub(crate) fn take(&self) -> Option<(u32, u32)> {
        self.pending.lock().take()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }
}

static_assertions::assert_impl_all!(FramePresenter: Send, Sync);
static_assertions::assert_impl_all!(ResizeHandle: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyBackend, TextureFormat};

    fn setup() -> (Arc<DummyBackend>, FrameBufferPool, FrameSlots) {
        let dummy = Arc::new(DummyBackend::new());
        let backend: Arc<dyn GraphicsBackend> = dummy.clone();
        let mut pool =
            FrameBufferPool::new(&backend, 3, 8, 8, TextureFormat::Rgba8Unorm).unwrap();
        let slots = FrameSlots::new(&mut pool).unwrap();
        (dummy, pool, slots)
    }

    #[test]
    fn published_frame_reaches_front_once() {
        let (dummy, _pool, mut slots) = setup();
        let presenter = slots.presenter();
        let initial = presenter.next_front_buffer();
        assert!(!initial.fresh);
        assert_eq!(initial.frame_number, 0);

        let rendered = Arc::clone(slots.back());
        assert_eq!(slots.flush_and_swap(dummy.as_ref(), None).unwrap(), 1);
        assert!(!Arc::ptr_eq(slots.back(), &rendered));

        let frame = presenter.next_front_buffer();
        assert!(frame.fresh);
        assert_eq!(frame.frame_number, 1);
        assert!(Arc::ptr_eq(&frame.frame_buffer, &rendered));
        assert_eq!(frame.handle, rendered.presentation_handle());

        let again = presenter.next_front_buffer();
        assert!(!again.fresh);
        assert!(Arc::ptr_eq(&again.frame_buffer, &rendered));
    }

    #[test]
    fn newest_frame_wins_when_presenter_lags() {
        let (dummy, _pool, mut slots) = setup();
        let presenter = slots.presenter();
        slots.flush_and_swap(dummy.as_ref(), None).unwrap();
        let second = Arc::clone(slots.back());
        slots.flush_and_swap(dummy.as_ref(), None).unwrap();

        let frame = presenter.next_front_buffer();
        assert_eq!(frame.frame_number, 2);
        assert!(Arc::ptr_eq(&frame.frame_buffer, &second));
    }

    #[test]
    fn fence_timeout_keeps_back_buffer() {
        let (dummy, _pool, mut slots) = setup();
        let back = Arc::clone(slots.back());
        dummy.set_fences_stalled(true);
        let err = slots
            .flush_and_swap(dummy.as_ref(), Some(Duration::from_millis(5)))
            .unwrap_err();
        assert!(err.is_fence_timeout());
        assert!(Arc::ptr_eq(slots.back(), &back));
        assert!(!slots.presenter().next_front_buffer().fresh);
        assert_eq!(slots.published(), 0);
    }

    #[test]
    fn replace_hands_back_old_buffers() {
        let (_dummy, mut pool, mut slots) = setup();
        let old = slots.replace(&mut pool).unwrap();
        assert_eq!(pool.capacity(), 6);
        for buffer in &old {
            pool.release(buffer).unwrap();
        }
        assert_eq!(pool.available(), 3);
    }

    #[test]
    fn resize_request_is_consumed_once() {
        let handle = ResizeHandle::new();
        handle.request(10, 10);
        handle.request(20, 30);
        assert!(handle.is_pending());
        assert_eq!(handle.take(), Some((20, 30)));
        assert_eq!(handle.take(), None);
    }
}
