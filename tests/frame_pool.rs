//! Frame buffer pool and triple-buffer hand-off tests.

mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rstest::rstest;

use common::Backend;
use deferred_renderer::backend::{DummyBackend, GraphicsBackend, TextureFormat};
use deferred_renderer::frame::{FrameBufferPool, FrameSlots};
use deferred_renderer::RenderError;

fn pool(backend: &Arc<dyn GraphicsBackend>, capacity: usize) -> FrameBufferPool {
    FrameBufferPool::new(backend, capacity, 64, 64, TextureFormat::Rgba8Unorm).unwrap()
}

// ============================================================================
// Pool
// ============================================================================

#[rstest]
#[case::dummy(Backend::Dummy)]
#[case::wgpu(Backend::Wgpu)]
fn exhausted_pool_doubles(#[case] backend: Backend) {
    let Some(backend) = backend.create() else {
        return;
    };
    let mut pool = pool(&backend, 2);
    let a = pool.get().unwrap();
    let b = pool.get().unwrap();
    assert_eq!(pool.capacity(), 2);
    let c = pool.get().unwrap();
    assert_eq!(pool.capacity(), 4);
    assert_eq!(pool.outstanding(), 3);

    let ids: HashSet<u64> = [&a, &b, &c].iter().map(|buffer| buffer.id()).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!((c.width(), c.height()), (64, 64));
}

#[rstest]
#[case(1, 1)]
#[case(3, 3)]
#[case(2, 5)]
fn gets_never_hand_out_outstanding_buffers(#[case] capacity: usize, #[case] gets: usize) {
    let backend = Backend::Dummy.create().unwrap();
    let mut pool = pool(&backend, capacity);
    let buffers: Vec<_> = (0..gets).map(|_| pool.get().unwrap()).collect();
    let ids: HashSet<u64> = buffers.iter().map(|buffer| buffer.id()).collect();
    assert_eq!(ids.len(), gets);
    assert!(pool.capacity() >= gets);
    assert_eq!(pool.outstanding(), gets);
}

#[test]
fn released_buffer_is_reused() {
    let backend = Backend::Dummy.create().unwrap();
    let mut pool = pool(&backend, 1);
    let first = pool.get().unwrap();
    let id = first.id();
    pool.release(&first).unwrap();
    assert_eq!(pool.available(), 1);
    assert_eq!(pool.get().unwrap().id(), id);
    assert_eq!(pool.capacity(), 1);
}

#[test]
fn foreign_release_fails() {
    let backend = Backend::Dummy.create().unwrap();
    let mut first = pool(&backend, 1);
    let mut second = pool(&backend, 1);
    let buffer = first.get().unwrap();
    assert!(matches!(
        second.release(&buffer),
        Err(RenderError::ForeignFrameBuffer { .. })
    ));
    first.release(&buffer).unwrap();
    assert!(matches!(
        first.release(&buffer),
        Err(RenderError::FrameBufferNotOutstanding { .. })
    ));
}

// ============================================================================
// Hand-off
// ============================================================================

#[test]
fn presenter_sees_increasing_fresh_frames() {
    let dummy = Arc::new(DummyBackend::new());
    let backend: Arc<dyn GraphicsBackend> = dummy.clone();
    let mut pool = pool(&backend, 3);
    let mut slots = FrameSlots::new(&mut pool).unwrap();
    let presenter = slots.presenter();
    let done = Arc::new(AtomicBool::new(false));

    let presentation = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let mut last = 0;
            let mut fresh_frames = 0;
            loop {
                let finished = done.load(Ordering::Acquire);
                let frame = presenter.next_front_buffer();
                if frame.fresh {
                    assert!(frame.frame_number > last);
                    last = frame.frame_number;
                    fresh_frames += 1;
                } else {
                    assert_eq!(frame.frame_number, last);
                }
                assert_eq!(frame.handle, frame.frame_buffer.presentation_handle());
                if finished {
                    return (last, fresh_frames);
                }
                thread::sleep(Duration::from_micros(50));
            }
        })
    };

    for expected in 1..=200 {
        let published = slots.flush_and_swap(backend.as_ref(), None).unwrap();
        assert_eq!(published, expected);
    }
    done.store(true, Ordering::Release);

    let (last, fresh_frames) = presentation.join().unwrap();
    assert_eq!(last, 200);
    assert!(fresh_frames >= 1);
    assert!(fresh_frames <= 200);
}

#[test]
fn back_buffer_never_shared_with_presenter() {
    let backend = Backend::Dummy.create().unwrap();
    let mut pool = pool(&backend, 3);
    let mut slots = FrameSlots::new(&mut pool).unwrap();
    let presenter = slots.presenter();
    for _ in 0..10 {
        slots.flush_and_swap(backend.as_ref(), None).unwrap();
        let front = presenter.next_front_buffer();
        assert_ne!(front.frame_buffer.id(), slots.back().id());
    }
}
