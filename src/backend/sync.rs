//! CPU-GPU synchronization primitives.

use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

static NEXT_FENCE_ID: AtomicU64 = AtomicU64::new(1);

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

#[derive(Debug)]
struct FenceState {
    signaled: Mutex<bool>,
    condvar: Condvar,
}

/// CPU-GPU synchronization primitive.
///
/// A fence is inserted after submitted work and signaled by the backend once
/// the GPU has finished everything submitted before it. Clones share state,
/// so the backend can keep one clone to signal while the caller waits on
/// another.
#[derive(Debug, Clone)]
pub struct Fence {
    id: u64,
    state: Arc<FenceState>,
}

impl Fence {
    /// Create a new fence in the unsignaled state.
    pub(crate) fn new_unsignaled() -> Self {
        Self {
            id: NEXT_FENCE_ID.fetch_add(1, Ordering::Relaxed),
            state: Arc::new(FenceState {
                signaled: Mutex::new(false),
                condvar: Condvar::new(),
            }),
        }
    }

    /// Create a new fence in the signaled state.
    #[cfg(test)]
    pub(crate) fn new_signaled() -> Self {
        let fence = Self::new_unsignaled();
        fence.signal();
        fence
    }

    /// Unique ID, for logging.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Check the current status of the fence.
    pub fn status(&self) -> FenceStatus {
        if *self.state.signaled.lock() {
            FenceStatus::Signaled
        } else {
            FenceStatus::Unsignaled
        }
    }

    /// Check if the fence is signaled (non-blocking).
    pub fn is_signaled(&self) -> bool {
        self.status() == FenceStatus::Signaled
    }

    /// Block until the fence is signaled.
    pub fn wait(&self) {
        let mut signaled = self.state.signaled.lock();
        while !*signaled {
            self.state.condvar.wait(&mut signaled);
        }
    }

    /// Wait for the fence with a timeout.
    ///
    /// Returns `true` if the fence was signaled, `false` if timeout elapsed.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut signaled = self.state.signaled.lock();
        while !*signaled {
            if self
                .state
                .condvar
                .wait_until(&mut signaled, deadline)
                .timed_out()
            {
                return *signaled;
            }
        }
        true
    }

    /// Signal the fence and wake every waiter.
    pub(crate) fn signal(&self) {
        let mut signaled = self.state.signaled.lock();
        *signaled = true;
        self.state.condvar.notify_all();
    }

    /// Reset the fence to unsignaled.
    pub fn reset(&self) {
        *self.state.signaled.lock() = false;
    }
}

static_assertions::assert_impl_all!(Fence: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_fence_unsignaled() {
        let fence = Fence::new_unsignaled();
        assert_eq!(fence.status(), FenceStatus::Unsignaled);
        assert!(!fence.is_signaled());
    }

    #[test]
    fn test_fence_signaled() {
        let fence = Fence::new_signaled();
        assert_eq!(fence.status(), FenceStatus::Signaled);
        fence.wait();
    }

    #[test]
    fn test_fence_reset() {
        let fence = Fence::new_signaled();
        fence.reset();
        assert!(!fence.is_signaled());
    }

    #[test]
    fn test_fence_wait_timeout_elapses() {
        let fence = Fence::new_unsignaled();
        assert!(!fence.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_fence_signaled_from_other_thread() {
        let fence = Fence::new_unsignaled();
        let signaler = fence.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(5));
            signaler.signal();
        });
        assert!(fence.wait_timeout(Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_fence_ids_unique() {
        let a = Fence::new_unsignaled();
        let b = Fence::new_unsignaled();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.clone().id(), a.id());
    }
}
