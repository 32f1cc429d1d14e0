//! Backend abstraction layer
//!
//! Provides the [`GraphicsBackend`] trait plus a headless wgpu implementation
//! and a validating dummy implementation used by tests.

pub mod dummy;
pub mod sync;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use dummy::{DummyBackend, RecordedCommand};
pub use sync::{Fence, FenceStatus};
pub use traits::*;
pub use types::*;
