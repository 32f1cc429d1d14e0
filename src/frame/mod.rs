//! Frame buffers, their pool and the triple-buffered swap chain

mod exchange;
mod frame_buffer;
mod pool;

pub use exchange::{FramePresenter, FrameSlots, PresentedFrame, ResizeHandle};
pub use frame_buffer::{FrameBuffer, PresentationHandle};
pub use pool::FrameBufferPool;
