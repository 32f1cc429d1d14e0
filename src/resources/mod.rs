//! GPU resources owned by the renderer
//!
//! Every type here holds the backend and releases its handles on drop.

mod buffer;
mod material;
mod mesh;
mod sampler;
mod texture;
mod view;

pub use buffer::Buffer;
pub use material::{Material, MaterialSlot};
pub use mesh::{GpuMesh, Mesh};
pub use sampler::Sampler;
pub use texture::{Texture, TextureData};
pub use view::{
    DepthStencil, RenderTarget, ResourceViewCollection, ShaderResource, TextureView, ViewKind,
    ViewKindId,
};
