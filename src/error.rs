//! Error types for the renderer.

use crate::backend::{BackendError, ShaderStage, TextureFormat, TextureUsage};
use thiserror::Error;

/// Errors raised by the renderer.
///
/// Configuration errors (unknown uniforms, stage mismatches, unsupported
/// textures) indicate a mismatch between engine code and shader or asset
/// data and are never retried.
#[derive(Error, Debug)]
pub enum RenderError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("uniform '{name}' is not declared by {owner}")]
    UnknownUniform { name: String, owner: String },

    #[error("uniform '{name}' value of {size} bytes exceeds its {slot_size}-byte slot")]
    UniformTooLarge {
        name: String,
        size: usize,
        slot_size: usize,
    },

    #[error("pipeline '{pipeline}' has more than one {stage} stage")]
    DuplicateStage { pipeline: String, stage: ShaderStage },

    #[error("pipeline '{pipeline}' has no {stage} stage")]
    MissingStage { pipeline: String, stage: ShaderStage },

    #[error("texture format {format:?} cannot be used with {usage:?}")]
    UnsupportedTexture {
        format: TextureFormat,
        usage: TextureUsage,
    },

    #[error("texture '{texture}' has no {kind} views")]
    ViewNotGenerated { texture: String, kind: &'static str },

    #[error("{kind} view index ({slice}, {mip}) out of range for texture '{texture}'")]
    ViewIndexOutOfRange {
        texture: String,
        kind: &'static str,
        slice: u32,
        mip: u32,
    },

    #[error("frame buffer {buffer} belongs to pool {owner}, not pool {pool}")]
    ForeignFrameBuffer { buffer: u64, owner: u64, pool: u64 },

    #[error("frame buffer {buffer} is not outstanding from pool {pool}")]
    FrameBufferNotOutstanding { buffer: u64, pool: u64 },

    #[error("no pipeline is active on this render context")]
    NoActivePipeline,

    #[error("resource '{name}' is not declared by pipeline '{pipeline}'")]
    UnknownResource { name: String, pipeline: String },

    #[error("shader reflection failed: {0}")]
    Reflection(String),

    #[error("invalid shader: {0}")]
    InvalidShader(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type RenderResult<T> = Result<T, RenderError>;

impl RenderError {
    /// Fence timeouts are the only recoverable failure; everything else is a
    /// configuration or lifecycle error.
    pub fn is_fence_timeout(&self) -> bool {
        matches!(self, RenderError::Backend(BackendError::FenceTimeout(_)))
    }
}
