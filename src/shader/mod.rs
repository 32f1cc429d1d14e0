//! Shader blobs, reflection and the uniform binding layer.
//!
//! A [`CompiledShader`] is reflected once into a [`ShaderReflection`]; a
//! [`ShaderStageUnit`] turns that reflection into GPU constant buffers whose
//! members are addressed by flattened name.

pub mod layout;
pub mod reflection;
pub mod uniform;
mod unit;

pub use layout::{BufferLayout, FlatVariable, LayoutType, MemberLayout, ARRAY_STRIDE_ALIGNMENT};
pub use reflection::{InputElement, ResourceKind, ResourceSlot, ShaderReflection};
pub use uniform::{ConstantBuffer, UniformValue, UniformVariable};
pub use unit::ShaderStageUnit;

use crate::backend::{ShaderCode, ShaderStage};
use crate::error::{RenderError, RenderResult};

const SPIRV_MAGIC: u32 = 0x0723_0203;

/// An immutable shader blob tagged with its stage and entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledShader {
    label: String,
    stage: ShaderStage,
    entry_point: String,
    code: ShaderCode,
}

impl CompiledShader {
    pub fn from_wgsl(
        label: impl Into<String>,
        stage: ShaderStage,
        entry_point: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            stage,
            entry_point: entry_point.into(),
            code: ShaderCode::Wgsl(source.into()),
        }
    }

    /// Wrap a SPIR-V binary. Either byte order is accepted.
    pub fn from_spirv(
        label: impl Into<String>,
        stage: ShaderStage,
        entry_point: impl Into<String>,
        bytes: &[u8],
    ) -> RenderResult<Self> {
        let label = label.into();
        if bytes.len() % 4 != 0 || bytes.len() < 20 {
            return Err(RenderError::InvalidShader(format!(
                "{}: SPIR-V blob of {} bytes is not a whole module",
                label,
                bytes.len()
            )));
        }
        let mut words: Vec<u32> = bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if words[0] == SPIRV_MAGIC.swap_bytes() {
            words.iter_mut().for_each(|w| *w = w.swap_bytes());
        }
        if words[0] != SPIRV_MAGIC {
            return Err(RenderError::InvalidShader(format!(
                "{}: missing SPIR-V magic number",
                label
            )));
        }
        Ok(Self {
            label,
            stage,
            entry_point: entry_point.into(),
            code: ShaderCode::SpirV(words),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    pub fn code(&self) -> &ShaderCode {
        &self.code
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spirv_rejects_truncated_blob() {
        let result = CompiledShader::from_spirv("bad", ShaderStage::Vertex, "main", &[1, 2, 3]);
        assert!(matches!(result, Err(RenderError::InvalidShader(_))));
    }

    #[test]
    fn spirv_accepts_both_byte_orders() {
        let mut header = Vec::new();
        for word in [SPIRV_MAGIC, 0x0001_0000, 0, 1, 0] {
            header.extend_from_slice(&word.to_be_bytes());
        }
        let shader =
            CompiledShader::from_spirv("be", ShaderStage::Fragment, "main", &header).unwrap();
        match shader.code() {
            ShaderCode::SpirV(words) => assert_eq!(words[0], SPIRV_MAGIC),
            other => panic!("unexpected code {:?}", other),
        }
    }

    #[test]
    fn spirv_rejects_missing_magic() {
        let result = CompiledShader::from_spirv("zero", ShaderStage::Vertex, "main", &[0; 20]);
        assert!(result.is_err());
    }
}
