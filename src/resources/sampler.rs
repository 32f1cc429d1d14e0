//! Texture samplers released on drop.

use std::sync::Arc;

use crate::backend::{GraphicsBackend, SamplerDescriptor, SamplerHandle};
use crate::error::RenderResult;

pub struct Sampler {
    backend: Arc<dyn GraphicsBackend>,
    handle: SamplerHandle,
    comparison: bool,
}

impl Sampler {
    pub fn new(backend: &Arc<dyn GraphicsBackend>, desc: &SamplerDescriptor) -> RenderResult<Self> {
        let handle = backend.create_sampler(desc)?;
        Ok(Self {
            backend: Arc::clone(backend),
            handle,
            comparison: desc.compare.is_some(),
        })
    }

    pub fn handle(&self) -> SamplerHandle {
        self.handle
    }

    pub fn is_comparison(&self) -> bool {
        self.comparison
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        self.backend.destroy_sampler(self.handle);
    }
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("handle", &self.handle)
            .field("comparison", &self.comparison)
            .finish()
    }
}
