//! Point-sprite particle systems

use std::sync::Arc;

use bevy_ecs::prelude::*;
use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};

use crate::backend::{
    BufferDescriptor, BufferUsage, GraphicsBackend, VertexAttribute, VertexBufferLayout,
    VertexFormat, VertexStepMode,
};
use crate::error::{RenderError, RenderResult};
use crate::resources::Buffer;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: Vec3,
    pub size: f32,
    pub color: Vec4,
}

impl Particle {
    pub fn layout() -> VertexBufferLayout {
        VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as u64,
            step_mode: VertexStepMode::Vertex,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: VertexFormat::Float32x3,
                    offset: 0,
                },
                VertexAttribute {
                    location: 1,
                    format: VertexFormat::Float32,
                    offset: 12,
                },
                VertexAttribute {
                    location: 2,
                    format: VertexFormat::Float32x4,
                    offset: 16,
                },
            ],
        }
    }
}

/// Particles in a point-list vertex buffer of fixed capacity.
pub struct ParticleSystem {
    name: String,
    buffer: Buffer,
    capacity: u32,
    count: u32,
}

impl ParticleSystem {
    pub fn new(
        backend: &Arc<dyn GraphicsBackend>,
        name: &str,
        particles: &[Particle],
    ) -> RenderResult<Self> {
        if particles.is_empty() {
            return Err(RenderError::InvalidParameter(format!(
                "particle system '{}' needs at least one particle",
                name
            )));
        }
        let bytes: &[u8] = bytemuck::cast_slice(particles);
        let buffer = Buffer::with_data(
            backend,
            BufferDescriptor::new(
                format!("{}/particles", name),
                bytes.len() as u64,
                BufferUsage::VERTEX | BufferUsage::COPY_DST,
            ),
            bytes,
        )?;
        Ok(Self {
            name: name.to_string(),
            buffer,
            capacity: particles.len() as u32,
            count: particles.len() as u32,
        })
    }

    /// Replace the simulated particles. Fails if more than the initial count.
    pub fn update(&mut self, particles: &[Particle]) -> RenderResult<()> {
        if particles.len() > self.capacity as usize {
            return Err(RenderError::InvalidParameter(format!(
                "particle system '{}' holds {} particles, got {}",
                self.name,
                self.capacity,
                particles.len()
            )));
        }
        self.buffer.write(0, bytemuck::cast_slice(particles))?;
        self.count = particles.len() as u32;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }
}

impl std::fmt::Debug for ParticleSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParticleSystem")
            .field("name", &self.name)
            .field("count", &self.count)
            .finish()
    }
}

/// Attaches a particle system to an entity.
#[derive(Component, Debug, Clone)]
pub struct ParticleEmitter {
    pub system: Arc<ParticleSystem>,
}

static_assertions::const_assert_eq!(std::mem::size_of::<Particle>(), 32);
