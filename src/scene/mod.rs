//! Scene description consumed by the renderer
//!
//! A [`SceneFrame`] is a flat snapshot of what to draw this frame. Build one
//! by hand or extract it from a `bevy_ecs` world with [`extract_scene`].

mod camera;
mod extract;
mod light;
mod particles;
mod transform;

pub use camera::{ActiveCamera, Camera, Projection};
pub use extract::extract_scene;
pub use light::{AmbientLight, DirectionalLight, Light, LightKind, PointLight, SpotLight};
pub use particles::{Particle, ParticleEmitter, ParticleSystem};
pub use transform::Transform;

use std::sync::Arc;

use bevy_ecs::prelude::*;
use glam::Mat4;

use crate::resources::{GpuMesh, Material};

/// Mesh and material of a drawable entity.
#[derive(Component, Debug, Clone)]
pub struct MeshRenderer {
    pub mesh: Arc<GpuMesh>,
    pub material: Arc<Material>,
    /// Disabled renderers stay attached but are skipped by extraction.
    pub enabled: bool,
}

impl MeshRenderer {
    pub fn new(mesh: Arc<GpuMesh>, material: Arc<Material>) -> Self {
        Self {
            mesh,
            material,
            enabled: true,
        }
    }
}

/// One mesh instance to draw.
#[derive(Debug, Clone)]
pub struct Drawable {
    pub world: Mat4,
    pub mesh: Arc<GpuMesh>,
    pub material: Arc<Material>,
}

/// Everything the renderer draws in one frame.
#[derive(Debug, Clone, Default)]
pub struct SceneFrame {
    pub camera: Option<Camera>,
    pub drawables: Vec<Drawable>,
    pub lights: Vec<Light>,
    pub particles: Vec<Arc<ParticleSystem>>,
}

impl SceneFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_camera(mut self, camera: Camera) -> Self {
        self.camera = Some(camera);
        self
    }

    pub fn add_drawable(&mut self, world: Mat4, mesh: Arc<GpuMesh>, material: Arc<Material>) {
        self.drawables.push(Drawable {
            world,
            mesh,
            material,
        });
    }

    pub fn add_light(&mut self, light: Light) {
        self.lights.push(light);
    }

    pub fn add_particles(&mut self, system: Arc<ParticleSystem>) {
        self.particles.push(system);
    }

    pub fn enabled_lights(&self) -> impl Iterator<Item = &Light> {
        self.lights.iter().filter(|light| light.enabled)
    }

    pub fn shadow_casters(&self) -> impl Iterator<Item = &Light> {
        self.lights.iter().filter(|light| light.casts_shadows())
    }
}
