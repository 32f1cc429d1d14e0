//! Light components and their render-side form

use bevy_ecs::prelude::*;
use glam::Vec3;

/// Point light component. Position comes from the entity's `Transform`.
#[derive(Component, Debug, Clone)]
pub struct PointLight {
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
    pub enabled: bool,
    /// Cube face resolution, or `None` for an unshadowed light.
    pub shadow_resolution: Option<u32>,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 10.0,
            enabled: true,
            shadow_resolution: None,
        }
    }
}

/// Spot light component. Position comes from the entity's `Transform`.
#[derive(Component, Debug, Clone)]
pub struct SpotLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub radius: f32,
    /// Full-intensity cone half-angle in radians.
    pub inner_angle: f32,
    /// Cutoff cone half-angle in radians.
    pub outer_angle: f32,
    pub enabled: bool,
    pub shadow_resolution: Option<u32>,
}

impl Default for SpotLight {
    fn default() -> Self {
        Self {
            direction: -Vec3::Y,
            color: Vec3::ONE,
            intensity: 1.0,
            radius: 10.0,
            inner_angle: 0.3,
            outer_angle: 0.5,
            enabled: true,
            shadow_resolution: None,
        }
    }
}

/// Directional light component (like the sun)
#[derive(Component, Debug, Clone)]
pub struct DirectionalLight {
    pub direction: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub enabled: bool,
    /// Per-cascade resolution.
    pub shadow_resolution: Option<u32>,
}

impl Default for DirectionalLight {
    fn default() -> Self {
        Self {
            direction: Vec3::new(-0.5, -1.0, -0.5).normalize(),
            color: Vec3::ONE,
            intensity: 1.0,
            enabled: true,
            shadow_resolution: None,
        }
    }
}

#[derive(Component, Debug, Clone)]
pub struct AmbientLight {
    pub color: Vec3,
    pub intensity: f32,
    pub enabled: bool,
}

impl Default for AmbientLight {
    fn default() -> Self {
        Self {
            color: Vec3::ONE,
            intensity: 0.03,
            enabled: true,
        }
    }
}

/// Shape of a light as the lighting pass sees it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LightKind {
    Point {
        position: Vec3,
        radius: f32,
    },
    Spot {
        position: Vec3,
        direction: Vec3,
        radius: f32,
        inner_angle: f32,
        outer_angle: f32,
    },
    Directional {
        direction: Vec3,
    },
    Ambient,
}

impl LightKind {
    pub fn name(&self) -> &'static str {
        match self {
            LightKind::Point { .. } => "point",
            LightKind::Spot { .. } => "spot",
            LightKind::Directional { .. } => "directional",
            LightKind::Ambient => "ambient",
        }
    }
}

/// A light in a [`SceneFrame`](super::SceneFrame).
///
/// `id` identifies the light across frames; shadow maps are cached by it.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub id: u64,
    pub kind: LightKind,
    pub color: Vec3,
    pub intensity: f32,
    pub enabled: bool,
    pub shadow_resolution: Option<u32>,
}

impl Light {
    pub fn point(id: u64, position: Vec3, light: &PointLight) -> Self {
        Self {
            id,
            kind: LightKind::Point {
                position,
                radius: light.radius,
            },
            color: light.color,
            intensity: light.intensity,
            enabled: light.enabled,
            shadow_resolution: light.shadow_resolution,
        }
    }

    pub fn spot(id: u64, position: Vec3, light: &SpotLight) -> Self {
        Self {
            id,
            kind: LightKind::Spot {
                position,
                direction: light.direction.normalize_or_zero(),
                radius: light.radius,
                inner_angle: light.inner_angle,
                outer_angle: light.outer_angle.max(light.inner_angle),
            },
            color: light.color,
            intensity: light.intensity,
            enabled: light.enabled,
            shadow_resolution: light.shadow_resolution,
        }
    }

    pub fn directional(id: u64, light: &DirectionalLight) -> Self {
        Self {
            id,
            kind: LightKind::Directional {
                direction: light.direction.normalize_or_zero(),
            },
            color: light.color,
            intensity: light.intensity,
            enabled: light.enabled,
            shadow_resolution: light.shadow_resolution,
        }
    }

    pub fn ambient(id: u64, light: &AmbientLight) -> Self {
        Self {
            id,
            kind: LightKind::Ambient,
            color: light.color,
            intensity: light.intensity,
            enabled: light.enabled,
            shadow_resolution: None,
        }
    }

    /// Whether the shadow pass renders a map for this light.
    pub fn casts_shadows(&self) -> bool {
        self.enabled && self.shadow_resolution.is_some() && !matches!(self.kind, LightKind::Ambient)
    }
}
