//! Transform component

use bevy_ecs::prelude::*;
use glam::{Mat3, Mat4, Quat, Vec3};

/// Position, rotation and scale of an entity in world space.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
        }
    }
}

impl Transform {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn with_rotation(mut self, rotation: Quat) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Model matrix.
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Local -Z in world space.
    pub fn forward(&self) -> Vec3 {
        self.rotation * -Vec3::Z
    }

    /// Rotate so that local -Z points at `target`.
    pub fn look_at(mut self, target: Vec3, up: Vec3) -> Self {
        let forward = (target - self.position).normalize_or_zero();
        if forward == Vec3::ZERO {
            return self;
        }
        let right = forward.cross(up).normalize_or_zero();
        if right == Vec3::ZERO {
            return self;
        }
        let up = right.cross(forward);
        self.rotation = Quat::from_mat3(&Mat3::from_cols(right, up, -forward));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn look_at_points_forward_at_target() {
        let transform = Transform::from_position(Vec3::new(0.0, 0.0, 5.0))
            .look_at(Vec3::new(3.0, 0.0, 5.0), Vec3::Y);
        assert!(transform.forward().abs_diff_eq(Vec3::X, 1e-5));
    }

    #[test]
    fn matrix_applies_scale_then_translation() {
        let transform = Transform::from_position(Vec3::new(1.0, 2.0, 3.0)).with_scale(Vec3::splat(2.0));
        let point = transform.matrix().transform_point3(Vec3::ONE);
        assert!(point.abs_diff_eq(Vec3::new(3.0, 4.0, 5.0), 1e-5));
    }
}
