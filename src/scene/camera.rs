//! Camera system

use bevy_ecs::prelude::*;
use glam::{Mat4, Vec3};

/// Camera projection type
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    Perspective {
        fov_y: f32,
        aspect: f32,
        near: f32,
        far: f32,
    },
    Orthographic {
        half_width: f32,
        half_height: f32,
        near: f32,
        far: f32,
    },
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Perspective {
            fov_y: std::f32::consts::FRAC_PI_4,
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Projection {
    pub fn perspective(fov_y_degrees: f32, aspect: f32, near: f32, far: f32) -> Self {
        Projection::Perspective {
            fov_y: fov_y_degrees.to_radians(),
            aspect,
            near,
            far,
        }
    }

    pub fn orthographic(width: f32, height: f32, near: f32, far: f32) -> Self {
        Projection::Orthographic {
            half_width: width / 2.0,
            half_height: height / 2.0,
            near,
            far,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix_between(self.near(), self.far())
    }

    /// Same projection clipped to `[near, far]`.
    pub fn matrix_between(&self, near: f32, far: f32) -> Mat4 {
        match *self {
            Projection::Perspective { fov_y, aspect, .. } => {
                Mat4::perspective_rh(fov_y, aspect, near, far)
            }
            Projection::Orthographic {
                half_width,
                half_height,
                ..
            } => Mat4::orthographic_rh(-half_width, half_width, -half_height, half_height, near, far),
        }
    }

    pub fn near(&self) -> f32 {
        match *self {
            Projection::Perspective { near, .. } | Projection::Orthographic { near, .. } => near,
        }
    }

    pub fn far(&self) -> f32 {
        match *self {
            Projection::Perspective { far, .. } | Projection::Orthographic { far, .. } => far,
        }
    }

    pub fn set_aspect(&mut self, aspect: f32) {
        if let Projection::Perspective { aspect: a, .. } = self {
            *a = aspect;
        }
    }
}

/// Camera for viewing the scene
#[derive(Component, Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub projection: Projection,
}

/// Marks the camera to render from when a world holds several.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct ActiveCamera;

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 2.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            projection: Projection::default(),
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, target: Vec3) -> Self {
        Self {
            position,
            target,
            ..Default::default()
        }
    }

    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = projection;
        self
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    pub fn projection_matrix(&self) -> Mat4 {
        self.projection.matrix()
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    pub fn near(&self) -> f32 {
        self.projection.near()
    }

    pub fn far(&self) -> f32 {
        self.projection.far()
    }

    pub fn set_aspect(&mut self, width: f32, height: f32) {
        if height > 0.0 {
            self.projection.set_aspect(width / height);
        }
    }

    /// World-space corners of the view frustum between two view depths.
    pub fn frustum_corners(&self, near: f32, far: f32) -> [Vec3; 8] {
        let inverse = (self.projection.matrix_between(near, far) * self.view_matrix()).inverse();
        let mut corners = [Vec3::ZERO; 8];
        let mut i = 0;
        // wgpu clip space: x, y in [-1, 1], z in [0, 1].
        for z in [0.0, 1.0] {
            for y in [-1.0, 1.0] {
                for x in [-1.0, 1.0] {
                    corners[i] = inverse.project_point3(Vec3::new(x, y, z));
                    i += 1;
                }
            }
        }
        corners
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frustum_slice_corners_lie_at_requested_depths() {
        let camera = Camera::new(Vec3::ZERO, -Vec3::Z);
        let corners = camera.frustum_corners(1.0, 10.0);
        for near in &corners[..4] {
            assert!((near.z + 1.0).abs() < 1e-3);
        }
        for far in &corners[4..] {
            assert!((far.z + 10.0).abs() < 1e-2);
        }
    }
}
