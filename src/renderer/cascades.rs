//! Light-space matrices for shadow maps.

use glam::{Mat4, Vec3};

use crate::scene::Camera;

/// Maximum cascades a directional light can use.
pub const MAX_CASCADES: usize = 4;

const SHADOW_NEAR: f32 = 0.05;

/// Far distance of each cascade, blending logarithmic and uniform splits by
/// `lambda` (0 = uniform, 1 = logarithmic). The last split is always `far`.
pub fn cascade_splits(near: f32, far: f32, count: usize, lambda: f32) -> Vec<f32> {
    let count = count.clamp(1, MAX_CASCADES);
    let lambda = lambda.clamp(0.0, 1.0);
    let near = near.max(f32::EPSILON);
    (1..=count)
        .map(|i| {
            if i == count {
                return far;
            }
            let fraction = i as f32 / count as f32;
            let log = near * (far / near).powf(fraction);
            let uniform = near + (far - near) * fraction;
            lambda * log + (1.0 - lambda) * uniform
        })
        .collect()
}

/// Orthographic light matrices, one per frustum slice between consecutive
/// splits. Each slice is fitted with its bounding sphere so the matrix does
/// not shimmer as the camera rotates.
pub fn cascade_matrices(camera: &Camera, direction: Vec3, splits: &[f32]) -> Vec<Mat4> {
    let direction = direction.normalize_or_zero();
    let direction = if direction == Vec3::ZERO {
        -Vec3::Y
    } else {
        direction
    };
    let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };

    let mut slice_near = camera.near();
    splits
        .iter()
        .map(|&slice_far| {
            let corners = camera.frustum_corners(slice_near, slice_far);
            slice_near = slice_far;

            let center = corners.iter().copied().sum::<Vec3>() / corners.len() as f32;
            let radius = corners
                .iter()
                .map(|corner| corner.distance(center))
                .fold(0.0_f32, f32::max)
                .max(0.01);

            let eye = center - direction * radius * 3.0;
            let view = Mat4::look_at_rh(eye, center, up);
            let projection = Mat4::orthographic_rh(-radius, radius, -radius, radius, 0.0, radius * 6.0);
            projection * view
        })
        .collect()
}

/// Perspective matrix covering a spot light's outer cone.
pub fn spot_matrix(position: Vec3, direction: Vec3, outer_angle: f32, radius: f32) -> Mat4 {
    let direction = direction.normalize_or_zero();
    let up = if direction.y.abs() > 0.99 { Vec3::Z } else { Vec3::Y };
    let fov = (outer_angle * 2.0).clamp(0.01, std::f32::consts::PI - 0.01);
    let projection = Mat4::perspective_rh(fov, 1.0, SHADOW_NEAR, radius.max(SHADOW_NEAR * 2.0));
    projection * Mat4::look_at_rh(position, position + direction, up)
}

/// Six 90° matrices in +X, -X, +Y, -Y, +Z, -Z order.
pub fn point_matrices(position: Vec3, radius: f32) -> [Mat4; 6] {
    let projection = Mat4::perspective_rh(
        std::f32::consts::FRAC_PI_2,
        1.0,
        SHADOW_NEAR,
        radius.max(SHADOW_NEAR * 2.0),
    );
    let faces = [
        (Vec3::X, -Vec3::Y),
        (-Vec3::X, -Vec3::Y),
        (Vec3::Y, Vec3::Z),
        (-Vec3::Y, -Vec3::Z),
        (Vec3::Z, -Vec3::Y),
        (-Vec3::Z, -Vec3::Y),
    ];
    faces.map(|(forward, up)| projection * Mat4::look_at_rh(position, position + forward, up))
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4Swizzles;

    #[test]
    fn splits_increase_and_end_at_far() {
        for lambda in [0.0, 0.5, 1.0] {
            let splits = cascade_splits(0.1, 100.0, 4, lambda);
            assert_eq!(splits.len(), 4);
            assert!(splits.windows(2).all(|pair| pair[0] < pair[1]));
            assert_eq!(*splits.last().unwrap(), 100.0);
            assert!(splits[0] > 0.1);
        }
    }

    #[test]
    fn uniform_splits_are_evenly_spaced() {
        let splits = cascade_splits(0.0, 100.0, 4, 0.0);
        assert!((splits[0] - 25.0).abs() < 1e-3);
        assert!((splits[1] - 50.0).abs() < 1e-3);
    }

    #[test]
    fn cascade_count_is_clamped() {
        assert_eq!(cascade_splits(0.1, 10.0, 9, 0.5).len(), MAX_CASCADES);
        assert_eq!(cascade_splits(0.1, 10.0, 0, 0.5), vec![10.0]);
    }

    #[test]
    fn cascades_contain_their_slice() {
        let camera = Camera::new(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO);
        let splits = cascade_splits(camera.near(), camera.far(), 3, 0.7);
        let matrices = cascade_matrices(&camera, Vec3::new(-0.3, -1.0, -0.2), &splits);
        assert_eq!(matrices.len(), 3);

        let mut near = camera.near();
        for (matrix, far) in matrices.iter().zip(&splits) {
            for corner in camera.frustum_corners(near, *far) {
                let clip = *matrix * corner.extend(1.0);
                let ndc = clip.xyz() / clip.w;
                assert!(ndc.x.abs() <= 1.0 + 1e-3 && ndc.y.abs() <= 1.0 + 1e-3);
                assert!((-1e-3..=1.0 + 1e-3).contains(&ndc.z));
            }
            near = *far;
        }
    }

    #[test]
    fn point_faces_look_along_axes() {
        let matrices = point_matrices(Vec3::ZERO, 10.0);
        let targets = [Vec3::X, -Vec3::X, Vec3::Y, -Vec3::Y, Vec3::Z, -Vec3::Z];
        for (matrix, target) in matrices.iter().zip(targets) {
            let clip = *matrix * (target * 5.0).extend(1.0);
            let ndc = clip.xyz() / clip.w;
            assert!(ndc.x.abs() < 1e-3 && ndc.y.abs() < 1e-3);
            assert!(ndc.z > 0.0 && ndc.z < 1.0);
        }
    }
}
