//! Rigid poses and plane homographies.

use nalgebra::{DMatrix, Matrix3, Rotation3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::CameraModelError;

/// Board-to-camera pose of one calibration view.
///
/// `rotation` is a Rodrigues (axis-angle) vector, `translation` is in board
/// units. A board point `p` maps to camera coordinates as `R(rotation)·p + t`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub rotation: Vector3<f64>,
    pub translation: Vector3<f64>,
}

impl Pose {
    pub fn new(rotation: Vector3<f64>, translation: Vector3<f64>) -> Self {
        Pose {
            rotation,
            translation,
        }
    }

    pub fn from_rotation_matrix(rotation: &Matrix3<f64>, translation: Vector3<f64>) -> Self {
        let rotation = Rotation3::from_matrix(rotation).scaled_axis();
        Pose {
            rotation,
            translation,
        }
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        Rotation3::new(self.rotation).into_inner()
    }

    /// Maps a board-frame point into the camera frame.
    pub fn transform(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation_matrix() * point + self.translation
    }

    /// `[rx, ry, rz, tx, ty, tz]`, the layout used by the solver.
    pub fn to_params(&self) -> Vec<f64> {
        vec![
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        ]
    }

    pub fn from_params(params: &[f64]) -> Result<Self, CameraModelError> {
        if params.len() != 6 {
            return Err(CameraModelError::InvalidParams(format!(
                "pose needs 6 parameters, got {}",
                params.len()
            )));
        }
        Ok(Pose {
            rotation: Vector3::new(params[0], params[1], params[2]),
            translation: Vector3::new(params[3], params[4], params[5]),
        })
    }
}

/// Similarity transform that moves the centroid of `points` to the origin and
/// scales their mean distance to √2 (Hartley normalisation).
fn normalization_transform(points: &[Vector2<f64>]) -> Matrix3<f64> {
    let n = points.len() as f64;
    let centroid = points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / n;
    let mean_dist = points.iter().map(|p| (p - centroid).norm()).sum::<f64>() / n;
    let scale = if mean_dist > f64::EPSILON {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    Matrix3::new(
        scale,
        0.0,
        -scale * centroid.x,
        0.0,
        scale,
        -scale * centroid.y,
        0.0,
        0.0,
        1.0,
    )
}

fn apply(transform: &Matrix3<f64>, point: &Vector2<f64>) -> Vector2<f64> {
    let p = transform * Vector3::new(point.x, point.y, 1.0);
    Vector2::new(p.x / p.z, p.y / p.z)
}

/// Estimates the homography `H` with `image ~ H · [world; 1]` by normalised DLT.
///
/// # Errors
///
/// [`CameraModelError::InvalidParams`] for fewer than 4 correspondences or
/// mismatched lengths, [`CameraModelError::NumericalError`] if the SVD fails or
/// the result is degenerate.
pub fn estimate_homography(
    world: &[Vector2<f64>],
    image: &[Vector2<f64>],
) -> Result<Matrix3<f64>, CameraModelError> {
    let n = world.len();
    if n < 4 || image.len() != n {
        return Err(CameraModelError::InvalidParams(format!(
            "homography needs at least 4 matching points, got {} and {}",
            n,
            image.len()
        )));
    }

    let t_world = normalization_transform(world);
    let t_image = normalization_transform(image);

    // At least 9 rows so the thin SVD keeps the full right singular basis.
    let mut a = DMatrix::<f64>::zeros((2 * n).max(9), 9);
    for (i, (pw, pi)) in world.iter().zip(image.iter()).enumerate() {
        let w = apply(&t_world, pw);
        let m = apply(&t_image, pi);
        let (x, y, u, v) = (w.x, w.y, m.x, m.y);

        let r0 = 2 * i;
        let r1 = 2 * i + 1;

        a[(r0, 0)] = -x;
        a[(r0, 1)] = -y;
        a[(r0, 2)] = -1.0;
        a[(r0, 6)] = u * x;
        a[(r0, 7)] = u * y;
        a[(r0, 8)] = u;

        a[(r1, 3)] = -x;
        a[(r1, 4)] = -y;
        a[(r1, 5)] = -1.0;
        a[(r1, 6)] = v * x;
        a[(r1, 7)] = v * y;
        a[(r1, 8)] = v;
    }

    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| CameraModelError::NumericalError("SVD failed".to_string()))?;
    // nalgebra does not sort singular values, so pick the smallest explicitly.
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .fold((0, f64::INFINITY), |best, (i, &s)| {
            if s < best.1 {
                (i, s)
            } else {
                best
            }
        });
    let h = v_t.row(min_idx);

    let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let t_image_inv = t_image.try_inverse().ok_or_else(|| {
        CameraModelError::NumericalError("normalisation is not invertible".to_string())
    })?;
    let mut h_mat = t_image_inv * h_norm * t_world;

    let scale = h_mat[(2, 2)];
    if scale.abs() < f64::EPSILON || !scale.is_finite() {
        return Err(CameraModelError::NumericalError(
            "degenerate homography".to_string(),
        ));
    }
    h_mat /= scale;

    Ok(h_mat)
}

/// Applies a homography to a 2D point.
pub fn apply_homography(h: &Matrix3<f64>, point: &Vector2<f64>) -> Vector2<f64> {
    apply(h, point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pose_params_round_trip() {
        let pose = Pose::new(Vector3::new(0.1, -0.2, 0.3), Vector3::new(1.0, 2.0, 10.0));
        let params = pose.to_params();
        assert_eq!(Pose::from_params(&params).unwrap(), pose);
        assert!(Pose::from_params(&params[..5]).is_err());
    }

    #[test]
    fn test_pose_rotation_matrix_round_trip() {
        let pose = Pose::new(Vector3::new(0.2, 0.1, -0.4), Vector3::new(0.0, 0.0, 5.0));
        let rebuilt = Pose::from_rotation_matrix(&pose.rotation_matrix(), pose.translation);
        assert_relative_eq!(rebuilt.rotation, pose.rotation, epsilon = 1e-12);
    }

    #[test]
    fn test_homography_recovers_projective_map() {
        let h_true = Matrix3::new(420.0, 15.0, 200.0, -8.0, 410.0, 150.0, 0.02, -0.01, 1.0);
        let mut world = Vec::new();
        let mut image = Vec::new();
        for j in 0..5 {
            for i in 0..6 {
                let w = Vector2::new(i as f64, j as f64);
                world.push(w);
                image.push(apply_homography(&h_true, &w));
            }
        }

        let h = estimate_homography(&world, &image).unwrap();
        for (w, m) in world.iter().zip(image.iter()) {
            let p = apply_homography(&h, w);
            assert_relative_eq!(p, *m, epsilon = 1e-6);
        }
        assert_relative_eq!(h, h_true, epsilon = 1e-6);
    }

    #[test]
    fn test_homography_with_four_points() {
        let world = vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(1.0, 1.0),
            Vector2::new(0.0, 1.0),
        ];
        let image: Vec<_> = world.iter().map(|p| p * 2.0).collect();
        let h = estimate_homography(&world, &image).unwrap();
        assert_relative_eq!(h[(0, 0)], 2.0, epsilon = 1e-9);
        assert_relative_eq!(h[(1, 1)], 2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_homography_rejects_too_few_points() {
        let pts = vec![Vector2::new(0.0, 0.0); 3];
        assert!(estimate_homography(&pts, &pts).is_err());
    }
}
