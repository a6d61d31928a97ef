//! Closed-form initialisation of the planar calibration.
//!
//! * [`estimate_intrinsics`] follows Zhang's method: each view's homography
//!   gives two linear constraints on the image of the absolute conic `B`, from
//!   which the intrinsic matrix is recovered. With fewer than three views, or
//!   when the closed form is degenerate, the principal point is fixed at the
//!   image centre and only the focal lengths are solved for.
//! * [`pose_from_homography`] decomposes `K⁻¹·H` into a rotation and a
//!   translation.

use log::debug;
use nalgebra::{DMatrix, DVector, Matrix3, Vector3, Vector6};

use crate::camera::{validation, CameraModelError, Intrinsics, Resolution};
use crate::geometry::Pose;

/// Pixel-normalising transform: image centre to the origin, longest side to 2.
fn conditioning(resolution: &Resolution) -> Matrix3<f64> {
    let w = resolution.width as f64;
    let h = resolution.height as f64;
    let s = 2.0 / w.max(h).max(1.0);
    Matrix3::new(s, 0.0, -s * w / 2.0, 0.0, s, -s * h / 2.0, 0.0, 0.0, 1.0)
}

/// `v_ij` row of Zhang's system for homography `h`.
fn zhang_row(h: &Matrix3<f64>, i: usize, j: usize) -> Vector6<f64> {
    let hi = h.column(i);
    let hj = h.column(j);
    Vector6::new(
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    )
}

fn smallest_right_singular_vector(a: DMatrix<f64>) -> Result<DVector<f64>, CameraModelError> {
    let cols = a.ncols();
    // Pad so the thin SVD keeps a full right basis.
    let a = if a.nrows() < cols {
        a.resize_vertically(cols, 0.0)
    } else {
        a
    };
    let svd = a.svd(false, true);
    let v_t = svd
        .v_t
        .ok_or_else(|| CameraModelError::NumericalError("SVD failed".to_string()))?;
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
    Ok(v_t.row(min_idx).transpose())
}

/// Zhang's closed-form intrinsics from three or more homographies.
pub fn zhang_intrinsics(
    homographies: &[Matrix3<f64>],
    resolution: &Resolution,
) -> Result<Intrinsics, CameraModelError> {
    if homographies.len() < 3 {
        return Err(CameraModelError::InvalidParams(format!(
            "closed-form intrinsics need at least 3 views, got {}",
            homographies.len()
        )));
    }

    let n = conditioning(resolution);
    let mut v = DMatrix::<f64>::zeros(2 * homographies.len(), 6);
    for (k, h) in homographies.iter().enumerate() {
        let h = n * h;
        let v12 = zhang_row(&h, 0, 1);
        let v11 = zhang_row(&h, 0, 0);
        let v22 = zhang_row(&h, 1, 1);
        v.row_mut(2 * k).copy_from(&v12.transpose());
        v.row_mut(2 * k + 1).copy_from(&(v11 - v22).transpose());
    }

    let b = smallest_right_singular_vector(v)?;
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if denom.abs() < f64::EPSILON || b11.abs() < f64::EPSILON {
        return Err(CameraModelError::NumericalError(
            "degenerate absolute conic".to_string(),
        ));
    }
    let v0 = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + v0 * (b12 * b13 - b11 * b23)) / b11;
    let alpha = (lambda / b11).sqrt();
    let beta = (lambda * b11 / denom).sqrt();
    let gamma = -b12 * alpha * alpha * beta / lambda;
    let u0 = gamma * v0 / beta - b13 * alpha * alpha / lambda;

    let k_conditioned = Matrix3::new(alpha, 0.0, u0, 0.0, beta, v0, 0.0, 0.0, 1.0);
    let n_inv = n.try_inverse().ok_or_else(|| {
        CameraModelError::NumericalError("conditioning is not invertible".to_string())
    })?;
    let intrinsics = Intrinsics::from_matrix(&(n_inv * k_conditioned));
    validation::validate_intrinsics(&intrinsics)?;
    Ok(intrinsics)
}

/// Focal lengths from the orthogonality of each homography's first two
/// columns and of their sum and difference, with the principal point at the
/// image centre.
pub fn centered_intrinsics(
    homographies: &[Matrix3<f64>],
    resolution: &Resolution,
) -> Result<Intrinsics, CameraModelError> {
    if homographies.is_empty() {
        return Err(CameraModelError::InvalidParams(
            "no homographies to initialise from".to_string(),
        ));
    }

    let cx = (resolution.width as f64 - 1.0) * 0.5;
    let cy = (resolution.height as f64 - 1.0) * 0.5;
    let recenter = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);

    let mut a = DMatrix::<f64>::zeros(2 * homographies.len(), 2);
    let mut rhs = DVector::<f64>::zeros(2 * homographies.len());
    for (k, h) in homographies.iter().enumerate() {
        let h = recenter * h;
        let c0: Vector3<f64> = h.column(0).into_owned();
        let c1: Vector3<f64> = h.column(1).into_owned();
        let d1 = (c0 + c1) * 0.5;
        let d2 = (c0 - c1) * 0.5;

        let pairs = [(c0, c1), (d1, d2)];
        for (row, (p, q)) in pairs.iter().enumerate() {
            let p = p.normalize();
            let q = q.normalize();
            a[(2 * k + row, 0)] = p.x * q.x;
            a[(2 * k + row, 1)] = p.y * q.y;
            rhs[2 * k + row] = -p.z * q.z;
        }
    }

    let svd = a.svd(true, true);
    let f = svd
        .solve(&rhs, 1e-12)
        .map_err(|e| CameraModelError::NumericalError(e.to_string()))?;

    let intrinsics = Intrinsics {
        fx: (1.0 / f[0].abs()).sqrt(),
        fy: (1.0 / f[1].abs()).sqrt(),
        cx,
        cy,
    };
    validation::validate_intrinsics(&intrinsics)?;
    Ok(intrinsics)
}

/// Initial intrinsics: Zhang's closed form when possible, the centred
/// estimate otherwise.
pub fn estimate_intrinsics(
    homographies: &[Matrix3<f64>],
    resolution: &Resolution,
) -> Result<Intrinsics, CameraModelError> {
    if homographies.len() >= 3 {
        match zhang_intrinsics(homographies, resolution) {
            Ok(intrinsics) => return Ok(intrinsics),
            Err(e) => debug!("closed-form intrinsics rejected ({e}), centring the principal point"),
        }
    }
    centered_intrinsics(homographies, resolution)
}

/// Board-to-camera pose from a board homography and the intrinsics.
///
/// The rotation is re-orthonormalised with an SVD and the translation is kept
/// in front of the camera.
pub fn pose_from_homography(
    intrinsics: &Intrinsics,
    homography: &Matrix3<f64>,
) -> Result<Pose, CameraModelError> {
    let k_inv = intrinsics.to_matrix().try_inverse().ok_or_else(|| {
        CameraModelError::NumericalError("intrinsic matrix is singular".to_string())
    })?;
    let m = k_inv * homography;
    let c0: Vector3<f64> = m.column(0).into_owned();
    let c1: Vector3<f64> = m.column(1).into_owned();
    let c2: Vector3<f64> = m.column(2).into_owned();

    let norm = (c0.norm() + c1.norm()) * 0.5;
    if norm < f64::EPSILON {
        return Err(CameraModelError::NumericalError(
            "degenerate homography for pose".to_string(),
        ));
    }
    let mut scale = 1.0 / norm;
    if (c2 * scale).z < 0.0 {
        scale = -scale;
    }

    let r0 = c0 * scale;
    let r1 = c1 * scale;
    let r2 = r0.cross(&r1);
    let translation = c2 * scale;

    let approx = Matrix3::from_columns(&[r0, r1, r2]);
    let svd = approx.svd(true, true);
    let (u, v_t) = match (svd.u, svd.v_t) {
        (Some(u), Some(v_t)) => (u, v_t),
        _ => {
            return Err(CameraModelError::NumericalError(
                "SVD failed while orthonormalising rotation".to_string(),
            ))
        }
    };
    let mut rotation = u * v_t;
    if rotation.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        rotation = u * v_t;
    }

    Ok(Pose::from_rotation_matrix(&rotation, translation))
}
