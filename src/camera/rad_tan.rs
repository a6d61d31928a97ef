//! Implements the Radial-Tangential (RadTan) camera model.
//!
//! This is the model produced by the checkerboard calibration: a pinhole camera
//! with the five-coefficient Brown–Conrady lens distortion `[k1, k2, p1, p2, k3]`.
//! It adheres to the [`CameraModel`] trait defined in the parent `camera`
//! module ([`crate::camera`]).

use crate::camera::{validation, CameraModel, CameraModelError, Intrinsics, Resolution};
use nalgebra::{DVector, Matrix2, Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a Radial-Tangential (RadTan) camera model.
///
/// The distortion coefficients are typically denoted as:
/// *   `k1`, `k2`, `k3`: Radial distortion coefficients.
/// *   `p1`, `p2`: Tangential distortion coefficients.
///
/// # Examples
///
/// ```rust
/// use nalgebra::DVector;
/// use checkerboard_calib::camera::rad_tan::RadTanModel;
/// use checkerboard_calib::camera::Resolution;
///
/// // Parameters: fx, fy, cx, cy, k1, k2, p1, p2, k3
/// let params = DVector::from_vec(vec![
///     500.0, 500.0, 320.0, 240.0,
///     0.1, -0.05, 0.001, 0.001, 0.02,
/// ]);
/// let mut model = RadTanModel::new(&params).unwrap();
/// model.resolution = Resolution { width: 640, height: 480 };
///
/// assert_eq!(model.intrinsics.fx, 500.0);
/// assert_eq!(model.distortions[0], 0.1); // k1
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RadTanModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (fx, fy, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    pub resolution: Resolution,
    /// The 5 distortion coefficients: `[k1, k2, p1, p2, k3]`.
    pub distortions: [f64; 5],
}

impl RadTanModel {
    /// Creates a new [`RadTanModel`] from `[fx, fy, cx, cy, k1, k2, p1, p2, k3]`.
    ///
    /// The resolution is initialized to 0x0 and should be set by the caller.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::InvalidParams`] if fewer than 9 parameters are given.
    /// * Errors from `validate_params` for non-positive focal lengths or a
    ///   non-finite principal point.
    pub fn new(parameters: &DVector<f64>) -> Result<Self, CameraModelError> {
        if parameters.len() < 9 {
            return Err(CameraModelError::InvalidParams(format!(
                "RadTan model needs 9 parameters, got {}",
                parameters.len()
            )));
        }
        let model = RadTanModel {
            intrinsics: Intrinsics {
                fx: parameters[0],
                fy: parameters[1],
                cx: parameters[2],
                cy: parameters[3],
            },
            resolution: Resolution {
                width: 0,
                height: 0,
            },
            distortions: [
                parameters[4],
                parameters[5],
                parameters[6],
                parameters[7],
                parameters[8],
            ],
        };

        model.validate_params()?;
        Ok(model)
    }

    /// Builds a model from its parts without validation.
    pub fn from_parts(
        intrinsics: Intrinsics,
        resolution: Resolution,
        distortions: [f64; 5],
    ) -> Self {
        RadTanModel {
            intrinsics,
            resolution,
            distortions,
        }
    }

    /// The 3×3 intrinsic ("camera") matrix.
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        self.intrinsics.to_matrix()
    }

    /// Applies lens distortion to a point on the normalized image plane.
    pub fn distort_normalized(&self, point: &Vector2<f64>) -> Vector2<f64> {
        let [k1, k2, p1, p2, k3] = self.distortions;
        let x = point.x;
        let y = point.y;

        let r2 = x * x + y * y;
        let r4 = r2 * r2;
        let r6 = r4 * r2;
        let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r6;

        Vector2::new(
            x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
            y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y,
        )
    }

    /// Removes lens distortion from a point on the normalized image plane.
    ///
    /// Newton iterations on the forward distortion, starting at the distorted
    /// point itself.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::NumericalError`] if the Jacobian becomes singular or
    /// the iteration does not converge.
    pub fn undistort_normalized(
        &self,
        distorted: &Vector2<f64>,
    ) -> Result<Vector2<f64>, CameraModelError> {
        const EPS: f64 = 1e-10;
        const MAX_ITERATIONS: u32 = 100;

        let [k1, k2, p1, p2, k3] = self.distortions;
        let mut point = *distorted;

        for _ in 0..MAX_ITERATIONS {
            let error = self.distort_normalized(&point) - distorted;
            if error.norm() < EPS {
                return Ok(point);
            }

            let x = point.x;
            let y = point.y;
            let r2 = x * x + y * y;
            let r4 = r2 * r2;
            let radial = 1.0 + k1 * r2 + k2 * r4 + k3 * r4 * r2;

            let d_radial = k1 + 2.0 * k2 * r2 + 3.0 * k3 * r4;
            let d_radial_dx = d_radial * 2.0 * x;
            let d_radial_dy = d_radial * 2.0 * y;

            let j00 = radial + x * d_radial_dx + 2.0 * p1 * y + 6.0 * p2 * x;
            let j01 = x * d_radial_dy + 2.0 * p1 * x + 2.0 * p2 * y;
            let j10 = y * d_radial_dx + 2.0 * p1 * x + 2.0 * p2 * y;
            let j11 = radial + y * d_radial_dy + 6.0 * p1 * y + 2.0 * p2 * x;

            let jacobian = Matrix2::new(j00, j01, j10, j11);
            let inv_jacobian = jacobian.try_inverse().ok_or_else(|| {
                CameraModelError::NumericalError("Jacobian is singular".to_string())
            })?;
            let delta = inv_jacobian * error;
            point -= delta;

            if delta.norm() < EPS {
                return Ok(point);
            }
        }

        Err(CameraModelError::NumericalError(format!(
            "Undistortion did not converge after {MAX_ITERATIONS} iterations."
        )))
    }
}

impl fmt::Debug for RadTanModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RadTanModel [fx: {} fy: {} cx: {} cy: {} distortions: {:?}]",
            self.intrinsics.fx,
            self.intrinsics.fy,
            self.intrinsics.cx,
            self.intrinsics.cy,
            self.distortions,
        )
    }
}

impl CameraModel for RadTanModel {
    /// Projects a 3D point from camera coordinates to pixel coordinates,
    /// applying distortion.
    ///
    /// Points projecting outside the image are still returned: the reporter
    /// and the solver need the raw projection.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: If the 3D point's Z-coordinate is too close to zero.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let normalized = Vector2::new(point_3d.x / point_3d.z, point_3d.y / point_3d.z);
        let distorted = self.distort_normalized(&normalized);

        Ok(Vector2::new(
            self.intrinsics.fx * distorted.x + self.intrinsics.cx,
            self.intrinsics.fy * distorted.y + self.intrinsics.cy,
        ))
    }

    /// Unprojects a distorted pixel to a unit-length ray in camera coordinates.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointIsOutSideImage`]: If the pixel lies outside the resolution.
    /// * [`CameraModelError::NumericalError`]: If the undistortion does not converge.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if point_2d.x < 0.0
            || point_2d.x >= self.resolution.width as f64
            || point_2d.y < 0.0
            || point_2d.y >= self.resolution.height as f64
        {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let distorted = Vector2::new(
            (point_2d.x - self.intrinsics.cx) / self.intrinsics.fx,
            (point_2d.y - self.intrinsics.cy) / self.intrinsics.fy,
        );
        let point = self.undistort_normalized(&distorted)?;

        Ok(Vector3::new(point.x, point.y, 1.0).normalize())
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        if self.distortions.iter().any(|d| !d.is_finite()) {
            return Err(CameraModelError::InvalidParams(
                "Distortion coefficients must be finite".to_string(),
            ));
        }
        Ok(())
    }
}
