//! Camera model primitives shared by the detector, the solver and the
//! downstream undistortion helpers.
//!
//! The calibration produces a pinhole camera with radial-tangential lens
//! distortion, represented by [`RadTanModel`]. The [`CameraModel`] trait keeps
//! the projection interface separate from the concrete model so the reporter
//! and the undistortion code only depend on `project` / `unproject`.

use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

pub mod rad_tan;

pub use rad_tan::RadTanModel;

/// Pinhole intrinsic parameters (focal lengths and principal point, in pixels).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// Builds the 3×3 intrinsic matrix `[[fx, 0, cx], [0, fy, cy], [0, 0, 1]]`.
    pub fn to_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx, 0.0, self.cx, //
            0.0, self.fy, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Reads the intrinsics back from a 3×3 intrinsic matrix. Skew is ignored.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Self {
        Intrinsics {
            fx: matrix[(0, 0)],
            fy: matrix[(1, 1)],
            cx: matrix[(0, 2)],
            cy: matrix[(1, 2)],
        }
    }
}

/// Image size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Input point is outside the image")]
    PointIsOutSideImage,
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
}

/// Trait defining the core functionality for camera models
pub trait CameraModel {
    /// Project a 3D point in camera coordinates to 2D pixel coordinates.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError>;

    /// Unproject 2D pixel coordinates to a unit-length 3D ray.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError>;

    /// Validate camera parameters
    fn validate_params(&self) -> Result<(), CameraModelError>;
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if !(intrinsics.fx > 0.0 && intrinsics.fy > 0.0)
            || !intrinsics.fx.is_finite()
            || !intrinsics.fy.is_finite()
        {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsics_matrix_round_trip() {
        let intrinsics = Intrinsics {
            fx: 612.5,
            fy: 610.25,
            cx: 319.75,
            cy: 241.0,
        };
        let matrix = intrinsics.to_matrix();
        assert_eq!(matrix[(2, 2)], 1.0);
        assert_eq!(matrix[(0, 1)], 0.0);
        assert_eq!(Intrinsics::from_matrix(&matrix), intrinsics);
    }

    #[test]
    fn test_validate_intrinsics_rejects_bad_values() {
        let mut intrinsics = Intrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        };
        assert!(validation::validate_intrinsics(&intrinsics).is_ok());

        intrinsics.fy = -1.0;
        assert!(matches!(
            validation::validate_intrinsics(&intrinsics),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));

        intrinsics.fy = f64::NAN;
        assert!(validation::validate_intrinsics(&intrinsics).is_err());

        intrinsics.fy = 500.0;
        intrinsics.cx = f64::INFINITY;
        assert!(matches!(
            validation::validate_intrinsics(&intrinsics),
            Err(CameraModelError::PrincipalPointMustBeFinite)
        ));
    }
}
