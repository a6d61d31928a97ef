//! The `optimization` module calibrates the camera from planar correspondences.
//!
//! Calibration follows the usual two stages:
//! 1. A linear estimation ([`linear`]): per-view homographies, closed-form
//!    intrinsics and a pose for every view.
//! 2. A joint non-linear refinement ([`planar`]) of intrinsics, distortion and
//!    all poses with the Levenberg-Marquardt optimizer of `tiny_solver`.
//!
//! The [`Optimizer`] trait is the interface between those stages and the
//! pipeline; [`calibrate_camera`] runs both.

use serde::{Deserialize, Serialize};

pub mod linear;
pub mod planar;

pub use planar::{calibrate_camera, CalibrationResult, PlanarCalibrationCost};

use crate::camera::CameraModelError;

/// Summary statistics of per-point reprojection distances, in pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl ProjectionError {
    /// Statistics of `errors`, or `None` when there are none.
    pub fn from_errors(errors: &[f64]) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        let n = errors.len() as f64;

        let mean = errors.iter().sum::<f64>() / n;
        let rmse = (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt();
        let variance = errors.iter().map(|e| (e - mean).powi(2)).sum::<f64>() / n;

        let mut sorted = errors.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        let median = if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        };

        Some(ProjectionError {
            rmse,
            min: sorted[0],
            max: sorted[sorted.len() - 1],
            mean,
            stddev: variance.sqrt(),
            median,
        })
    }
}

/// Knobs of the non-linear refinement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    pub max_iterations: usize,
    /// Refine `[k1, k2, p1, p2, k3]`; when `false` they stay at zero.
    pub refine_distortion: bool,
    /// Log solver progress at `info` level instead of `debug`.
    pub verbose: bool,
}

impl Default for SolverOptions {
    fn default() -> Self {
        SolverOptions {
            max_iterations: 100,
            refine_distortion: true,
            verbose: false,
        }
    }
}

/// A trait for camera calibration tasks.
///
/// Implementors hold the observations and the current estimate of the camera
/// model, and refine it in two steps: a linear estimation that produces a
/// starting point, then a non-linear optimization of all parameters.
pub trait Optimizer {
    /// Refines the current estimate by minimizing the reprojection error.
    ///
    /// # Errors
    ///
    /// [`CameraModelError::NumericalError`] if the solver fails, or a validation
    /// error if it produces an invalid model.
    fn optimize(&mut self, verbose: bool) -> Result<(), CameraModelError>;

    /// Computes the initial estimate in closed form.
    fn linear_estimation(&mut self) -> Result<(), CameraModelError>
    where
        Self: Sized;
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_projection_error_statistics() {
        let stats = ProjectionError::from_errors(&[1.0, 3.0, 2.0, 4.0]).unwrap();
        assert_relative_eq!(stats.mean, 2.5);
        assert_relative_eq!(stats.median, 2.5);
        assert_relative_eq!(stats.min, 1.0);
        assert_relative_eq!(stats.max, 4.0);
        assert_relative_eq!(stats.rmse, (30.0f64 / 4.0).sqrt());
        assert_relative_eq!(stats.stddev, 1.25f64.sqrt());
    }

    #[test]
    fn test_projection_error_empty() {
        assert!(ProjectionError::from_errors(&[]).is_none());
    }
}
