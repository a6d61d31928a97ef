//! Reprojection quality of a calibration.
//!
//! The per-image error is the L2 norm of the stacked residuals of that image
//! divided by its number of points, `sqrt(Σ‖detected − projected‖²) / N`; the
//! reported figure is the mean of those over all images.

use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

use log::{info, warn};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::{CameraModel, CameraModelError, RadTanModel};
use crate::error::CalibrationError;
use crate::geometry::Pose;
use crate::optimization::{CalibrationResult, ProjectionError};
use crate::pipeline::{CorrespondenceSet, ImageTally};

/// Raised, not as an error, when too few images were usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityAdvisory {
    pub success: usize,
    pub recommended: usize,
}

impl fmt::Display for QualityAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "only {} usable calibration images, at least {} are recommended for a reliable result",
            self.success, self.recommended
        )
    }
}

/// `Some` when `tally.success` is below `recommended`.
pub fn advisory_for(tally: &ImageTally, recommended: usize) -> Option<QualityAdvisory> {
    (tally.success < recommended).then_some(QualityAdvisory {
        success: tally.success,
        recommended,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageReprojection {
    pub source: PathBuf,
    pub error: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityReport {
    pub tally: ImageTally,
    pub per_image: Vec<ImageReprojection>,
    /// Mean of the per-image errors, in pixels.
    pub mean_error: f64,
    /// Statistics of the individual point distances.
    pub point_errors: Option<ProjectionError>,
    /// RMS reported by the solver.
    pub rms: f64,
    pub advisory: Option<QualityAdvisory>,
}

/// Per-point reprojection distances of one image.
pub fn point_errors(
    camera: &RadTanModel,
    pose: &Pose,
    board_points: &[Vector3<f64>],
    detected: &[Vector2<f64>],
) -> Result<Vec<f64>, CameraModelError> {
    let mut distances = Vec::with_capacity(detected.len());
    for (point, observed) in board_points.iter().zip(detected) {
        let projected = camera.project(&pose.transform(point))?;
        distances.push((projected - observed).norm());
    }
    Ok(distances)
}

/// `sqrt(Σ d²) / N` for the point distances `d` of one image.
pub fn image_error(distances: &[f64]) -> f64 {
    if distances.is_empty() {
        return 0.0;
    }
    distances.iter().map(|d| d * d).sum::<f64>().sqrt() / distances.len() as f64
}

impl QualityReport {
    /// # Errors
    ///
    /// [`CalibrationError::Numerical`] if the result does not hold one pose
    /// per view, or a board point projects behind the camera.
    pub fn compute(
        set: &CorrespondenceSet,
        result: &CalibrationResult,
        tally: ImageTally,
        recommended: usize,
    ) -> Result<Self, CalibrationError> {
        if result.poses.len() != set.len() {
            return Err(CalibrationError::Numerical(format!(
                "{} poses for {} views",
                result.poses.len(),
                set.len()
            )));
        }

        let mut per_image = Vec::with_capacity(set.len());
        let mut all_points = Vec::new();
        for (view, pose) in set.views().iter().zip(&result.poses) {
            let distances =
                point_errors(&result.camera, pose, set.board_points(), &view.corners.points)
                    .map_err(|e| CalibrationError::Numerical(e.to_string()))?;
            per_image.push(ImageReprojection {
                source: view.source.clone(),
                error: image_error(&distances),
            });
            all_points.extend(distances);
        }

        let mean_error = if per_image.is_empty() {
            0.0
        } else {
            per_image.iter().map(|i| i.error).sum::<f64>() / per_image.len() as f64
        };

        Ok(QualityReport {
            tally,
            per_image,
            mean_error,
            point_errors: ProjectionError::from_errors(&all_points),
            rms: result.rms,
            advisory: advisory_for(&tally, recommended),
        })
    }

    /// Logs the summary: counts, mean error and the advisory if any.
    pub fn log_summary(&self) {
        info!(
            "Images: {} total, {} succeeded, {} failed",
            self.tally.total, self.tally.success, self.tally.failure
        );
        info!("Mean reprojection error: {:.6} px", self.mean_error);
        if let Some(stats) = &self.point_errors {
            info!("{stats:?}");
        }
        if let Some(advisory) = &self.advisory {
            warn!("{advisory}");
        }
    }

    /// One CSV row per image: `source,error`.
    pub fn write_csv(&self, path: &Path) -> Result<(), CalibrationError> {
        let mut writer = csv::Writer::from_path(path)?;
        for image in &self.per_image {
            writer.serialize(image)?;
        }
        writer.flush()?;
        Ok(())
    }

    pub fn write_json(&self, path: &Path) -> Result<(), CalibrationError> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self)?;
        Ok(())
    }
}
