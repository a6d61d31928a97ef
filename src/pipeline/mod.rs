//! The calibration run: enumerate images, detect the board in each, solve,
//! report and persist.

use std::path::{Path, PathBuf};

use log::{info, warn};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::board::BoardGeometry;
use crate::camera::{CameraModelError, Resolution};
use crate::config::CalibrationConfig;
use crate::detection::{ChessboardDetector, DetectedCorners};
use crate::error::CalibrationError;
use crate::optimization::{calibrate_camera, CalibrationResult};
use crate::persistence::{save_calibration, ArtifactPaths};
use crate::report::QualityReport;
use crate::source::ImageSource;
use crate::util::DebugWriter;

/// Detected corners of one image and the file they came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewCorrespondence {
    pub source: PathBuf,
    pub corners: DetectedCorners,
}

/// Board points shared by every view plus the detections, in processing order.
#[derive(Debug, Clone)]
pub struct CorrespondenceSet {
    board_points: Vec<Vector3<f64>>,
    views: Vec<ViewCorrespondence>,
}

impl CorrespondenceSet {
    pub fn new(board: &BoardGeometry) -> Self {
        CorrespondenceSet {
            board_points: board.board_points(),
            views: Vec::new(),
        }
    }

    /// Appends a detection; it must have one corner per board point.
    pub fn push(&mut self, source: PathBuf, corners: DetectedCorners) -> Result<(), CalibrationError> {
        if corners.len() != self.board_points.len() {
            return Err(CameraModelError::InvalidParams(format!(
                "{source:?} has {} corners, the board has {}",
                corners.len(),
                self.board_points.len()
            ))
            .into());
        }
        self.views.push(ViewCorrespondence { source, corners });
        Ok(())
    }

    pub fn board_points(&self) -> &[Vector3<f64>] {
        &self.board_points
    }

    pub fn views(&self) -> &[ViewCorrespondence] {
        &self.views
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

/// Image counts of a run; `success + failure == total` always holds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageTally {
    pub total: usize,
    pub success: usize,
    pub failure: usize,
}

impl ImageTally {
    fn record_success(&mut self) {
        self.total += 1;
        self.success += 1;
    }

    fn record_failure(&mut self) {
        self.total += 1;
        self.failure += 1;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageOutcome {
    Detected,
    NotFound,
    Undecodable(String),
}

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationImage {
    pub path: PathBuf,
    pub resolution: Option<Resolution>,
    pub outcome: ImageOutcome,
}

/// Everything gathered before solving.
#[derive(Debug, Clone)]
pub struct Collection {
    pub set: CorrespondenceSet,
    pub tally: ImageTally,
    pub images: Vec<CalibrationImage>,
    /// Size of the last successfully processed image.
    pub resolution: Option<Resolution>,
}

/// Result of a complete run.
#[derive(Debug, Clone)]
pub struct CalibrationOutcome {
    pub result: CalibrationResult,
    pub report: QualityReport,
    pub artifacts: ArtifactPaths,
    pub report_files: Vec<PathBuf>,
}

/// Debug output never fails the run.
fn debug_write<F>(writer: Option<&DebugWriter>, write: F)
where
    F: FnOnce(&DebugWriter) -> Result<PathBuf, CalibrationError>,
{
    if let Some(writer) = writer {
        if let Err(e) = write(writer) {
            warn!("Failed to write debug image: {e}");
        }
    }
}

/// Detects the board in every image below `config.input_dir`.
///
/// Undecodable files and images without a complete board are logged and
/// counted as failures; only a missing input directory (or an unusable debug
/// directory) aborts.
pub fn collect_correspondences(config: &CalibrationConfig) -> Result<Collection, CalibrationError> {
    let source = ImageSource::new(&config.input_dir)?;
    let detector = ChessboardDetector::new(config.board, config.detector, config.subpix);
    let debug_writer = config
        .debug_dir
        .as_deref()
        .map(DebugWriter::new)
        .transpose()?;

    let mut set = CorrespondenceSet::new(&config.board);
    let mut tally = ImageTally::default();
    let mut images = Vec::new();
    let mut resolution: Option<Resolution> = None;

    for item in source {
        let image = match item.image {
            Ok(image) => image,
            Err(e) => {
                warn!("Skipping {:?}: {e}", item.path);
                tally.record_failure();
                images.push(CalibrationImage {
                    path: item.path,
                    resolution: None,
                    outcome: ImageOutcome::Undecodable(e.to_string()),
                });
                continue;
            }
        };

        let size = Resolution {
            width: image.width(),
            height: image.height(),
        };
        let gray = image.to_luma8();

        match detector.detect(&gray) {
            Ok(corners) => {
                info!("Checkerboard found in {:?}", item.path);
                if let Some(previous) = resolution {
                    if previous != size {
                        warn!(
                            "{:?} is {}x{}, previous images were {}x{}",
                            item.path, size.width, size.height, previous.width, previous.height
                        );
                    }
                }
                resolution = Some(size);

                let cols = config.board.inner_corners_x;
                debug_write(debug_writer.as_ref(), |w| {
                    w.write_success(&item.path, &image, &corners.points, cols)
                });
                set.push(item.path.clone(), corners)?;
                tally.record_success();
                images.push(CalibrationImage {
                    path: item.path,
                    resolution: Some(size),
                    outcome: ImageOutcome::Detected,
                });
            }
            Err(e) => {
                warn!("{e} in {:?}", item.path);
                debug_write(debug_writer.as_ref(), |w| w.write_failure(&item.path, &image));
                tally.record_failure();
                images.push(CalibrationImage {
                    path: item.path,
                    resolution: Some(size),
                    outcome: ImageOutcome::NotFound,
                });
            }
        }
    }

    Ok(Collection {
        set,
        tally,
        images,
        resolution,
    })
}

fn write_reports(report: &QualityReport, dir: &Path) -> Result<Vec<PathBuf>, CalibrationError> {
    let csv_path = dir.join("report.csv");
    let json_path = dir.join("report.json");
    report.write_csv(&csv_path)?;
    report.write_json(&json_path)?;
    Ok(vec![csv_path, json_path])
}

/// Runs the whole calibration described by `config`.
///
/// # Errors
///
/// * [`CalibrationError::Config`] for an invalid configuration or a missing
///   input directory.
/// * [`CalibrationError::NoDetections`] when no image contains the board; no
///   artifact is written in that case.
/// * [`CalibrationError::Numerical`] when the solver fails.
pub fn run(config: &CalibrationConfig) -> Result<CalibrationOutcome, CalibrationError> {
    config.validate()?;
    let collection = collect_correspondences(config)?;
    let tally = collection.tally;
    info!(
        "Processed {} images: {} succeeded, {} failed",
        tally.total, tally.success, tally.failure
    );

    let resolution = match collection.resolution {
        Some(resolution) if !collection.set.is_empty() => resolution,
        _ => return Err(CalibrationError::NoDetections { total: tally.total }),
    };

    let result = calibrate_camera(&collection.set, resolution, &config.solver)?;
    let report = QualityReport::compute(
        &collection.set,
        &result,
        tally,
        config.min_recommended_views,
    )?;
    report.log_summary();

    let artifacts = save_calibration(&config.output_dir, &result.camera)?;
    let report_files = if config.write_report {
        write_reports(&report, &config.output_dir)?
    } else {
        Vec::new()
    };

    Ok(CalibrationOutcome {
        result,
        report,
        artifacts,
        report_files,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector2;

    #[test]
    fn test_tally_counts_add_up() {
        let mut tally = ImageTally::default();
        tally.record_success();
        tally.record_failure();
        tally.record_failure();
        assert_eq!(tally.total, 3);
        assert_eq!(tally.success + tally.failure, tally.total);
    }

    #[test]
    fn test_set_rejects_wrong_corner_count() {
        let board = BoardGeometry::new(3, 2).unwrap();
        let mut set = CorrespondenceSet::new(&board);
        let corners = DetectedCorners {
            points: vec![Vector2::zeros(); 5],
        };
        assert!(set.push(PathBuf::from("a.png"), corners).is_err());
        assert!(set.is_empty());

        let corners = DetectedCorners {
            points: vec![Vector2::zeros(); 6],
        };
        set.push(PathBuf::from("b.png"), corners).unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.board_points().len(), 6);
    }

    #[test]
    fn test_missing_input_dir_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = CalibrationConfig {
            input_dir: dir.path().join("missing"),
            output_dir: dir.path().join("out"),
            ..CalibrationConfig::default()
        };
        assert!(matches!(run(&config), Err(CalibrationError::Config(_))));
        assert!(!dir.path().join("out").exists());
    }
}
