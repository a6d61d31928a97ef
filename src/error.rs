use std::path::PathBuf;

use crate::camera::CameraModelError;

/// Errors raised by the calibration run.
///
/// `Decode` and `DetectionMiss` are recovered per image by the pipeline; the
/// other variants abort the run.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Unable to load image {path}: {reason}")]
    Decode { path: PathBuf, reason: String },
    #[error("Checkerboard not found")]
    DetectionMiss,
    #[error("No checkerboard detected in any of the {total} input images")]
    NoDetections { total: usize },
    #[error("Numerical error in computation: {0}")]
    Numerical(String),
    #[error("Camera model error: {0}")]
    CameraModel(#[from] CameraModelError),
    #[error("Failed to process YAML: {0}")]
    YamlError(String),
    #[error("Failed to export report: {0}")]
    ReportError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CalibrationError {
    fn from(err: std::io::Error) -> Self {
        CalibrationError::IOError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CalibrationError {
    fn from(err: serde_yaml::Error) -> Self {
        CalibrationError::YamlError(err.to_string())
    }
}

impl From<csv::Error> for CalibrationError {
    fn from(err: csv::Error) -> Self {
        CalibrationError::ReportError(err.to_string())
    }
}

impl From<serde_json::Error> for CalibrationError {
    fn from(err: serde_json::Error) -> Self {
        CalibrationError::ReportError(err.to_string())
    }
}

impl From<image::ImageError> for CalibrationError {
    fn from(err: image::ImageError) -> Self {
        CalibrationError::IOError(err.to_string())
    }
}
