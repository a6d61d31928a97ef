//! Checkerboard Calibration Library
//!
//! Calibrates a pinhole camera with radial-tangential lens distortion from a
//! directory of photographs of a planar checkerboard:
//! - board geometry and its 3D reference points ([`board`])
//! - inner-corner detection with sub-pixel refinement ([`detection`])
//! - closed-form initialisation and tiny-solver refinement ([`optimization`])
//! - reprojection quality reports ([`report`])
//! - YAML artifacts and their loaders ([`persistence`])
//! - undistortion of points and images with a saved calibration ([`undistort`])
//!
//! [`pipeline::run`] ties everything together for a [`config::CalibrationConfig`].

pub mod board;
pub mod camera;
pub mod config;
pub mod detection;
pub mod error;
pub mod geometry;
pub mod optimization;
pub mod persistence;
pub mod pipeline;
pub mod report;
pub mod source;
pub mod synthetic;
pub mod undistort;
pub mod util;

// Re-export commonly used types
pub use board::BoardGeometry;
pub use camera::{CameraModel, CameraModelError, Intrinsics, RadTanModel, Resolution};
pub use config::CalibrationConfig;
pub use detection::{ChessboardDetector, DetectedCorners};
pub use error::CalibrationError;
pub use optimization::{calibrate_camera, CalibrationResult, Optimizer, SolverOptions};
pub use pipeline::{run, CalibrationOutcome, CorrespondenceSet, ImageTally};
pub use report::{QualityAdvisory, QualityReport};
