//! YAML artifacts of a calibration and their loaders.
//!
//! Three files are written, each overwritten on every run:
//!
//! * `calibration.yaml`: `camera_matrix` (3×3, row-major) and `distortion`
//!   (`[k1, k2, p1, p2, k3]`);
//! * `cameraMatrix.yaml`: the 3×3 matrix alone;
//! * `dist.yaml`: the five distortion coefficients alone.
//!
//! Values are written with their shortest exact representation, so loading
//! them back yields bit-identical `f64`s.

use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use nalgebra::{DVector, Matrix3};
use serde::{Deserialize, Serialize};

use crate::camera::{Intrinsics, RadTanModel};
use crate::error::CalibrationError;
use crate::util::ensure_dir;

pub const CALIBRATION_FILE: &str = "calibration.yaml";
pub const CAMERA_MATRIX_FILE: &str = "cameraMatrix.yaml";
pub const DISTORTION_FILE: &str = "dist.yaml";

type RowMajor3 = [[f64; 3]; 3];

/// Contents of `calibration.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationFile {
    pub camera_matrix: RowMajor3,
    pub distortion: [f64; 5],
}

impl CalibrationFile {
    pub fn from_model(model: &RadTanModel) -> Self {
        CalibrationFile {
            camera_matrix: to_rows(&model.camera_matrix()),
            distortion: model.distortions,
        }
    }

    pub fn camera_matrix(&self) -> Matrix3<f64> {
        from_rows(&self.camera_matrix)
    }

    /// The camera model described by the file. Resolution is not stored and
    /// is left at 0×0.
    pub fn to_model(&self) -> Result<RadTanModel, CalibrationError> {
        model_from(&self.camera_matrix(), &self.distortion)
    }
}

/// Paths of the artifacts written by [`save_calibration`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub calibration: PathBuf,
    pub camera_matrix: PathBuf,
    pub distortion: PathBuf,
}

impl ArtifactPaths {
    pub fn in_dir(dir: &Path) -> Self {
        ArtifactPaths {
            calibration: dir.join(CALIBRATION_FILE),
            camera_matrix: dir.join(CAMERA_MATRIX_FILE),
            distortion: dir.join(DISTORTION_FILE),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &PathBuf> {
        [&self.calibration, &self.camera_matrix, &self.distortion].into_iter()
    }
}

fn to_rows(m: &Matrix3<f64>) -> RowMajor3 {
    [
        [m[(0, 0)], m[(0, 1)], m[(0, 2)]],
        [m[(1, 0)], m[(1, 1)], m[(1, 2)]],
        [m[(2, 0)], m[(2, 1)], m[(2, 2)]],
    ]
}

fn from_rows(rows: &RowMajor3) -> Matrix3<f64> {
    Matrix3::from_fn(|r, c| rows[r][c])
}

fn model_from(matrix: &Matrix3<f64>, distortion: &[f64; 5]) -> Result<RadTanModel, CalibrationError> {
    let k = Intrinsics::from_matrix(matrix);
    let mut params = vec![k.fx, k.fy, k.cx, k.cy];
    params.extend_from_slice(distortion);
    Ok(RadTanModel::new(&DVector::from_vec(params))?)
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), CalibrationError> {
    let yaml = serde_yaml::to_string(value)?;
    fs::write(path, yaml)?;
    Ok(())
}

fn read_yaml<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, CalibrationError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| CalibrationError::IOError(format!("cannot read {path:?}: {e}")))?;
    Ok(serde_yaml::from_str(&contents)?)
}

/// Writes the three artifacts of `model` into `dir`, creating it if needed.
pub fn save_calibration(dir: &Path, model: &RadTanModel) -> Result<ArtifactPaths, CalibrationError> {
    ensure_dir(dir)?;
    let paths = ArtifactPaths::in_dir(dir);
    let file = CalibrationFile::from_model(model);

    write_yaml(&paths.calibration, &file)?;
    write_yaml(&paths.camera_matrix, &file.camera_matrix)?;
    write_yaml(&paths.distortion, &file.distortion)?;

    info!("Calibration saved to {:?}", dir);
    Ok(paths)
}

pub fn load_calibration(path: &Path) -> Result<CalibrationFile, CalibrationError> {
    read_yaml(path)
}

pub fn load_camera_matrix(path: &Path) -> Result<Matrix3<f64>, CalibrationError> {
    let rows: RowMajor3 = read_yaml(path)?;
    Ok(from_rows(&rows))
}

pub fn load_distortion(path: &Path) -> Result<[f64; 5], CalibrationError> {
    read_yaml(path)
}

/// Loads `cameraMatrix.yaml` and `dist.yaml` into a ready camera model.
///
/// # Errors
///
/// I/O and YAML errors, or [`CalibrationError::CameraModel`] when the loaded
/// parameters are not a valid camera.
pub fn load_camera_settings(
    camera_matrix_path: &Path,
    distortion_path: &Path,
) -> Result<RadTanModel, CalibrationError> {
    let matrix = load_camera_matrix(camera_matrix_path)?;
    let distortion = load_distortion(distortion_path)?;
    model_from(&matrix, &distortion)
}
