//! Run configuration, loadable from YAML and overridden from the command line.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::board::BoardGeometry;
use crate::detection::{DetectorParams, SubPixCriteria};
use crate::error::CalibrationError;
use crate::optimization::SolverOptions;

/// Everything a calibration run needs. Missing YAML keys take the defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Directory tree of calibration photographs.
    pub input_dir: PathBuf,
    /// Where `calibration.yaml`, `cameraMatrix.yaml` and `dist.yaml` go.
    pub output_dir: PathBuf,
    /// Root of the `success/` and `failure/` image copies, if any.
    pub debug_dir: Option<PathBuf>,
    pub board: BoardGeometry,
    pub detector: DetectorParams,
    pub subpix: SubPixCriteria,
    pub solver: SolverOptions,
    /// Below this many usable images the run emits a quality advisory.
    pub min_recommended_views: usize,
    /// Also export `report.csv` and `report.json` next to the artifacts.
    pub write_report: bool,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        CalibrationConfig {
            input_dir: PathBuf::from("images"),
            output_dir: PathBuf::from("."),
            debug_dir: None,
            board: BoardGeometry::default(),
            detector: DetectorParams::default(),
            subpix: SubPixCriteria::default(),
            solver: SolverOptions::default(),
            min_recommended_views: 10,
            write_report: false,
        }
    }
}

impl CalibrationConfig {
    pub fn from_yaml_file(path: &Path) -> Result<Self, CalibrationError> {
        let contents = fs::read_to_string(path).map_err(|e| {
            CalibrationError::Config(format!("cannot read config {path:?}: {e}"))
        })?;
        let config: CalibrationConfig = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the board and the directory layout.
    ///
    /// The debug directory must not live inside the input directory, otherwise
    /// its copies would be picked up as calibration images.
    pub fn validate(&self) -> Result<(), CalibrationError> {
        self.board.validate()?;
        if !(self.detector.threshold_rel > 0.0 && self.detector.threshold_rel < 1.0) {
            return Err(CalibrationError::Config(format!(
                "detector threshold_rel must be in (0, 1), got {}",
                self.detector.threshold_rel
            )));
        }
        if let Some(debug_dir) = &self.debug_dir {
            if resolve_path(debug_dir).starts_with(resolve_path(&self.input_dir)) {
                return Err(CalibrationError::Config(format!(
                    "debug directory {debug_dir:?} is inside the input directory {:?}",
                    self.input_dir
                )));
            }
        }
        Ok(())
    }
}

/// Absolute form of `path` with symlinks, `.` and `..` resolved as far as the
/// file system allows. The part below the deepest existing ancestor is kept
/// as written.
fn resolve_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            return missing
                .iter()
                .rev()
                .fold(canonical, |acc: PathBuf, name| acc.join(name));
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    absolute.components().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(
            &path,
            "input_dir: photos\nboard:\n  inner_corners_x: 9\n  inner_corners_y: 6\n",
        )
        .unwrap();

        let config = CalibrationConfig::from_yaml_file(&path).unwrap();
        assert_eq!(config.input_dir, PathBuf::from("photos"));
        assert_eq!(config.board.inner_corners_x, 9);
        assert_eq!(config.board.square_size, 1.0);
        assert_eq!(config.subpix, SubPixCriteria::default());
        assert_eq!(config.min_recommended_views, 10);
    }

    #[test]
    fn test_invalid_board_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, "board:\n  inner_corners_x: 1\n  inner_corners_y: 6\n").unwrap();
        assert!(matches!(
            CalibrationConfig::from_yaml_file(&path),
            Err(CalibrationError::Config(_))
        ));
    }

    #[test]
    fn test_debug_dir_inside_input_is_rejected() {
        let config = CalibrationConfig {
            input_dir: PathBuf::from("images"),
            debug_dir: Some(PathBuf::from("images/debug")),
            ..CalibrationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_dir_inside_input_is_rejected_after_resolving() {
        let relative = CalibrationConfig {
            input_dir: PathBuf::from("images"),
            debug_dir: Some(PathBuf::from("./images/debug")),
            ..CalibrationConfig::default()
        };
        assert!(matches!(relative.validate(), Err(CalibrationError::Config(_))));

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input");
        fs::create_dir(&input).unwrap();
        let dotted = CalibrationConfig {
            input_dir: input.clone(),
            debug_dir: Some(dir.path().join("input/../input/./debug")),
            ..CalibrationConfig::default()
        };
        assert!(matches!(dotted.validate(), Err(CalibrationError::Config(_))));

        let beside = CalibrationConfig {
            input_dir: input,
            debug_dir: Some(dir.path().join("input_debug")),
            ..CalibrationConfig::default()
        };
        assert!(beside.validate().is_ok());
    }

    #[test]
    fn test_missing_config_file() {
        assert!(matches!(
            CalibrationConfig::from_yaml_file(Path::new("/nonexistent/config.yaml")),
            Err(CalibrationError::Config(_))
        ));
    }
}
