//! Checkerboard corner detection.
//!
//! Detection runs in four stages: a ChESS corner response on a lightly
//! smoothed copy of the image ([`response`]), candidate extraction with
//! non-maximum suppression, lattice assembly into the `Nw × Nh` grid
//! ([`grid`]), and sub-pixel refinement on the unsmoothed image ([`subpix`]).

use image::{imageops, GrayImage};
use log::debug;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::board::BoardGeometry;
use crate::error::CalibrationError;

pub mod grid;
pub mod response;
pub mod subpix;

pub use grid::assemble_grid;
pub use response::{chess_response, find_candidates, Candidate, ResponseMap};
pub use subpix::{refine_corner, refine_corners, SubPixCriteria};

/// Tuning of the candidate search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParams {
    /// Gaussian sigma applied before the response; `0` disables smoothing.
    pub blur_sigma: f32,
    /// Candidates must exceed this fraction of the strongest response.
    pub threshold_rel: f32,
    /// Minimum distance between two candidates, in pixels.
    pub nms_radius: u32,
}

impl Default for DetectorParams {
    fn default() -> Self {
        DetectorParams {
            blur_sigma: 1.0,
            threshold_rel: 0.3,
            nms_radius: 4,
        }
    }
}

/// Sub-pixel corners of one image, ordered like
/// [`BoardGeometry::board_points`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedCorners {
    pub points: Vec<Vector2<f64>>,
}

impl DetectedCorners {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct ChessboardDetector {
    board: BoardGeometry,
    params: DetectorParams,
    criteria: SubPixCriteria,
}

impl ChessboardDetector {
    pub fn new(board: BoardGeometry, params: DetectorParams, criteria: SubPixCriteria) -> Self {
        ChessboardDetector {
            board,
            params,
            criteria,
        }
    }

    pub fn board(&self) -> &BoardGeometry {
        &self.board
    }

    /// Finds the full internal-corner grid of the board.
    ///
    /// # Errors
    ///
    /// [`CalibrationError::DetectionMiss`] when the complete grid cannot be
    /// assembled from the candidates.
    pub fn detect(&self, gray: &GrayImage) -> Result<DetectedCorners, CalibrationError> {
        let smoothed;
        let source = if self.params.blur_sigma > 0.0 {
            smoothed = imageops::blur(gray, self.params.blur_sigma);
            &smoothed
        } else {
            gray
        };

        let map = chess_response(source);
        let candidates = find_candidates(&map, self.params.threshold_rel, self.params.nms_radius);
        debug!("{} corner candidates", candidates.len());

        let positions: Vec<Vector2<f64>> = candidates.iter().map(|c| c.position).collect();
        let mut points = assemble_grid(
            &positions,
            self.board.inner_corners_x,
            self.board.inner_corners_y,
        )
        .ok_or(CalibrationError::DetectionMiss)?;

        refine_corners(gray, &mut points, &self.criteria);
        Ok(DetectedCorners { points })
    }
}
