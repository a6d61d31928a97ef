//! Checkerboard geometry and the synthetic 3D board points.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::error::CalibrationError;

/// Internal-corner layout of the calibration checkerboard.
///
/// A board with `inner_corners_x × inner_corners_y` internal corners has one
/// more square along each side. `square_size` scales the board coordinates;
/// the default of `1.0` keeps them on the unit grid, so solved translations
/// are expressed in squares rather than a physical unit.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoardGeometry {
    pub inner_corners_x: usize,
    pub inner_corners_y: usize,
    #[serde(default = "default_square_size")]
    pub square_size: f64,
}

fn default_square_size() -> f64 {
    1.0
}

impl Default for BoardGeometry {
    fn default() -> Self {
        BoardGeometry {
            inner_corners_x: 8,
            inner_corners_y: 7,
            square_size: 1.0,
        }
    }
}

impl BoardGeometry {
    /// Unit-square board with the given internal corner counts.
    pub fn new(inner_corners_x: usize, inner_corners_y: usize) -> Result<Self, CalibrationError> {
        let board = BoardGeometry {
            inner_corners_x,
            inner_corners_y,
            square_size: 1.0,
        };
        board.validate()?;
        Ok(board)
    }

    pub fn with_square_size(mut self, square_size: f64) -> Result<Self, CalibrationError> {
        self.square_size = square_size;
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.inner_corners_x < 2 || self.inner_corners_y < 2 {
            return Err(CalibrationError::Config(format!(
                "checkerboard needs at least 2x2 internal corners, got {}x{}",
                self.inner_corners_x, self.inner_corners_y
            )));
        }
        if !(self.square_size > 0.0 && self.square_size.is_finite()) {
            return Err(CalibrationError::Config(format!(
                "square size must be positive and finite, got {}",
                self.square_size
            )));
        }
        Ok(())
    }

    pub fn corner_count(&self) -> usize {
        self.inner_corners_x * self.inner_corners_y
    }

    /// Board-frame coordinates of every internal corner on the Z=0 plane.
    ///
    /// Ordered with the x index varying fastest, i.e. `(0,0,0), (1,0,0), …,
    /// (Nw-1,0,0), (0,1,0), …, (Nw-1,Nh-1,0)` for unit squares. Detected corners
    /// use the same order.
    pub fn board_points(&self) -> Vec<Vector3<f64>> {
        let mut points = Vec::with_capacity(self.corner_count());
        for j in 0..self.inner_corners_y {
            for i in 0..self.inner_corners_x {
                points.push(Vector3::new(
                    i as f64 * self.square_size,
                    j as f64 * self.square_size,
                    0.0,
                ));
            }
        }
        points
    }
}
