//! Synthetic calibration data: a known camera, varied board poses, exact
//! corner projections and rendered checkerboard images.

use std::f64::consts::TAU;
use std::path::{Path, PathBuf};

use image::{GrayImage, Luma};
use log::debug;
use nalgebra::{Matrix3, Rotation3, Vector2, Vector3};

use crate::board::BoardGeometry;
use crate::camera::{CameraModel, CameraModelError, Intrinsics, RadTanModel, Resolution};
use crate::error::CalibrationError;
use crate::geometry::{apply_homography, Pose};

pub const DARK: u8 = 30;
pub const LIGHT: u8 = 220;

const SUPERSAMPLING: u32 = 3;

/// 640×480 pinhole camera with a 500 px focal length and no distortion.
pub fn default_camera() -> RadTanModel {
    RadTanModel::from_parts(
        Intrinsics {
            fx: 500.0,
            fy: 500.0,
            cx: 320.0,
            cy: 240.0,
        },
        Resolution {
            width: 640,
            height: 480,
        },
        [0.0; 5],
    )
}

/// `count` deterministic board poses, tilted up to ~0.35 rad around varying
/// axes, with the board centred near the optical axis.
pub fn default_poses(board: &BoardGeometry, count: usize) -> Vec<Pose> {
    let s = board.square_size;
    let center = Vector3::new(
        (board.inner_corners_x - 1) as f64 * s * 0.5,
        (board.inner_corners_y - 1) as f64 * s * 0.5,
        0.0,
    );
    let span = (board.inner_corners_x.max(board.inner_corners_y) + 1) as f64 * s;
    let base_distance = 1.5 * span;

    (0..count)
        .map(|k| {
            let phi = TAU * k as f64 / count.max(1) as f64 + 0.3;
            let tilt = 0.2 + 0.15 * ((k % 3) as f64 / 2.0);
            let rotation = Vector3::new(
                tilt * phi.sin(),
                tilt * phi.cos(),
                0.1 * (2.0 * phi).sin(),
            );
            let distance = base_distance * (0.92 + 0.06 * (k % 4) as f64);
            let offset = Vector3::new(0.4 * s * phi.cos(), 0.3 * s * phi.sin(), distance);

            let r = Rotation3::new(rotation);
            Pose::new(rotation, offset - r * center)
        })
        .collect()
}

/// Pixel positions of the board corners, ordered like
/// [`BoardGeometry::board_points`].
pub fn project_board(
    camera: &RadTanModel,
    board: &BoardGeometry,
    pose: &Pose,
) -> Result<Vec<Vector2<f64>>, CameraModelError> {
    board
        .board_points()
        .iter()
        .map(|p| camera.project(&pose.transform(p)))
        .collect()
}

/// Board-plane to pixel homography of the distortion-free camera.
fn board_homography(camera: &RadTanModel, pose: &Pose) -> Matrix3<f64> {
    let r = pose.rotation_matrix();
    let extrinsic = Matrix3::from_columns(&[
        r.column(0).into_owned(),
        r.column(1).into_owned(),
        pose.translation,
    ]);
    camera.camera_matrix() * extrinsic
}

/// Renders the board seen through the distortion-free part of `camera`.
///
/// The board has `inner_corners + 1` squares along each side, the square at
/// the origin corner being dark. Each pixel averages a 3×3 grid of samples.
///
/// # Errors
///
/// [`CameraModelError::NumericalError`] if the board plane projects to a
/// degenerate homography.
pub fn render_checkerboard(
    camera: &RadTanModel,
    board: &BoardGeometry,
    pose: &Pose,
) -> Result<GrayImage, CameraModelError> {
    let h_inv = board_homography(camera, pose)
        .try_inverse()
        .ok_or_else(|| CameraModelError::NumericalError("board is edge-on".to_string()))?;

    let s = board.square_size;
    let nx = board.inner_corners_x as i64;
    let ny = board.inner_corners_y as i64;
    let shade = |u: f64, v: f64| -> f64 {
        let p = apply_homography(&h_inv, &Vector2::new(u, v));
        if !p.x.is_finite() || !p.y.is_finite() {
            return LIGHT as f64;
        }
        let sx = (p.x / s).floor() as i64 + 1;
        let sy = (p.y / s).floor() as i64 + 1;
        if (0..=nx).contains(&sx) && (0..=ny).contains(&sy) && (sx + sy) % 2 == 0 {
            DARK as f64
        } else {
            LIGHT as f64
        }
    };

    let resolution = camera.resolution;
    let n = SUPERSAMPLING as f64;
    Ok(GrayImage::from_fn(resolution.width, resolution.height, |x, y| {
        let mut acc = 0.0;
        for sy in 0..SUPERSAMPLING {
            for sx in 0..SUPERSAMPLING {
                let u = x as f64 + (sx as f64 + 0.5) / n - 0.5;
                let v = y as f64 + (sy as f64 + 0.5) / n - 0.5;
                acc += shade(u, v);
            }
        }
        Luma([(acc / (n * n)).round() as u8])
    }))
}

/// A featureless image the detector must reject.
pub fn blank_image(resolution: Resolution) -> GrayImage {
    GrayImage::from_pixel(resolution.width, resolution.height, Luma([LIGHT]))
}

/// Renders one PNG per pose into `dir` as `board_000.png`, `board_001.png`, ….
pub fn write_board_images(
    dir: &Path,
    camera: &RadTanModel,
    board: &BoardGeometry,
    poses: &[Pose],
) -> Result<Vec<PathBuf>, CalibrationError> {
    std::fs::create_dir_all(dir)?;
    let mut paths = Vec::with_capacity(poses.len());
    for (i, pose) in poses.iter().enumerate() {
        let path = dir.join(format!("board_{i:03}.png"));
        render_checkerboard(camera, board, pose)?.save(&path)?;
        paths.push(path);
    }
    debug!("Wrote {} synthetic board images to {:?}", paths.len(), dir);
    Ok(paths)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_poses_keep_board_in_view() {
        let camera = default_camera();
        let board = BoardGeometry::default();
        for pose in default_poses(&board, 12) {
            assert!(pose.translation.z > 0.0);
            let corners = project_board(&camera, &board, &pose).unwrap();
            for c in corners {
                assert!(c.x > 20.0 && c.x < 620.0, "x = {}", c.x);
                assert!(c.y > 20.0 && c.y < 460.0, "y = {}", c.y);
            }
        }
    }

    #[test]
    fn test_default_poses_are_distinct() {
        let board = BoardGeometry::default();
        let poses = default_poses(&board, 6);
        for i in 0..poses.len() {
            for j in i + 1..poses.len() {
                assert!((poses[i].rotation - poses[j].rotation).norm() > 1e-3);
            }
        }
    }

    #[test]
    fn test_render_has_both_shades() {
        let camera = default_camera();
        let board = BoardGeometry::default();
        let pose = default_poses(&board, 1)[0];
        let image = render_checkerboard(&camera, &board, &pose).unwrap();
        assert_eq!(image.dimensions(), (640, 480));
        assert!(image.pixels().any(|p| p[0] == DARK));
        assert!(image.pixels().any(|p| p[0] == LIGHT));
        // Image corners are background.
        assert_eq!(image.get_pixel(0, 0)[0], LIGHT);
    }

    #[test]
    fn test_write_board_images() {
        let dir = tempfile::tempdir().unwrap();
        let camera = default_camera();
        let board = BoardGeometry::default();
        let poses = default_poses(&board, 2);
        let paths = write_board_images(dir.path(), &camera, &board, &poses).unwrap();
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.exists()));
    }
}
