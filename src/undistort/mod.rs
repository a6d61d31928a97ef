//! Removing lens distortion from pixel coordinates and whole images with a
//! saved calibration.

use std::path::Path;

use image::{Rgb, RgbImage};
use log::info;
use nalgebra::Vector2;

use crate::camera::{CameraModelError, RadTanModel};
use crate::error::CalibrationError;
use crate::persistence::load_camera_settings;

/// Maps a distorted pixel to where an ideal pinhole camera with the same
/// intrinsics would have imaged it.
pub fn undistort_point(
    camera: &RadTanModel,
    pixel: &Vector2<f64>,
) -> Result<Vector2<f64>, CameraModelError> {
    let k = &camera.intrinsics;
    let distorted = Vector2::new((pixel.x - k.cx) / k.fx, (pixel.y - k.cy) / k.fy);
    let ideal = camera.undistort_normalized(&distorted)?;
    Ok(Vector2::new(k.fx * ideal.x + k.cx, k.fy * ideal.y + k.cy))
}

pub fn undistort_points(
    camera: &RadTanModel,
    pixels: &[Vector2<f64>],
) -> Result<Vec<Vector2<f64>>, CameraModelError> {
    let mut undistorted = Vec::with_capacity(pixels.len());
    for pixel in pixels {
        undistorted.push(undistort_point(camera, pixel)?);
    }
    Ok(undistorted)
}

fn sample_bilinear(image: &RgbImage, x: f64, y: f64) -> Option<Rgb<u8>> {
    const EDGE: f64 = 1e-6;
    let max_x = image.width() as f64 - 1.0;
    let max_y = image.height() as f64 - 1.0;
    if !(x >= -EDGE && y >= -EDGE && x <= max_x + EDGE && y <= max_y + EDGE) {
        return None;
    }
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);

    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Some(Rgb(out))
}

/// Resamples `image` as seen by the undistorted camera. Output pixels whose
/// source falls outside the input are black.
pub fn undistort_image(camera: &RadTanModel, image: &RgbImage) -> RgbImage {
    let k = &camera.intrinsics;
    RgbImage::from_fn(image.width(), image.height(), |u, v| {
        let ideal = Vector2::new((u as f64 - k.cx) / k.fx, (v as f64 - k.cy) / k.fy);
        let distorted = camera.distort_normalized(&ideal);
        let x = k.fx * distorted.x + k.cx;
        let y = k.fy * distorted.y + k.cy;
        sample_bilinear(image, x, y).unwrap_or(Rgb([0, 0, 0]))
    })
}

/// Loads `cameraMatrix.yaml`/`dist.yaml`, undistorts `input` and writes the
/// result to `output`.
pub fn undistort_file(
    camera_matrix_path: &Path,
    distortion_path: &Path,
    input: &Path,
    output: &Path,
) -> Result<(), CalibrationError> {
    let camera = load_camera_settings(camera_matrix_path, distortion_path)?;
    let image = image::open(input)
        .map_err(|e| CalibrationError::Decode {
            path: input.to_path_buf(),
            reason: e.to_string(),
        })?
        .to_rgb8();

    undistort_image(&camera, &image).save(output)?;
    info!("Undistorted {:?} -> {:?}", input, output);
    Ok(())
}
