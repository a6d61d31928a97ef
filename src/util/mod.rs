//! Diagnostic output: annotated images of each processed photograph and a
//! console summary of the calibration.

use std::fs;
use std::path::{Path, PathBuf};

use image::{DynamicImage, Rgb, RgbImage};
use nalgebra::Vector2;

use crate::error::CalibrationError;
use crate::pipeline::CalibrationOutcome;

/// Row colours for the corner overlay, cycled per board row.
const ROW_COLORS: [Rgb<u8>; 6] = [
    Rgb([255, 0, 0]),
    Rgb([255, 128, 0]),
    Rgb([200, 200, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 128, 255]),
    Rgb([255, 0, 255]),
];

/// Creates `dir` and its parents if needed.
pub fn ensure_dir(dir: &Path) -> Result<(), CalibrationError> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| {
            CalibrationError::IOError(format!("Failed to create directory {dir:?}: {e}"))
        })?;
    }
    Ok(())
}

fn put_checked(img: &mut RgbImage, x: i32, y: i32, color: Rgb<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, color);
    }
}

fn draw_circle(img: &mut RgbImage, center: &Vector2<f64>, radius: i32, color: Rgb<u8>) {
    let cx = center.x.round() as i32;
    let cy = center.y.round() as i32;
    let outer = radius * radius;
    let inner = (radius - 1) * (radius - 1);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            let d = dx * dx + dy * dy;
            if d <= outer && d >= inner {
                put_checked(img, cx + dx, cy + dy, color);
            }
        }
    }
}

fn draw_line(img: &mut RgbImage, from: &Vector2<f64>, to: &Vector2<f64>, color: Rgb<u8>) {
    let steps = (to - from).abs().max().ceil().max(1.0) as usize;
    for k in 0..=steps {
        let p = from + (to - from) * (k as f64 / steps as f64);
        put_checked(img, p.x.round() as i32, p.y.round() as i32, color);
    }
}

/// Draws detected corners as circles joined in board order, one colour per
/// row of `cols` corners.
pub fn draw_corners(img: &mut RgbImage, corners: &[Vector2<f64>], cols: usize) {
    let cols = cols.max(1);
    for (i, corner) in corners.iter().enumerate() {
        let color = ROW_COLORS[(i / cols) % ROW_COLORS.len()];
        draw_circle(img, corner, 4, color);
        if let Some(next) = corners.get(i + 1) {
            draw_line(img, corner, next, color);
        }
    }
}

/// Writes annotated copies of successful images to `<root>/success/` and raw
/// copies of failed ones to `<root>/failure/`, keeping the source file name.
#[derive(Debug, Clone)]
pub struct DebugWriter {
    success_dir: PathBuf,
    failure_dir: PathBuf,
}

impl DebugWriter {
    pub fn new(root: &Path) -> Result<Self, CalibrationError> {
        let writer = DebugWriter {
            success_dir: root.join("success"),
            failure_dir: root.join("failure"),
        };
        ensure_dir(&writer.success_dir)?;
        ensure_dir(&writer.failure_dir)?;
        Ok(writer)
    }

    pub fn success_dir(&self) -> &Path {
        &self.success_dir
    }

    pub fn failure_dir(&self) -> &Path {
        &self.failure_dir
    }

    fn target(dir: &Path, source: &Path) -> Result<PathBuf, CalibrationError> {
        let name = source.file_name().ok_or_else(|| {
            CalibrationError::IOError(format!("{source:?} has no file name"))
        })?;
        Ok(dir.join(name))
    }

    pub fn write_success(
        &self,
        source: &Path,
        image: &DynamicImage,
        corners: &[Vector2<f64>],
        cols: usize,
    ) -> Result<PathBuf, CalibrationError> {
        let target = Self::target(&self.success_dir, source)?;
        let mut annotated = image.to_rgb8();
        draw_corners(&mut annotated, corners, cols);
        annotated.save(&target)?;
        Ok(target)
    }

    pub fn write_failure(
        &self,
        source: &Path,
        image: &DynamicImage,
    ) -> Result<PathBuf, CalibrationError> {
        let target = Self::target(&self.failure_dir, source)?;
        image.save(&target)?;
        Ok(target)
    }
}

/// Prints the run summary to stdout.
pub fn display_calibration_summary(outcome: &CalibrationOutcome) {
    let report = &outcome.report;
    println!("📷 Calibration summary");
    println!(
        "   Images: {} total, {} succeeded, {} failed",
        report.tally.total, report.tally.success, report.tally.failure
    );

    let camera = &outcome.result.camera;
    let k = &camera.intrinsics;
    println!("   Camera matrix:");
    println!("     [{:>12.4} {:>12.4} {:>12.4}]", k.fx, 0.0, k.cx);
    println!("     [{:>12.4} {:>12.4} {:>12.4}]", 0.0, k.fy, k.cy);
    println!("     [{:>12.4} {:>12.4} {:>12.4}]", 0.0, 0.0, 1.0);
    println!("   Distortion [k1, k2, p1, p2, k3]: {:?}", camera.distortions);
    println!("   Mean reprojection error: {:.6} px", report.mean_error);
    println!("   Solver RMS: {:.6} px", report.rms);

    if let Some(advisory) = &report.advisory {
        println!("⚠️  {advisory}");
    }
    for path in outcome.artifacts.iter() {
        println!("💾 Saved {}", path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageReader;

    #[test]
    fn test_draw_corners_marks_pixels() {
        let mut img = RgbImage::new(50, 50);
        let corners = vec![Vector2::new(10.0, 10.0), Vector2::new(30.0, 10.0)];
        draw_corners(&mut img, &corners, 2);
        assert_eq!(*img.get_pixel(20, 10), ROW_COLORS[0]);
        assert_eq!(*img.get_pixel(14, 10), ROW_COLORS[0]);
        assert_eq!(*img.get_pixel(40, 40), Rgb([0, 0, 0]));
    }

    #[test]
    fn test_draw_ignores_out_of_bounds() {
        let mut img = RgbImage::new(10, 10);
        draw_corners(&mut img, &[Vector2::new(-20.0, 50.0)], 1);
        assert!(img.pixels().all(|p| *p == Rgb([0, 0, 0])));
    }

    #[test]
    fn test_debug_writer_mirrors_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DebugWriter::new(&dir.path().join("debug")).unwrap();
        let image = DynamicImage::ImageRgb8(RgbImage::new(16, 16));

        let ok = writer
            .write_success(Path::new("/photos/a.png"), &image, &[Vector2::new(8.0, 8.0)], 1)
            .unwrap();
        let failed = writer
            .write_failure(Path::new("/photos/b.png"), &image)
            .unwrap();

        assert_eq!(ok, writer.success_dir().join("a.png"));
        assert_eq!(failed, writer.failure_dir().join("b.png"));
        let annotated = ImageReader::open(&ok).unwrap().decode().unwrap().to_rgb8();
        assert_ne!(*annotated.get_pixel(12, 8), Rgb([0, 0, 0]));
    }
}
