//! Iterative sub-pixel corner refinement.
//!
//! At a true corner `q`, the image gradient `g(p)` at any nearby pixel `p` is
//! orthogonal to `p − q`. Each iteration solves the weighted least-squares
//! system `Σ w·g·gᵀ · q = Σ w·g·gᵀ · p` over a square window.

use image::GrayImage;
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

/// Termination criteria for [`refine_corner`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubPixCriteria {
    /// Half-size of the search window, in pixels.
    pub window_radius: u32,
    pub max_iterations: usize,
    /// Stop once a single update moves the estimate less than this many pixels.
    pub epsilon: f64,
}

impl Default for SubPixCriteria {
    fn default() -> Self {
        SubPixCriteria {
            window_radius: 11,
            max_iterations: 30,
            epsilon: 0.001,
        }
    }
}

fn sample(image: &GrayImage, x: f64, y: f64) -> f64 {
    let max_x = (image.width() - 1) as f64;
    let max_y = (image.height() - 1) as f64;
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);

    let x0 = x.floor();
    let y0 = y.floor();
    let fx = x - x0;
    let fy = y - y0;
    let x0 = x0 as u32;
    let y0 = y0 as u32;
    let x1 = (x0 + 1).min(image.width() - 1);
    let y1 = (y0 + 1).min(image.height() - 1);

    let p = |x: u32, y: u32| image.get_pixel(x, y)[0] as f64;
    let top = p(x0, y0) * (1.0 - fx) + p(x1, y0) * fx;
    let bottom = p(x0, y1) * (1.0 - fx) + p(x1, y1) * fx;
    top * (1.0 - fy) + bottom * fy
}

/// Refines one corner estimate to sub-pixel accuracy.
///
/// If the iteration drifts further than `window_radius` from `initial` in
/// either axis, the initial estimate is returned unchanged.
pub fn refine_corner(
    image: &GrayImage,
    initial: &Vector2<f64>,
    criteria: &SubPixCriteria,
) -> Vector2<f64> {
    if image.width() < 3 || image.height() < 3 || criteria.window_radius == 0 {
        return *initial;
    }

    let win = criteria.window_radius as i32;
    let win_f = criteria.window_radius as f64;
    let eps_sq = criteria.epsilon * criteria.epsilon;

    // Gaussian weights, separable in x and y.
    let weights: Vec<f64> = (-win..=win)
        .map(|d| {
            let t = d as f64 / win_f;
            (-t * t).exp()
        })
        .collect();

    let mut current = *initial;
    for _ in 0..criteria.max_iterations {
        let (mut a, mut b, mut c) = (0.0, 0.0, 0.0);
        let (mut bb1, mut bb2) = (0.0, 0.0);

        for (row, dy) in (-win..=win).enumerate() {
            for (col, dx) in (-win..=win).enumerate() {
                let px = current.x + dx as f64;
                let py = current.y + dy as f64;

                let gx = 0.5 * (sample(image, px + 1.0, py) - sample(image, px - 1.0, py));
                let gy = 0.5 * (sample(image, px, py + 1.0) - sample(image, px, py - 1.0));
                let m = weights[row] * weights[col];

                let gxx = gx * gx * m;
                let gxy = gx * gy * m;
                let gyy = gy * gy * m;

                a += gxx;
                b += gxy;
                c += gyy;
                bb1 += gxx * dx as f64 + gxy * dy as f64;
                bb2 += gxy * dx as f64 + gyy * dy as f64;
            }
        }

        let det = a * c - b * b;
        if det.abs() <= f64::EPSILON {
            break;
        }
        let shift = Vector2::new((c * bb1 - b * bb2) / det, (a * bb2 - b * bb1) / det);
        current += shift;

        if shift.norm_squared() <= eps_sq {
            break;
        }
    }

    let drift = current - initial;
    if !current.iter().all(|v| v.is_finite()) || drift.x.abs() > win_f || drift.y.abs() > win_f {
        return *initial;
    }
    current
}

/// Refines every corner in place.
pub fn refine_corners(image: &GrayImage, corners: &mut [Vector2<f64>], criteria: &SubPixCriteria) {
    for corner in corners.iter_mut() {
        *corner = refine_corner(image, corner, criteria);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    /// Anti-aliased X-junction at a sub-pixel location.
    fn junction(size: u32, cx: f64, cy: f64) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            let mut acc: f64 = 0.0;
            for sy in 0..4 {
                for sx in 0..4 {
                    let px = x as f64 + (sx as f64 + 0.5) / 4.0 - 0.5;
                    let py = y as f64 + (sy as f64 + 0.5) / 4.0 - 0.5;
                    let dark = (px < cx) == (py < cy);
                    acc += if dark { 30.0 } else { 220.0 };
                }
            }
            Luma([(acc / 16.0).round() as u8])
        })
    }

    #[test]
    fn test_refine_converges_to_subpixel_corner() {
        let image = junction(48, 23.3, 24.6);
        let refined = refine_corner(&image, &Vector2::new(22.0, 26.0), &SubPixCriteria::default());
        assert!((refined.x - 23.3).abs() < 0.1, "x = {}", refined.x);
        assert!((refined.y - 24.6).abs() < 0.1, "y = {}", refined.y);
    }

    #[test]
    fn test_flat_patch_keeps_initial_estimate() {
        let image = GrayImage::from_pixel(40, 40, Luma([100]));
        let initial = Vector2::new(20.0, 20.0);
        assert_eq!(
            refine_corner(&image, &initial, &SubPixCriteria::default()),
            initial
        );
    }

    #[test]
    fn test_refine_corners_updates_in_place() {
        let image = junction(48, 24.4, 23.7);
        let mut corners = vec![Vector2::new(24.0, 24.0)];
        refine_corners(&image, &mut corners, &SubPixCriteria::default());
        assert!((corners[0].x - 24.4).abs() < 0.1);
        assert!((corners[0].y - 23.7).abs() < 0.1);
    }
}
