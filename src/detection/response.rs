//! Dense ChESS corner response and candidate extraction.
//!
//! The response is evaluated on a 16-sample ring of radius 5 around every
//! pixel. Opposite ring samples of an X-junction share the same colour while
//! samples a quarter turn apart differ, which the "sum" term rewards and the
//! "diff" term (edges) penalises:
//!
//! ```text
//! R = Σ_{n<4} |I_n + I_{n+8} − I_{n+4} − I_{n+12}|
//!   − Σ_{n<8} |I_n − I_{n+8}|
//!   − 16 · |ring mean − local mean|
//! ```

use image::GrayImage;
use nalgebra::Vector2;

pub const RING_RADIUS: usize = 5;

/// Ring offsets `(dx, dy)`, clockwise from the top. Sample `n + 8` is opposite
/// sample `n`, sample `n + 4` is a quarter turn away.
const RING: [(i32, i32); 16] = [
    (0, -5),
    (2, -5),
    (3, -3),
    (5, -2),
    (5, 0),
    (5, 2),
    (3, 3),
    (2, 5),
    (0, 5),
    (-2, 5),
    (-3, 3),
    (-5, 2),
    (-5, 0),
    (-5, -2),
    (-3, -3),
    (-2, -5),
];

/// Dense response map with the same size as the source image. Pixels closer
/// than [`RING_RADIUS`] to the border are zero.
#[derive(Debug, Clone)]
pub struct ResponseMap {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl ResponseMap {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(f32::MIN, f32::max)
    }
}

/// A local response maximum that may be a checkerboard corner.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub position: Vector2<f64>,
    pub response: f32,
}

pub fn chess_response(image: &GrayImage) -> ResponseMap {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let mut data = vec![0.0f32; width * height];

    if width <= 2 * RING_RADIUS || height <= 2 * RING_RADIUS {
        return ResponseMap {
            width,
            height,
            data,
        };
    }

    let raw = image.as_raw();
    let pixel = |x: usize, y: usize| raw[y * width + x] as f32;

    for y in RING_RADIUS..height - RING_RADIUS {
        for x in RING_RADIUS..width - RING_RADIUS {
            let mut samples = [0.0f32; 16];
            for (sample, (dx, dy)) in samples.iter_mut().zip(RING.iter()) {
                *sample = pixel((x as i32 + dx) as usize, (y as i32 + dy) as usize);
            }

            let sum_response: f32 = (0..4)
                .map(|n| (samples[n] + samples[n + 8] - samples[n + 4] - samples[n + 12]).abs())
                .sum();
            let diff_response: f32 = (0..8).map(|n| (samples[n] - samples[n + 8]).abs()).sum();

            let ring_mean = samples.iter().sum::<f32>() / 16.0;
            let local_mean = (pixel(x, y)
                + pixel(x - 1, y)
                + pixel(x + 1, y)
                + pixel(x, y - 1)
                + pixel(x, y + 1))
                / 5.0;

            data[y * width + x] =
                sum_response - diff_response - 16.0 * (ring_mean - local_mean).abs();
        }
    }

    ResponseMap {
        width,
        height,
        data,
    }
}

/// Extracts corner candidates: strict 3×3 maxima above
/// `threshold_rel · max(R)`, refined by the response-weighted centroid of their
/// 3×3 neighbourhood, then greedily suppressed within `nms_radius` pixels.
///
/// The result is sorted by decreasing response.
pub fn find_candidates(map: &ResponseMap, threshold_rel: f32, nms_radius: u32) -> Vec<Candidate> {
    let max_response = map.max();
    if max_response <= 0.0 || map.width < 3 || map.height < 3 {
        return Vec::new();
    }
    let threshold = max_response * threshold_rel;

    let mut peaks = Vec::new();
    for y in 1..map.height - 1 {
        for x in 1..map.width - 1 {
            let value = map.at(x, y);
            if value <= threshold || !is_local_maximum(map, x, y) {
                continue;
            }

            let mut weight = 0.0f64;
            let mut cx = 0.0f64;
            let mut cy = 0.0f64;
            for ny in y - 1..=y + 1 {
                for nx in x - 1..=x + 1 {
                    let r = map.at(nx, ny).max(0.0) as f64;
                    weight += r;
                    cx += r * nx as f64;
                    cy += r * ny as f64;
                }
            }

            peaks.push(Candidate {
                position: Vector2::new(cx / weight, cy / weight),
                response: value,
            });
        }
    }

    peaks.sort_by(|a, b| b.response.total_cmp(&a.response));

    let radius_sq = (nms_radius as f64).powi(2);
    let mut accepted: Vec<Candidate> = Vec::new();
    for peak in peaks {
        if accepted
            .iter()
            .all(|a| (a.position - peak.position).norm_squared() > radius_sq)
        {
            accepted.push(peak);
        }
    }
    accepted
}

/// Plateau ties are broken towards the earlier pixel in raster order so that a
/// flat peak yields a single maximum.
fn is_local_maximum(map: &ResponseMap, x: usize, y: usize) -> bool {
    let value = map.at(x, y);
    for ny in y - 1..=y + 1 {
        for nx in x - 1..=x + 1 {
            if nx == x && ny == y {
                continue;
            }
            let other = map.at(nx, ny);
            let earlier = (ny, nx) < (y, x);
            if other > value || (other == value && earlier) {
                return false;
            }
        }
    }
    true
}
