//! Assembly of corner candidates into the checkerboard lattice.

use std::collections::{HashMap, VecDeque};

use nalgebra::Vector2;

/// Accepted distance between a predicted and a detected corner, as a
/// fraction of the local grid step.
const MATCH_TOLERANCE: f64 = 0.35;
/// Seeds tried before giving up on an image.
const MAX_SEEDS: usize = 12;

type Lattice = HashMap<(i32, i32), usize>;

/// Orders candidate corners into a `cols × rows` grid.
///
/// Starting from seeds close to the centroid of all candidates, a lattice is
/// grown breadth-first: each neighbour position is predicted by extrapolating
/// the grid step and matched to the nearest unused candidate. The lattice must
/// end up as a complete `cols × rows` rectangle (or its transpose).
///
/// The returned points are row-major with `cols` points per row, the first
/// point being the corner nearest the image's top-left.
pub fn assemble_grid(points: &[Vector2<f64>], cols: usize, rows: usize) -> Option<Vec<Vector2<f64>>> {
    if cols == 0 || rows == 0 || points.len() < cols * rows {
        return None;
    }

    let centroid = points.iter().fold(Vector2::zeros(), |acc, p| acc + p) / points.len() as f64;
    let mut seeds: Vec<usize> = (0..points.len()).collect();
    seeds.sort_by(|&a, &b| {
        let da = (points[a] - centroid).norm_squared();
        let db = (points[b] - centroid).norm_squared();
        da.total_cmp(&db)
    });

    for &seed in seeds.iter().take(MAX_SEEDS) {
        let Some((step_i, step_j)) = seed_basis(points, seed) else {
            continue;
        };
        let lattice = grow_lattice(points, seed, step_i, step_j);
        if let Some(ordered) = extract_board(points, &lattice, cols, rows) {
            return Some(ordered);
        }
    }
    None
}

/// Two non-collinear steps from the seed to its nearest neighbours.
fn seed_basis(points: &[Vector2<f64>], seed: usize) -> Option<(Vector2<f64>, Vector2<f64>)> {
    let origin = points[seed];
    let mut others: Vec<(f64, usize)> = points
        .iter()
        .enumerate()
        .filter(|&(idx, _)| idx != seed)
        .map(|(idx, p)| ((p - origin).norm(), idx))
        .collect();
    others.sort_by(|a, b| a.0.total_cmp(&b.0));

    let &(a_len, a_idx) = others.first()?;
    if a_len < 1e-6 {
        return None;
    }
    let a = points[a_idx] - origin;

    for &(b_len, b_idx) in others.iter().skip(1) {
        if b_len > 2.0 * a_len {
            break;
        }
        let b = points[b_idx] - origin;
        let cos = a.dot(&b) / (a_len * b_len);
        if cos.abs() < 0.5 {
            return Some((a, b));
        }
    }
    None
}

fn grow_lattice(
    points: &[Vector2<f64>],
    seed: usize,
    step_i: Vector2<f64>,
    step_j: Vector2<f64>,
) -> Lattice {
    let mut lattice = Lattice::new();
    let mut used = vec![false; points.len()];
    lattice.insert((0, 0), seed);
    used[seed] = true;

    let mut queue = VecDeque::from([(0i32, 0i32)]);
    while let Some((i, j)) = queue.pop_front() {
        let here = points[lattice[&(i, j)]];
        for (di, dj) in [(1, 0), (-1, 0), (0, 1), (0, -1)] {
            let target = (i + di, j + dj);
            if lattice.contains_key(&target) {
                continue;
            }

            let step = predict_step(points, &lattice, (i, j), (di, dj), step_i, step_j);
            let predicted = here + step;
            let tolerance = MATCH_TOLERANCE * step.norm();

            if let Some(idx) = nearest_unused(points, &used, &predicted, tolerance) {
                lattice.insert(target, idx);
                used[idx] = true;
                queue.push_back(target);
            }
        }
    }
    lattice
}

/// Step from node `(i, j)` towards `(i + di, j + dj)`.
///
/// Preference order: extrapolation from the node behind, the same step on an
/// adjacent row or column, then the seed basis.
fn predict_step(
    points: &[Vector2<f64>],
    lattice: &Lattice,
    (i, j): (i32, i32),
    (di, dj): (i32, i32),
    step_i: Vector2<f64>,
    step_j: Vector2<f64>,
) -> Vector2<f64> {
    let position = |key: (i32, i32)| lattice.get(&key).map(|&idx| points[idx]);

    if let (Some(here), Some(behind)) = (position((i, j)), position((i - di, j - dj))) {
        return here - behind;
    }

    let (oi, oj) = (dj.abs(), di.abs());
    for side in [1, -1] {
        let from = (i + side * oi, j + side * oj);
        let to = (from.0 + di, from.1 + dj);
        if let (Some(f), Some(t)) = (position(from), position(to)) {
            return t - f;
        }
    }

    if di != 0 {
        step_i * di as f64
    } else {
        step_j * dj as f64
    }
}

fn nearest_unused(
    points: &[Vector2<f64>],
    used: &[bool],
    target: &Vector2<f64>,
    tolerance: f64,
) -> Option<usize> {
    points
        .iter()
        .enumerate()
        .filter(|&(idx, _)| !used[idx])
        .map(|(idx, p)| ((p - target).norm(), idx))
        .filter(|&(dist, _)| dist <= tolerance)
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, idx)| idx)
}

fn extract_board(
    points: &[Vector2<f64>],
    lattice: &Lattice,
    cols: usize,
    rows: usize,
) -> Option<Vec<Vector2<f64>>> {
    let i_min = lattice.keys().map(|k| k.0).min()?;
    let i_max = lattice.keys().map(|k| k.0).max()?;
    let j_min = lattice.keys().map(|k| k.1).min()?;
    let j_max = lattice.keys().map(|k| k.1).max()?;

    let width = (i_max - i_min + 1) as usize;
    let height = (j_max - j_min + 1) as usize;
    if lattice.len() != width * height {
        return None;
    }

    let at = |i: usize, j: usize| points[lattice[&(i_min + i as i32, j_min + j as i32)]];
    let mut layouts: Vec<Vec<Vec<Vector2<f64>>>> = Vec::new();
    if (width, height) == (cols, rows) {
        layouts.push((0..rows).map(|r| (0..cols).map(|c| at(c, r)).collect()).collect());
    }
    if (width, height) == (rows, cols) {
        layouts.push((0..rows).map(|r| (0..cols).map(|c| at(r, c)).collect()).collect());
    }

    layouts
        .into_iter()
        .flat_map(orientations)
        .min_by(|a, b| layout_rank(a).total_cmp(&layout_rank(b)))
        .map(|grid| grid.into_iter().flatten().collect())
}

/// The four mirrorings of a grid that keep its row length.
fn orientations(grid: Vec<Vec<Vector2<f64>>>) -> Vec<Vec<Vec<Vector2<f64>>>> {
    let flip_cols = |g: &Vec<Vec<Vector2<f64>>>| {
        g.iter()
            .map(|row| row.iter().rev().copied().collect())
            .collect::<Vec<Vec<_>>>()
    };
    let flip_rows = |g: &Vec<Vec<Vector2<f64>>>| g.iter().rev().cloned().collect::<Vec<_>>();

    let cols_flipped = flip_cols(&grid);
    vec![
        flip_rows(&grid),
        flip_rows(&cols_flipped),
        cols_flipped,
        grid,
    ]
}

/// Lower is better: the first corner nearest the top-left, ties broken towards
/// rows that run horizontally.
fn layout_rank(grid: &[Vec<Vector2<f64>>]) -> f64 {
    let first = grid[0][0];
    let row_dir = grid[0][grid[0].len() - 1] - first;
    let horizontal_penalty = if row_dir.x.abs() >= row_dir.y.abs() { 0.0 } else { 1e-3 };
    first.x + first.y + horizontal_penalty
}
