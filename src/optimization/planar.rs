//! Joint refinement of intrinsics, distortion and per-view poses from planar
//! checkerboard observations.
//!
//! The problem is built for `tiny_solver` with one residual block per view.
//! Parameter blocks are named `"intrinsics"` (`[fx, fy, cx, cy]`),
//! `"distortion"` (`[k1, k2, p1, p2, k3]`, optional) and `"pose_<i>"`
//! (`[rx, ry, rz, tx, ty, tz]`, Rodrigues rotation then translation).

use std::collections::HashMap;

use log::{debug, info};
use nalgebra::{convert, DVector, Matrix3, RealField, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use tiny_solver::factors::Factor;
use tiny_solver::optimizer::OptimizerOptions;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

use crate::camera::{CameraModel, CameraModelError, Intrinsics, RadTanModel, Resolution};
use crate::error::CalibrationError;
use crate::geometry::{estimate_homography, Pose};
use crate::optimization::linear::{estimate_intrinsics, pose_from_homography};
use crate::optimization::{Optimizer, SolverOptions};
use crate::pipeline::CorrespondenceSet;

const INTRINSICS_KEY: &str = "intrinsics";
const DISTORTION_KEY: &str = "distortion";

fn pose_key(view: usize) -> String {
    format!("pose_{view}")
}

/// Rotates `p` by the Rodrigues vector `r`.
fn rotate<T: RealField>(r: &Vector3<T>, p: &Vector3<T>) -> Vector3<T> {
    let theta_sq = r.norm_squared();
    if theta_sq > convert::<f64, T>(1e-16) {
        let theta = theta_sq.sqrt();
        let axis = r / theta.clone();
        let (sin, cos) = theta.sin_cos();
        let dot = axis.dot(p);
        p * cos.clone() + axis.cross(p) * sin + axis * (dot * (T::one() - cos))
    } else {
        // First order, keeps the derivative well defined at zero.
        p + r.cross(p)
    }
}

/// Reprojection residuals of one view.
#[derive(Debug, Clone)]
struct PlanarViewCost {
    board_points: Vec<Vector3<f64>>,
    observed: Vec<Vector2<f64>>,
    with_distortion: bool,
}

impl<T: RealField> Factor<T> for PlanarViewCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let intrinsics = &params[0];
        let fx = intrinsics[0].clone();
        let fy = intrinsics[1].clone();
        let cx = intrinsics[2].clone();
        let cy = intrinsics[3].clone();

        let (distortion, pose) = if self.with_distortion {
            (Some(&params[1]), &params[2])
        } else {
            (None, &params[1])
        };
        let rotation = Vector3::new(pose[0].clone(), pose[1].clone(), pose[2].clone());
        let translation = Vector3::new(pose[3].clone(), pose[4].clone(), pose[5].clone());

        let two: T = convert(2.0);
        let mut residuals = DVector::zeros(self.observed.len() * 2);

        for (i, (point, observed)) in self.board_points.iter().zip(&self.observed).enumerate() {
            let p: Vector3<T> = Vector3::new(convert(point.x), convert(point.y), convert(point.z));
            let pc = rotate(&rotation, &p) + &translation;
            let x = pc.x.clone() / pc.z.clone();
            let y = pc.y.clone() / pc.z.clone();

            let (xd, yd) = match distortion {
                Some(d) => {
                    let (k1, k2, p1, p2, k3) =
                        (d[0].clone(), d[1].clone(), d[2].clone(), d[3].clone(), d[4].clone());
                    let r2 = x.clone() * x.clone() + y.clone() * y.clone();
                    let r4 = r2.clone() * r2.clone();
                    let r6 = r4.clone() * r2.clone();
                    let radial = T::one() + k1 * r2.clone() + k2 * r4 + k3 * r6;
                    let xy = x.clone() * y.clone();
                    let xd = x.clone() * radial.clone()
                        + two.clone() * p1.clone() * xy.clone()
                        + p2.clone() * (r2.clone() + two.clone() * x.clone() * x.clone());
                    let yd = y.clone() * radial
                        + p1 * (r2 + two.clone() * y.clone() * y.clone())
                        + two.clone() * p2 * xy;
                    (xd, yd)
                }
                None => (x, y),
            };

            let u = fx.clone() * xd + cx.clone();
            let v = fy.clone() * yd + cy.clone();
            residuals[i * 2] = u - convert::<f64, T>(observed.x);
            residuals[i * 2 + 1] = v - convert::<f64, T>(observed.y);
        }
        residuals
    }
}

/// Calibration problem over all views of a [`CorrespondenceSet`].
///
/// [`Optimizer::linear_estimation`] must run before [`Optimizer::optimize`]:
/// it provides the starting intrinsics and the per-view poses.
#[derive(Clone)]
pub struct PlanarCalibrationCost {
    model: RadTanModel,
    poses: Vec<Pose>,
    board_points: Vec<Vector3<f64>>,
    observations: Vec<Vec<Vector2<f64>>>,
    options: SolverOptions,
}

impl PlanarCalibrationCost {
    pub fn new(set: &CorrespondenceSet, resolution: Resolution, options: SolverOptions) -> Self {
        let model = RadTanModel::from_parts(
            Intrinsics {
                fx: 1.0,
                fy: 1.0,
                cx: resolution.width as f64 * 0.5,
                cy: resolution.height as f64 * 0.5,
            },
            resolution,
            [0.0; 5],
        );
        PlanarCalibrationCost {
            model,
            poses: Vec::new(),
            board_points: set.board_points().to_vec(),
            observations: set.views().iter().map(|v| v.corners.points.clone()).collect(),
            options,
        }
    }

    pub fn model(&self) -> &RadTanModel {
        &self.model
    }

    pub fn poses(&self) -> &[Pose] {
        &self.poses
    }

    /// Per-view reprojection residual vectors `projected − observed`.
    pub fn residuals(&self) -> Result<Vec<Vec<Vector2<f64>>>, CameraModelError> {
        let mut residuals = Vec::with_capacity(self.poses.len());
        for (pose, observed) in self.poses.iter().zip(&self.observations) {
            let mut view = Vec::with_capacity(observed.len());
            for (point, o) in self.board_points.iter().zip(observed) {
                view.push(self.model.project(&pose.transform(point))? - o);
            }
            residuals.push(view);
        }
        Ok(residuals)
    }

    /// `sqrt(Σ‖r‖² / N)` over every observed point.
    pub fn rms(&self) -> Result<f64, CameraModelError> {
        let residuals = self.residuals()?;
        let count: usize = residuals.iter().map(Vec::len).sum();
        if count == 0 {
            return Ok(0.0);
        }
        let sum_sq: f64 = residuals.iter().flatten().map(|r| r.norm_squared()).sum();
        Ok((sum_sq / count as f64).sqrt())
    }
}

impl Optimizer for PlanarCalibrationCost {
    fn optimize(&mut self, verbose: bool) -> Result<(), CameraModelError> {
        if self.observations.is_empty() {
            return Err(CameraModelError::InvalidParams(
                "no views to optimize".to_string(),
            ));
        }
        if self.poses.len() != self.observations.len() {
            return Err(CameraModelError::InvalidParams(
                "linear estimation must run before optimization".to_string(),
            ));
        }

        let with_distortion = self.options.refine_distortion;
        let mut problem = tiny_solver::Problem::new();
        let mut initial_values = HashMap::new();

        let intrinsics = &self.model.intrinsics;
        initial_values.insert(
            INTRINSICS_KEY.to_string(),
            DVector::from_vec(vec![intrinsics.fx, intrinsics.fy, intrinsics.cx, intrinsics.cy]),
        );
        if with_distortion {
            initial_values.insert(
                DISTORTION_KEY.to_string(),
                DVector::from_row_slice(&self.model.distortions),
            );
        }

        for (view, (pose, observed)) in self.poses.iter().zip(&self.observations).enumerate() {
            let key = pose_key(view);
            let cost = PlanarViewCost {
                board_points: self.board_points.clone(),
                observed: observed.clone(),
                with_distortion,
            };
            let blocks: Vec<&str> = if with_distortion {
                vec![INTRINSICS_KEY, DISTORTION_KEY, key.as_str()]
            } else {
                vec![INTRINSICS_KEY, key.as_str()]
            };
            problem.add_residual_block(observed.len() * 2, &blocks, Box::new(cost), None);
            initial_values.insert(key, DVector::from_vec(pose.to_params()));
        }

        let message = format!(
            "Starting Levenberg-Marquardt over {} views ({} distortion)",
            self.observations.len(),
            if with_distortion { "with" } else { "without" }
        );
        if verbose {
            info!("{message}");
        } else {
            debug!("{message}");
        }

        let options = OptimizerOptions {
            max_iteration: self.options.max_iterations,
            ..OptimizerOptions::default()
        };
        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(&problem, &initial_values, Some(options))
            .ok_or_else(|| CameraModelError::NumericalError("Optimization failed".to_string()))?;

        let block = |key: &str| {
            result.get(key).ok_or_else(|| {
                CameraModelError::NumericalError(format!("solver returned no `{key}` block"))
            })
        };

        let k = block(INTRINSICS_KEY)?;
        self.model.intrinsics = Intrinsics {
            fx: k[0],
            fy: k[1],
            cx: k[2],
            cy: k[3],
        };
        if with_distortion {
            let d = block(DISTORTION_KEY)?;
            self.model.distortions = [d[0], d[1], d[2], d[3], d[4]];
        }
        for (view, pose) in self.poses.iter_mut().enumerate() {
            *pose = Pose::from_params(block(&pose_key(view))?.as_slice())?;
        }

        self.model.validate_params()?;

        if verbose {
            info!("Optimization finished: {:?}", self.model);
        }
        Ok(())
    }

    fn linear_estimation(&mut self) -> Result<(), CameraModelError>
    where
        Self: Sized,
    {
        let world: Vec<Vector2<f64>> = self
            .board_points
            .iter()
            .map(|p| Vector2::new(p.x, p.y))
            .collect();

        let homographies = self
            .observations
            .iter()
            .map(|observed| estimate_homography(&world, observed))
            .collect::<Result<Vec<Matrix3<f64>>, _>>()?;

        let intrinsics = estimate_intrinsics(&homographies, &self.model.resolution)?;
        debug!("Initial intrinsics: {intrinsics:?}");

        self.poses = homographies
            .iter()
            .map(|h| pose_from_homography(&intrinsics, h))
            .collect::<Result<_, _>>()?;
        self.model.intrinsics = intrinsics;
        self.model.distortions = [0.0; 5];
        Ok(())
    }
}

/// Solved camera and the pose of every view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub camera: RadTanModel,
    pub poses: Vec<Pose>,
    /// Root-mean-square reprojection distance over all points, in pixels.
    pub rms: f64,
}

impl CalibrationResult {
    pub fn camera_matrix(&self) -> Matrix3<f64> {
        self.camera.camera_matrix()
    }

    pub fn distortion(&self) -> [f64; 5] {
        self.camera.distortions
    }
}

/// Calibrates the camera from every view of `set`.
///
/// # Errors
///
/// * [`CalibrationError::NoDetections`] if `set` is empty.
/// * [`CalibrationError::Numerical`] if initialisation or refinement fails.
pub fn calibrate_camera(
    set: &CorrespondenceSet,
    resolution: Resolution,
    options: &SolverOptions,
) -> Result<CalibrationResult, CalibrationError> {
    if set.is_empty() {
        return Err(CalibrationError::NoDetections { total: 0 });
    }

    let numerical = |e: CameraModelError| CalibrationError::Numerical(e.to_string());

    let mut cost = PlanarCalibrationCost::new(set, resolution, *options);
    cost.linear_estimation().map_err(numerical)?;
    debug!("RMS after linear estimation: {:.4}", cost.rms().map_err(numerical)?);

    cost.optimize(options.verbose).map_err(numerical)?;
    let rms = cost.rms().map_err(numerical)?;
    info!("Calibration converged, RMS reprojection error {rms:.4} px");

    Ok(CalibrationResult {
        camera: cost.model,
        poses: cost.poses,
        rms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardGeometry;
    use crate::detection::DetectedCorners;
    use crate::synthetic;
    use approx::assert_relative_eq;
    use std::path::PathBuf;

    fn synthetic_set(
        camera: &RadTanModel,
        board: &BoardGeometry,
        views: usize,
    ) -> CorrespondenceSet {
        let mut set = CorrespondenceSet::new(board);
        for (i, pose) in synthetic::default_poses(board, views).iter().enumerate() {
            let points = synthetic::project_board(camera, board, pose).unwrap();
            set.push(PathBuf::from(format!("view_{i}.png")), DetectedCorners { points })
                .unwrap();
        }
        set
    }

    #[test]
    fn test_rotate_matches_nalgebra() {
        let r = Vector3::new(0.3, -0.2, 0.5);
        let p = Vector3::new(1.0, 2.0, 3.0);
        let expected = nalgebra::Rotation3::new(r) * p;
        assert_relative_eq!(rotate(&r, &p), expected, epsilon = 1e-12);
        assert_relative_eq!(rotate(&Vector3::zeros(), &p), p);
    }

    #[test]
    fn test_view_cost_is_zero_at_truth() {
        let camera = synthetic::default_camera();
        let board = BoardGeometry::new(5, 4).unwrap();
        let pose = synthetic::default_poses(&board, 1)[0];
        let observed = synthetic::project_board(&camera, &board, &pose).unwrap();

        let cost = PlanarViewCost {
            board_points: board.board_points(),
            observed,
            with_distortion: true,
        };
        let k = &camera.intrinsics;
        let params = vec![
            DVector::from_vec(vec![k.fx, k.fy, k.cx, k.cy]),
            DVector::from_row_slice(&camera.distortions),
            DVector::from_vec(pose.to_params()),
        ];
        let residuals: DVector<f64> = cost.residual_func(&params);
        assert_eq!(residuals.len(), board.corner_count() * 2);
        assert!(residuals.amax() < 1e-9);
    }

    #[test]
    fn test_calibrate_recovers_known_camera() {
        let camera = synthetic::default_camera();
        let board = BoardGeometry::default();
        let set = synthetic_set(&camera, &board, 8);

        let result = calibrate_camera(&set, camera.resolution, &SolverOptions::default()).unwrap();
        let k = &result.camera.intrinsics;
        assert_relative_eq!(k.fx, camera.intrinsics.fx, max_relative = 0.01);
        assert_relative_eq!(k.fy, camera.intrinsics.fy, max_relative = 0.01);
        assert_relative_eq!(k.cx, camera.intrinsics.cx, epsilon = 2.0);
        assert_relative_eq!(k.cy, camera.intrinsics.cy, epsilon = 2.0);
        assert!(result.rms < 0.01, "rms = {}", result.rms);
        assert_eq!(result.poses.len(), 8);
    }

    #[test]
    fn test_calibrate_recovers_distortion() {
        let mut camera = synthetic::default_camera();
        camera.distortions = [-0.12, 0.05, 0.001, -0.0005, 0.0];
        let board = BoardGeometry::default();
        let set = synthetic_set(&camera, &board, 10);

        let result = calibrate_camera(&set, camera.resolution, &SolverOptions::default()).unwrap();
        assert!(result.rms < 0.01, "rms = {}", result.rms);
        assert_relative_eq!(result.distortion()[0], -0.12, epsilon = 0.01);
    }

    #[test]
    fn test_calibrate_without_distortion_keeps_zero() {
        let camera = synthetic::default_camera();
        let board = BoardGeometry::default();
        let set = synthetic_set(&camera, &board, 4);
        let options = SolverOptions {
            refine_distortion: false,
            ..SolverOptions::default()
        };

        let result = calibrate_camera(&set, camera.resolution, &options).unwrap();
        assert_eq!(result.distortion(), [0.0; 5]);
        assert_relative_eq!(
            result.camera.intrinsics.fx,
            camera.intrinsics.fx,
            max_relative = 0.01
        );
    }

    #[test]
    fn test_calibrate_single_view_uses_centered_initialisation() {
        let camera = synthetic::default_camera();
        let board = BoardGeometry::default();
        let set = synthetic_set(&camera, &board, 1);
        let options = SolverOptions {
            refine_distortion: false,
            ..SolverOptions::default()
        };

        let result = calibrate_camera(&set, camera.resolution, &options).unwrap();
        assert!(result.camera.intrinsics.fx > 0.0);
        assert_eq!(result.poses.len(), 1);
    }

    #[test]
    fn test_calibrate_empty_set() {
        let board = BoardGeometry::default();
        let set = CorrespondenceSet::new(&board);
        let resolution = Resolution {
            width: 640,
            height: 480,
        };
        assert!(matches!(
            calibrate_camera(&set, resolution, &SolverOptions::default()),
            Err(CalibrationError::NoDetections { total: 0 })
        ));
    }
}
