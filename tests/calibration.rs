//! End-to-end runs of the calibration pipeline on synthetic data.

use std::path::{Path, PathBuf};

use approx::assert_relative_eq;
use checkerboard_calib::board::BoardGeometry;
use checkerboard_calib::config::CalibrationConfig;
use checkerboard_calib::detection::DetectedCorners;
use checkerboard_calib::optimization::{calibrate_camera, SolverOptions};
use checkerboard_calib::persistence::{self, load_camera_settings};
use checkerboard_calib::pipeline::{
    self, collect_correspondences, CorrespondenceSet, ImageOutcome, ImageTally,
};
use checkerboard_calib::report::QualityReport;
use checkerboard_calib::synthetic;
use checkerboard_calib::CalibrationError;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn write_blank_images(dir: &Path, count: usize) -> Vec<PathBuf> {
    let resolution = synthetic::default_camera().resolution;
    (0..count)
        .map(|i| {
            let path = dir.join(format!("blank_{i}.png"));
            synthetic::blank_image(resolution).save(&path).unwrap();
            path
        })
        .collect()
}

fn config_for(input: &Path, output: &Path) -> CalibrationConfig {
    CalibrationConfig {
        input_dir: input.to_path_buf(),
        output_dir: output.to_path_buf(),
        ..CalibrationConfig::default()
    }
}

fn assert_no_artifacts(dir: &Path) {
    for file in [
        persistence::CALIBRATION_FILE,
        persistence::CAMERA_MATRIX_FILE,
        persistence::DISTORTION_FILE,
    ] {
        assert!(!dir.join(file).exists(), "{file} must not be written");
    }
}

#[test]
fn test_exact_correspondences_recover_camera() {
    init_logger();
    let camera = synthetic::default_camera();
    let board = BoardGeometry::default();
    let mut set = CorrespondenceSet::new(&board);
    for (i, pose) in synthetic::default_poses(&board, 10).iter().enumerate() {
        let points = synthetic::project_board(&camera, &board, pose).unwrap();
        set.push(PathBuf::from(format!("{i}.png")), DetectedCorners { points })
            .unwrap();
    }

    let result = calibrate_camera(&set, camera.resolution, &SolverOptions::default()).unwrap();
    assert_relative_eq!(result.camera.intrinsics.fx, 500.0, max_relative = 0.01);
    assert_relative_eq!(result.camera.intrinsics.fy, 500.0, max_relative = 0.01);
    assert!(result.rms < 0.01, "rms = {}", result.rms);

    let tally = ImageTally {
        total: set.len(),
        success: set.len(),
        failure: 0,
    };
    let report = QualityReport::compute(&set, &result, tally, 10).unwrap();
    assert_eq!(report.per_image.len(), 10);
    assert!(report.mean_error < 0.01, "mean = {}", report.mean_error);
    assert!(report.advisory.is_none());
}

#[test]
fn test_run_with_twelve_boards_and_three_blanks() {
    init_logger();
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let camera = synthetic::default_camera();
    let board = BoardGeometry::default();
    let poses = synthetic::default_poses(&board, 12);
    synthetic::write_board_images(input.path(), &camera, &board, &poses).unwrap();
    write_blank_images(input.path(), 3);

    let mut config = config_for(input.path(), output.path());
    config.write_report = true;
    let outcome = pipeline::run(&config).unwrap();

    assert_eq!(
        outcome.report.tally,
        ImageTally {
            total: 15,
            success: 12,
            failure: 3
        }
    );
    assert!(outcome.report.advisory.is_none());
    assert_eq!(outcome.report.per_image.len(), 12);
    assert!(outcome.report.mean_error < 0.1, "mean = {}", outcome.report.mean_error);
    assert!(outcome.artifacts.iter().all(|p| p.exists()));
    assert_eq!(outcome.report_files.len(), 2);

    let k = &outcome.result.camera.intrinsics;
    assert_relative_eq!(k.fx, 500.0, max_relative = 0.02);
    assert_relative_eq!(k.fy, 500.0, max_relative = 0.02);
    assert_relative_eq!(k.cx, 320.0, epsilon = 8.0);
    assert_relative_eq!(k.cy, 240.0, epsilon = 8.0);

    let loaded = load_camera_settings(
        &outcome.artifacts.camera_matrix,
        &outcome.artifacts.distortion,
    )
    .unwrap();
    assert_eq!(loaded.intrinsics, outcome.result.camera.intrinsics);
    assert_eq!(loaded.distortions, outcome.result.camera.distortions);
}

#[test]
fn test_few_detections_raise_advisory() {
    init_logger();
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let camera = synthetic::default_camera();
    let board = BoardGeometry::default();
    let poses = synthetic::default_poses(&board, 4);
    synthetic::write_board_images(input.path(), &camera, &board, &poses).unwrap();

    let outcome = pipeline::run(&config_for(input.path(), output.path())).unwrap();
    let advisory = outcome.report.advisory.unwrap();
    assert_eq!(advisory.success, 4);
    assert_eq!(advisory.recommended, 10);
    assert!(outcome.report_files.is_empty());
}

#[test]
fn test_all_failing_images_write_nothing() {
    init_logger();
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    write_blank_images(input.path(), 5);

    let result = pipeline::run(&config_for(input.path(), output.path()));
    assert!(matches!(
        result,
        Err(CalibrationError::NoDetections { total: 5 })
    ));
    assert_no_artifacts(output.path());
}

#[test]
fn test_empty_input_directory() {
    init_logger();
    let input = tempfile::tempdir().unwrap();
    let output = tempfile::tempdir().unwrap();
    let config = config_for(input.path(), output.path());

    let collection = collect_correspondences(&config).unwrap();
    assert_eq!(collection.tally, ImageTally::default());
    assert!(collection.set.is_empty());

    assert!(matches!(
        pipeline::run(&config),
        Err(CalibrationError::NoDetections { total: 0 })
    ));
    assert_no_artifacts(output.path());
}

#[test]
fn test_debug_directory_sorts_images() {
    init_logger();
    let input = tempfile::tempdir().unwrap();
    let scratch = tempfile::tempdir().unwrap();
    let camera = synthetic::default_camera();
    let board = BoardGeometry::default();
    let poses = synthetic::default_poses(&board, 2);
    synthetic::write_board_images(input.path(), &camera, &board, &poses).unwrap();
    std::fs::write(input.path().join("notes.txt"), "not an image").unwrap();
    write_blank_images(input.path(), 1);

    let debug_dir = scratch.path().join("debug");
    let mut config = config_for(input.path(), &scratch.path().join("out"));
    config.debug_dir = Some(debug_dir.clone());

    let collection = collect_correspondences(&config).unwrap();
    assert_eq!(
        collection.tally,
        ImageTally {
            total: 4,
            success: 2,
            failure: 2
        }
    );
    assert!(debug_dir.join("success").join("board_000.png").exists());
    assert!(debug_dir.join("success").join("board_001.png").exists());
    assert!(debug_dir.join("failure").join("blank_0.png").exists());
    // Undecodable files have nothing to copy.
    assert!(!debug_dir.join("failure").join("notes.txt").exists());
    assert_eq!(collection.resolution, Some(camera.resolution));

    let outcomes: Vec<(String, &ImageOutcome)> = collection
        .images
        .iter()
        .map(|image| {
            let name = image.path.file_name().unwrap().to_string_lossy().into_owned();
            (name, &image.outcome)
        })
        .collect();
    assert_eq!(outcomes.len(), 4);
    assert_eq!(outcomes[0], ("blank_0.png".to_string(), &ImageOutcome::NotFound));
    assert_eq!(outcomes[1], ("board_000.png".to_string(), &ImageOutcome::Detected));
    assert_eq!(outcomes[2], ("board_001.png".to_string(), &ImageOutcome::Detected));
    assert_eq!(outcomes[3].0, "notes.txt");
    assert!(matches!(outcomes[3].1, ImageOutcome::Undecodable(_)));
    assert_eq!(collection.images[3].resolution, None);
    assert_eq!(collection.images[1].resolution, Some(camera.resolution));
}
