//! Checkerboard calibration tool
//!
//! Usage:
//! ```bash
//! checkerboard-calib calibrate --input images --output calib --debug-dir debug --report
//! checkerboard-calib undistort --camera-matrix calib/cameraMatrix.yaml \
//!   --dist calib/dist.yaml --input photo.png --output photo_undistorted.png
//! ```

use std::path::PathBuf;

use checkerboard_calib::config::CalibrationConfig;
use checkerboard_calib::{pipeline, undistort, util};
use clap::{Parser, Subcommand};
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{error, info};

/// Camera calibration from checkerboard photographs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Calibrate from a directory of checkerboard images
    Calibrate {
        /// Directory of calibration images (searched recursively)
        #[arg(short = 'i', long)]
        input: Option<PathBuf>,

        /// Directory for calibration.yaml, cameraMatrix.yaml and dist.yaml
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,

        /// Directory for annotated success/ and failure/ copies
        #[arg(short = 'd', long)]
        debug_dir: Option<PathBuf>,

        /// YAML run configuration; flags override its values
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,

        /// Inner corners per board row
        #[arg(long)]
        cols: Option<usize>,

        /// Inner corners per board column
        #[arg(long)]
        rows: Option<usize>,

        /// Side length of a board square
        #[arg(long)]
        square_size: Option<f64>,

        /// Also write report.csv and report.json
        #[arg(long)]
        report: bool,
    },
    /// Undistort an image with saved calibration artifacts
    Undistort {
        /// Path to cameraMatrix.yaml
        #[arg(long)]
        camera_matrix: PathBuf,

        /// Path to dist.yaml
        #[arg(long)]
        dist: PathBuf,

        #[arg(short = 'i', long)]
        input: PathBuf,

        #[arg(short = 'o', long)]
        output: PathBuf,
    },
}

#[allow(clippy::too_many_arguments)]
fn build_config(
    input: Option<PathBuf>,
    output: Option<PathBuf>,
    debug_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    cols: Option<usize>,
    rows: Option<usize>,
    square_size: Option<f64>,
    report: bool,
) -> Result<CalibrationConfig, Box<dyn std::error::Error>> {
    let mut config = match config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            CalibrationConfig::from_yaml_file(&path)?
        }
        None => CalibrationConfig::default(),
    };

    if let Some(input) = input {
        config.input_dir = input;
    }
    if let Some(output) = output {
        config.output_dir = output;
    }
    if debug_dir.is_some() {
        config.debug_dir = debug_dir;
    }
    if let Some(cols) = cols {
        config.board.inner_corners_x = cols;
    }
    if let Some(rows) = rows {
        config.board.inner_corners_y = rows;
    }
    if let Some(square_size) = square_size {
        config.board.square_size = square_size;
    }
    config.write_report |= report;
    Ok(config)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger with info level filter
    Logger::try_with_env_or_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();

    match cli.command {
        Command::Calibrate {
            input,
            output,
            debug_dir,
            config,
            cols,
            rows,
            square_size,
            report,
        } => {
            let config = build_config(
                input,
                output,
                debug_dir,
                config,
                cols,
                rows,
                square_size,
                report,
            )?;
            info!("Input directory: {:?}", config.input_dir);
            info!("Output directory: {:?}", config.output_dir);
            info!(
                "Board: {}x{} inner corners, square size {}",
                config.board.inner_corners_x, config.board.inner_corners_y, config.board.square_size
            );

            match pipeline::run(&config) {
                Ok(outcome) => util::display_calibration_summary(&outcome),
                Err(e) => {
                    error!("Calibration failed: {e}");
                    return Err(e.into());
                }
            }
        }
        Command::Undistort {
            camera_matrix,
            dist,
            input,
            output,
        } => {
            undistort::undistort_file(&camera_matrix, &dist, &input, &output)?;
            println!("💾 Saved {}", output.display());
        }
    }

    Ok(())
}
