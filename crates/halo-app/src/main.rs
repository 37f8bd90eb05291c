//! The binary entry point for the Halo renderer.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use halo_app::frame::check_frame_size;
use halo_app::{AppError, HdrScene, PlatformDirs, render_frame};
use halo_config::{CliArgs, Config};
use tracing::{error, info};

const DEFAULT_OUTPUT: &str = "halo.png";

fn main() -> ExitCode {
    let args = CliArgs::parse();

    let dirs = match args.config.clone() {
        Some(config_dir) => PlatformDirs::with_config_dir(config_dir),
        None => match PlatformDirs::resolve() {
            Ok(dirs) => dirs,
            Err(e) => {
                eprintln!("Failed to resolve platform directories: {e}");
                return ExitCode::FAILURE;
            }
        },
    };
    if let Err(e) = dirs.create_dirs() {
        eprintln!("Failed to create platform directories: {e}");
        return ExitCode::FAILURE;
    }

    let mut config = Config::load_or_create(&dirs.config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);
    let config = config.validated();

    halo_log::init_logging(Some(&dirs.log_dir), cfg!(debug_assertions), Some(&config));

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT));

    match run(&config, &output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Render failed: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(config: &Config, output: &std::path::Path) -> Result<(), AppError> {
    info!(
        "Rendering {}x{} | bloom={} mips={} radius={} | choice={} exposure={}",
        config.render.width,
        config.render.height,
        config.bloom.enabled,
        config.bloom.mip_levels,
        config.bloom.filter_radius,
        config.composite.program_choice,
        config.composite.exposure,
    );

    let size = check_frame_size(config.render.width, config.render.height)?;
    let scene = HdrScene::synthetic(size.x, size.y);
    info!("Scene peak radiance {:.1}", scene.peak());

    let frame = render_frame(&scene, config)?;
    frame.write_png(output)
}
