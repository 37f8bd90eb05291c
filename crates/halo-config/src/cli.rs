//! Command-line argument parsing for the Halo renderer.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Halo command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "halo", about = "Physically based bloom renderer")]
pub struct CliArgs {
    /// Frame width.
    #[arg(long)]
    pub width: Option<u32>,

    /// Frame height.
    #[arg(long)]
    pub height: Option<u32>,

    /// Upsample filter radius in UV units.
    #[arg(long)]
    pub radius: Option<f32>,

    /// Exposure applied before tone mapping.
    #[arg(long)]
    pub exposure: Option<f32>,

    /// Composite blend: 1 = scene only, 2 = additive, 3 = mix.
    #[arg(long)]
    pub program_choice: Option<i32>,

    /// Number of bloom mip levels.
    #[arg(long)]
    pub mip_levels: Option<u32>,

    /// Enable or disable bloom.
    #[arg(long)]
    pub bloom: Option<bool>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Where to write the rendered PNG.
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(w) = args.width {
            self.render.width = w;
        }
        if let Some(h) = args.height {
            self.render.height = h;
        }
        if let Some(radius) = args.radius {
            self.bloom.filter_radius = radius;
        }
        if let Some(exposure) = args.exposure {
            self.composite.exposure = exposure;
        }
        if let Some(choice) = args.program_choice {
            self.composite.program_choice = choice;
        }
        if let Some(levels) = args.mip_levels {
            self.bloom.mip_levels = levels;
        }
        if let Some(enabled) = args.bloom {
            self.bloom.enabled = enabled;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
