//! Configuration for the Halo bloom renderer.
//!
//! Settings persist to disk as `config.ron`, can be overridden from the
//! command line via clap, and are clamped into their valid ranges by
//! [`Config::validated`] before they reach the renderer.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{BloomConfig, CompositeConfig, Config, DebugConfig, RenderConfig};
pub use error::ConfigError;
