//! Top-level error type for the headless renderer.

use std::io;

use halo_config::ConfigError;
use halo_render::{BackendError, BloomError};

use crate::platform::PlatformError;

/// Anything that stops a frame from reaching disk.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("bloom pipeline failed: {0}")]
    Bloom(#[from] BloomError),

    #[error("graphics backend failed: {0}")]
    Backend(#[from] BackendError),

    #[error("failed to write image: {0}")]
    Io(#[from] io::Error),

    #[error("failed to encode PNG: {0}")]
    Encode(#[from] png::EncodingError),
}
