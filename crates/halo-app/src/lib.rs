//! Headless Halo renderer: renders a synthetic HDR scene through the bloom
//! pipeline and writes the tone-mapped result as PNG.

pub mod error;
pub mod frame;
pub mod platform;
pub mod scene;

pub use error::AppError;
pub use frame::{Frame, render_frame};
pub use platform::PlatformDirs;
pub use scene::HdrScene;
