//! Error types for the bloom pipeline and the graphics backends beneath it.

use crate::backend::{FilterKind, FramebufferStatus, TextureFormat};

/// Errors raised by a [`GraphicsBackend`](crate::GraphicsBackend).
///
/// Allocation failures are returned directly; misuse during a frame (unknown
/// handles, drawing with nothing bound) is recorded by the backend and handed
/// out through `take_error`.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// A texture handle that was never created or was already deleted.
    #[error("unknown texture handle {0}")]
    UnknownTexture(u32),

    /// A framebuffer handle that was never created or was already deleted.
    #[error("unknown framebuffer handle {0}")]
    UnknownFramebuffer(u32),

    /// A program handle that was never created or was already deleted.
    #[error("unknown program handle {0}")]
    UnknownProgram(u32),

    /// A draw or uniform upload was issued without an active program.
    #[error("no program is in use")]
    NoProgramInUse,

    /// An attachment was changed while the default target was bound.
    #[error("no framebuffer is bound")]
    NoFramebufferBound,

    /// A draw targeted a framebuffer with no color attachment.
    #[error("framebuffer {0} has no color attachment")]
    MissingAttachment(u32),

    /// The backend could not build the program for a filter.
    #[error("failed to build {kind:?} program: {message}")]
    ShaderCompilation { kind: FilterKind, message: String },

    /// The backend rejected a texture allocation.
    #[error("failed to allocate {width}x{height} {format:?} texture")]
    TextureAllocation {
        width: u32,
        height: u32,
        format: TextureFormat,
    },

    /// Uploaded pixel data does not match the texture extent.
    #[error("texel data size ({actual}) does not match texture extent ({expected})")]
    DataSizeMismatch { actual: usize, expected: usize },

    /// Copying texels back from the device failed.
    #[error("texture readback failed: {0}")]
    Readback(String),
}

/// Errors raised while building or running the bloom pipeline.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BloomError {
    /// The requested resolution does not fit the signed texture dimension type.
    #[error("resolution {width}x{height} overflows the texture dimension range")]
    SizeOverflow { width: u32, height: u32 },

    /// The backend rejected the mip chain framebuffer.
    #[error("bloom framebuffer incomplete: {status:?}")]
    FramebufferIncomplete { status: FramebufferStatus },

    /// A mip chain needs at least one level.
    #[error("bloom mip chain needs at least one level")]
    EmptyMipChain,

    /// Rendering was requested before `init` succeeded.
    #[error("bloom pipeline is not initialized")]
    NotInitialized,

    /// The graphics backend reported a failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_overflow_message_names_resolution() {
        let err = BloomError::SizeOverflow {
            width: u32::MAX,
            height: 600,
        };
        assert!(err.to_string().contains("4294967295x600"));
    }

    #[test]
    fn test_backend_error_converts_transparently() {
        let err: BloomError = BackendError::UnknownTexture(7).into();
        assert_eq!(err.to_string(), "unknown texture handle 7");
        assert!(matches!(err, BloomError::Backend(BackendError::UnknownTexture(7))));
    }
}
