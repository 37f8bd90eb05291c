//! Physically based bloom: a progressively halved mip chain filled by a
//! firefly-suppressing downsample and drained by an additive tent upsample,
//! plus the exposure/tone-mapping composite that consumes it.
//!
//! The core is written against [`GraphicsBackend`], an immediate-mode
//! single-context seam implemented both on the GPU ([`WgpuBackend`]) and on the
//! CPU ([`SoftwareBackend`]).

pub mod backend;
pub mod bloom;
pub mod composite;
pub mod downsample;
pub mod error;
pub mod filters;
pub mod mip_chain;
pub mod program;
pub mod shaders;
pub mod software;
pub mod upsample;
pub mod wgpu_backend;

pub use backend::{
    BlendMode, FilterKind, FilterMode, FramebufferHandle, FramebufferStatus, GraphicsBackend,
    ProgramHandle, TextureDesc, TextureFormat, TextureHandle, UniformValue, Viewport, WrapMode,
};
pub use bloom::{BloomPipeline, BloomSettings, DEFAULT_FILTER_RADIUS, DEFAULT_MIP_LEVELS};
pub use composite::{BloomBlend, CompositeSettings, Compositor};
pub use downsample::{DownsampleFilter, DownsampleStage};
pub use error::{BackendError, BloomError};
pub use mip_chain::{MipChainTargets, MipLevel};
pub use program::FilterProgram;
pub use software::SoftwareBackend;
pub use upsample::UpsampleStage;
pub use wgpu_backend::{WgpuBackend, WgpuBackendError, init_wgpu_backend_blocking};
