//! The graphics-context seam the bloom core is written against.
//!
//! [`GraphicsBackend`] models a single immediate-mode context: one bound
//! framebuffer, one viewport, one program in use, a blend state, and numbered
//! texture slots. Handles are opaque and owned by whoever created them.

use glam::{UVec2, Vec2};

use crate::error::BackendError;

/// Opaque handle to a 2D texture owned by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub(crate) u32);

/// Opaque handle to an off-screen render surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferHandle(pub(crate) u32);

/// Opaque handle to a compiled filter program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub(crate) u32);

impl TextureHandle {
    /// Raw id, for logging.
    pub fn id(self) -> u32 {
        self.0
    }
}

impl FramebufferHandle {
    /// Raw id, for logging.
    pub fn id(self) -> u32 {
        self.0
    }
}

impl ProgramHandle {
    /// Raw id, for logging.
    pub fn id(self) -> u32 {
        self.0
    }
}

/// Texel formats the pipeline allocates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    /// Packed unsigned float RGB, no alpha. The default mip format.
    Rg11b10Float,
    /// Half-float RGBA.
    Rgba16Float,
    /// 8-bit normalized RGBA (display targets).
    Rgba8Unorm,
}

impl TextureFormat {
    /// Whether the format stores values above 1.0.
    pub fn is_hdr(self) -> bool {
        matches!(self, Self::Rg11b10Float | Self::Rgba16Float)
    }
}

/// Texture minification/magnification filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Texture coordinate wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WrapMode {
    ClampToEdge,
    Repeat,
}

/// Description of a texture allocation.
#[derive(Debug, Clone, PartialEq)]
pub struct TextureDesc {
    pub label: String,
    /// Extent in texels. Both components must be non-zero.
    pub size: UVec2,
    pub format: TextureFormat,
    pub filter: FilterMode,
    pub wrap: WrapMode,
}

impl TextureDesc {
    /// A linearly filtered, edge-clamped render target.
    pub fn render_target(label: impl Into<String>, size: UVec2, format: TextureFormat) -> Self {
        Self {
            label: label.into(),
            size,
            format,
            filter: FilterMode::Linear,
            wrap: WrapMode::ClampToEdge,
        }
    }
}

/// Result of a framebuffer completeness check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramebufferStatus {
    Complete,
    /// No color attachment (or no framebuffer bound).
    MissingAttachment,
    /// The attachment exists but cannot be rendered to (e.g. zero extent).
    IncompleteAttachment,
    /// The attachment format is not renderable on this backend.
    UnsupportedFormat,
}

/// Rectangle of the render target that draws cover, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Viewport {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// A viewport anchored at the origin.
    pub fn from_size(size: UVec2) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.x,
            height: size.y,
        }
    }

    /// Width and height as a vector.
    pub fn size(&self) -> UVec2 {
        UVec2::new(self.width, self.height)
    }
}

/// Framebuffer blend configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    /// `dst = src * 1 + dst * 1`.
    Additive,
}

/// The filter programs a backend knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// 13-tap downsample with optional Karis average.
    Downsample,
    /// 3x3 tent upsample.
    Upsample,
    /// Scene + bloom exposure tone mapping.
    Composite,
}

/// Value of a named program uniform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2(Vec2),
}

/// A single graphics context driven from one thread.
///
/// Per-frame operations do not return errors; misuse is recorded and reported
/// by [`take_error`](Self::take_error), mirroring how GPU APIs surface errors
/// asynchronously.
pub trait GraphicsBackend {
    /// Allocate an uninitialized texture.
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, BackendError>;

    /// Release a texture. Releasing an unknown handle records an error.
    fn delete_texture(&mut self, texture: TextureHandle);

    /// Allocated extent of a live texture.
    fn texture_size(&self, texture: TextureHandle) -> Option<UVec2>;

    /// Allocate an off-screen framebuffer with no attachments.
    fn create_framebuffer(&mut self) -> Result<FramebufferHandle, BackendError>;

    /// Release a framebuffer, unbinding it if current. Releasing an unknown
    /// handle records an error.
    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle);

    /// Make `framebuffer` the render target; `None` selects the default target.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);

    /// The currently bound framebuffer, `None` for the default target.
    fn bound_framebuffer(&self) -> Option<FramebufferHandle>;

    /// Replace the sole color attachment of the bound framebuffer.
    fn attach_color(&mut self, texture: TextureHandle);

    /// Completeness of the bound framebuffer.
    fn framebuffer_status(&self) -> FramebufferStatus;

    fn set_viewport(&mut self, viewport: Viewport);

    fn viewport(&self) -> Viewport;

    /// Bind `texture` as the sampled input in `slot`.
    fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>);

    /// Enable (`Some`) or disable (`None`) blending.
    fn set_blend(&mut self, blend: Option<BlendMode>);

    /// Current blend state.
    fn blend(&self) -> Option<BlendMode>;

    /// Build the program for a filter.
    fn create_program(&mut self, kind: FilterKind) -> Result<ProgramHandle, BackendError>;

    /// Release a program. Releasing an unknown handle records an error.
    fn delete_program(&mut self, program: ProgramHandle);

    /// Make `program` current for subsequent draws.
    fn use_program(&mut self, program: Option<ProgramHandle>);

    /// Set a named uniform on `program`. Unknown names are ignored.
    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: UniformValue);

    /// Draw a quad covering the viewport with the current program.
    fn draw_fullscreen_quad(&mut self);

    /// First error recorded since the previous call, clearing it.
    fn take_error(&mut self) -> Option<BackendError>;
}
