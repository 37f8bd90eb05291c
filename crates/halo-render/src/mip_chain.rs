//! The bloom mip chain: a fixed-length sequence of progressively halved HDR
//! render targets sharing one framebuffer whose color attachment is swapped
//! between passes.

use glam::{UVec2, Vec2};

use crate::backend::{
    FramebufferHandle, FramebufferStatus, GraphicsBackend, TextureDesc, TextureFormat,
    TextureHandle,
};
use crate::error::BloomError;

/// One rung of the mip chain.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MipLevel {
    /// Fractional size, used for texel-size math in the filters.
    pub size: Vec2,
    /// Integer size. May reach zero on deep levels of small sources.
    pub pixel_size: UVec2,
    /// Render target owned by the chain.
    pub texture: TextureHandle,
}

impl MipLevel {
    /// Allocated texture extent: `pixel_size` with each component at least 1.
    pub fn extent(&self) -> UVec2 {
        self.pixel_size.max(UVec2::ONE)
    }
}

/// Owns the mip textures and the shared framebuffer.
#[derive(Debug)]
pub struct MipChainTargets {
    format: TextureFormat,
    framebuffer: Option<FramebufferHandle>,
    mips: Vec<MipLevel>,
}

impl MipChainTargets {
    /// An uninitialized chain that will allocate `format` textures.
    pub fn new(format: TextureFormat) -> Self {
        Self {
            format,
            framebuffer: None,
            mips: Vec::new(),
        }
    }

    pub fn format(&self) -> TextureFormat {
        self.format
    }

    pub fn is_initialized(&self) -> bool {
        self.framebuffer.is_some()
    }

    /// The shared framebuffer, once initialized.
    pub fn framebuffer(&self) -> Option<FramebufferHandle> {
        self.framebuffer
    }

    /// Allocate `level_count` mips below a `width` x `height` source.
    ///
    /// Level `i` is `floor(source / 2^(i+1))`. A second call on an initialized
    /// chain returns `Ok` without reallocating. On failure nothing stays
    /// allocated and the default framebuffer is bound.
    pub fn initialize<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
        level_count: u32,
    ) -> Result<(), BloomError> {
        if self.is_initialized() {
            return Ok(());
        }
        if level_count == 0 {
            return Err(BloomError::EmptyMipChain);
        }
        if i32::try_from(width).is_err() || i32::try_from(height).is_err() {
            log::error!("Resolution {width}x{height} overflows texture dimensions, cannot build bloom mip chain");
            return Err(BloomError::SizeOverflow { width, height });
        }

        let framebuffer = backend.create_framebuffer()?;
        backend.bind_framebuffer(Some(framebuffer));

        let mut mips = Vec::with_capacity(level_count as usize);
        let mut size = Vec2::new(width as f32, height as f32);
        let mut pixel_size = UVec2::new(width, height);

        for i in 0..level_count {
            size *= 0.5;
            pixel_size /= 2;

            let desc = TextureDesc::render_target(
                format!("bloom-mip-{i}"),
                pixel_size.max(UVec2::ONE),
                self.format,
            );
            let texture = match backend.create_texture(&desc) {
                Ok(texture) => texture,
                Err(err) => {
                    release(backend, framebuffer, &mips);
                    return Err(err.into());
                }
            };

            log::debug!("Created bloom mip {i}: {}x{}", pixel_size.x, pixel_size.y);
            mips.push(MipLevel {
                size,
                pixel_size,
                texture,
            });
        }

        backend.attach_color(mips[0].texture);
        let status = backend.framebuffer_status();
        backend.bind_framebuffer(None);

        if status != FramebufferStatus::Complete {
            log::error!("Bloom framebuffer incomplete: {status:?}");
            release(backend, framebuffer, &mips);
            return Err(BloomError::FramebufferIncomplete { status });
        }

        self.framebuffer = Some(framebuffer);
        self.mips = mips;
        Ok(())
    }

    /// Release every mip and the framebuffer. Safe to call repeatedly.
    pub fn destroy<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        for mip in self.mips.drain(..) {
            backend.delete_texture(mip.texture);
        }
        if let Some(framebuffer) = self.framebuffer.take() {
            backend.delete_framebuffer(framebuffer);
        }
    }

    /// Make the shared framebuffer the active render target.
    pub fn bind_for_writing<B: GraphicsBackend + ?Sized>(&self, backend: &mut B) {
        if let Some(framebuffer) = self.framebuffer {
            backend.bind_framebuffer(Some(framebuffer));
        }
    }

    /// Levels ordered largest first. Empty until initialized.
    pub fn mip_chain(&self) -> &[MipLevel] {
        &self.mips
    }
}

fn release<B: GraphicsBackend + ?Sized>(
    backend: &mut B,
    framebuffer: FramebufferHandle,
    mips: &[MipLevel],
) {
    for mip in mips {
        backend.delete_texture(mip.texture);
    }
    backend.delete_framebuffer(framebuffer);
}
