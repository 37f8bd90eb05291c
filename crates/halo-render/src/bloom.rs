//! Physically based bloom orchestration.
//!
//! [`BloomPipeline`] owns the mip chain and both filter programs. Each frame
//! it downsamples an HDR source through the chain, accumulates the chain back
//! up with additive tent filtering, and leaves the result in mip 0 for the
//! [`Compositor`](crate::Compositor) to fold into the scene. It performs no
//! tone mapping itself.

use glam::{UVec2, Vec2};

use crate::backend::{FilterKind, GraphicsBackend, TextureFormat, TextureHandle, Viewport};
use crate::downsample::DownsampleStage;
use crate::error::BloomError;
use crate::mip_chain::{MipChainTargets, MipLevel};
use crate::program::FilterProgram;
use crate::upsample::UpsampleStage;

/// Mip levels allocated by default.
pub const DEFAULT_MIP_LEVELS: u32 = 6;

/// Default upsample tap spacing in UV units.
pub const DEFAULT_FILTER_RADIUS: f32 = 0.005;

/// Construction-time bloom parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BloomSettings {
    /// Length of the mip chain. Must be at least 1.
    pub mip_levels: u32,
    /// Apply the Karis average on the first downsample step.
    pub karis_average: bool,
    /// Format of every mip texture.
    pub mip_format: TextureFormat,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            mip_levels: DEFAULT_MIP_LEVELS,
            karis_average: true,
            mip_format: TextureFormat::Rg11b10Float,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct BloomPrograms {
    downsample: FilterProgram,
    upsample: FilterProgram,
}

impl BloomPrograms {
    fn build<B: GraphicsBackend + ?Sized>(backend: &mut B) -> Result<Self, BloomError> {
        let downsample = FilterProgram::new(backend, FilterKind::Downsample)?;
        let upsample = match FilterProgram::new(backend, FilterKind::Upsample) {
            Ok(program) => program,
            Err(err) => {
                downsample.delete(backend);
                return Err(err.into());
            }
        };

        // Both filters read slot 0 for the whole lifetime of the program.
        downsample.set_int(backend, "srcTexture", 0);
        upsample.set_int(backend, "srcTexture", 0);

        Ok(Self {
            downsample,
            upsample,
        })
    }

    fn delete<B: GraphicsBackend + ?Sized>(self, backend: &mut B) {
        self.downsample.delete(backend);
        self.upsample.delete(backend);
    }
}

/// Mip-chain bloom over a [`GraphicsBackend`].
///
/// All GPU resources are long-lived: `init` allocates them once and
/// `render_bloom_texture` performs no allocation. Resources are released by
/// [`destroy`](Self::destroy), which needs the backend that created them.
#[derive(Debug)]
pub struct BloomPipeline {
    settings: BloomSettings,
    targets: MipChainTargets,
    programs: Option<BloomPrograms>,
    source_viewport: Viewport,
    source_size: Vec2,
}

impl Default for BloomPipeline {
    fn default() -> Self {
        Self::new(BloomSettings::default())
    }
}

impl BloomPipeline {
    /// An uninitialized pipeline.
    pub fn new(settings: BloomSettings) -> Self {
        Self {
            settings,
            targets: MipChainTargets::new(settings.mip_format),
            programs: None,
            source_viewport: Viewport::default(),
            source_size: Vec2::ZERO,
        }
    }

    pub fn settings(&self) -> &BloomSettings {
        &self.settings
    }

    pub fn is_initialized(&self) -> bool {
        self.programs.is_some() && self.targets.is_initialized()
    }

    /// Allocate the mip chain and build both filter programs for a
    /// `width` x `height` source. Calling it again while initialized is a no-op.
    ///
    /// On failure nothing stays allocated and the pipeline remains
    /// uninitialized.
    pub fn init<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<(), BloomError> {
        if self.is_initialized() {
            log::debug!("Bloom pipeline already initialized, ignoring init");
            return Ok(());
        }

        self.targets
            .initialize(backend, width, height, self.settings.mip_levels)?;

        let programs = match BloomPrograms::build(backend) {
            Ok(programs) => programs,
            Err(err) => {
                log::error!("Failed to build bloom programs: {err}");
                self.targets.destroy(backend);
                return Err(err);
            }
        };

        self.programs = Some(programs);
        self.source_viewport = Viewport::from_size(UVec2::new(width, height));
        self.source_size = Vec2::new(width as f32, height as f32);

        log::info!(
            "Bloom pipeline initialized: {width}x{height}, {} mips, {:?}",
            self.settings.mip_levels,
            self.settings.mip_format
        );
        Ok(())
    }

    /// Run the downsample and upsample stages over `source`.
    ///
    /// Afterwards the default framebuffer is bound and the viewport equals
    /// the one recorded at `init`. Errors the backend recorded during the
    /// frame are returned as [`BloomError::Backend`].
    pub fn render_bloom_texture<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        source: TextureHandle,
        filter_radius: f32,
    ) -> Result<(), BloomError> {
        let Some(programs) = self.programs else {
            return Err(BloomError::NotInitialized);
        };
        let chain = self.targets.mip_chain();

        self.targets.bind_for_writing(backend);

        DownsampleStage::new(&programs.downsample).run(
            backend,
            source,
            self.source_size,
            chain,
            self.settings.karis_average,
        );
        UpsampleStage::new(&programs.upsample).run(backend, chain, filter_radius);

        backend.bind_framebuffer(None);
        backend.set_viewport(self.source_viewport);

        match backend.take_error() {
            Some(err) => {
                log::error!("Backend error during bloom render: {err}");
                Err(err.into())
            }
            None => Ok(()),
        }
    }

    /// The finished bloom buffer (mip 0).
    pub fn bloom_texture(&self) -> Option<TextureHandle> {
        self.targets.mip_chain().first().map(|mip| mip.texture)
    }

    /// Mip `index`, clamped into the chain. `None` only when uninitialized.
    pub fn bloom_mip(&self, index: i64) -> Option<TextureHandle> {
        let chain = self.targets.mip_chain();
        let last = chain.len().checked_sub(1)?;
        let clamped = usize::try_from(index.max(0)).map_or(last, |i| i.min(last));
        Some(chain[clamped].texture)
    }

    /// Levels ordered largest first. Empty until initialized.
    pub fn mip_chain(&self) -> &[MipLevel] {
        self.targets.mip_chain()
    }

    /// Viewport restored after every render.
    pub fn source_viewport(&self) -> Viewport {
        self.source_viewport
    }

    /// Rebuild the mip chain for a new source size, keeping the programs.
    ///
    /// If the new chain cannot be allocated, the programs are released as
    /// well and the pipeline is left uninitialized.
    pub fn resize<B: GraphicsBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        width: u32,
        height: u32,
    ) -> Result<(), BloomError> {
        if !self.is_initialized() {
            return self.init(backend, width, height);
        }

        self.targets.destroy(backend);
        if let Err(err) = self
            .targets
            .initialize(backend, width, height, self.settings.mip_levels)
        {
            if let Some(programs) = self.programs.take() {
                programs.delete(backend);
            }
            return Err(err);
        }

        self.source_viewport = Viewport::from_size(UVec2::new(width, height));
        self.source_size = Vec2::new(width as f32, height as f32);
        log::info!("Bloom pipeline resized to {width}x{height}");
        Ok(())
    }

    /// Release the mip chain and programs. Safe to call repeatedly.
    pub fn destroy<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        let was_initialized = self.is_initialized();
        if let Some(programs) = self.programs.take() {
            programs.delete(backend);
        }
        self.targets.destroy(backend);
        if was_initialized {
            log::info!("Bloom pipeline destroyed");
        }
    }
}

impl Drop for BloomPipeline {
    fn drop(&mut self) {
        if self.is_initialized() {
            log::warn!("BloomPipeline dropped without destroy, backend resources leaked");
        }
    }
}
