//! Final composite: combines the HDR scene with the bloom texture, applies
//! exposure tone mapping and gamma, and writes the default render target.

use glam::Vec3;

use crate::backend::{FilterKind, GraphicsBackend, TextureHandle, Viewport};
use crate::error::{BackendError, BloomError};
use crate::program::FilterProgram;

/// Texture slot the HDR scene is sampled from.
pub const SCENE_SLOT: u32 = 0;
/// Texture slot the bloom texture is sampled from.
pub const BLOOM_SLOT: u32 = 1;

/// How the bloom texture is folded into the scene before tone mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BloomBlend {
    /// Scene only; the bloom texture is ignored.
    SceneOnly,
    /// `scene + bloom`.
    Additive,
    /// `mix(scene, bloom, strength)`, energy preserving.
    #[default]
    Mix,
}

impl BloomBlend {
    /// Map the integer program selector (1, 2, 3) onto a blend mode.
    /// Out-of-range selectors fall back to [`BloomBlend::SceneOnly`].
    pub fn from_program_choice(choice: i32) -> Self {
        match choice {
            2 => Self::Additive,
            3 => Self::Mix,
            _ => Self::SceneOnly,
        }
    }

    /// Integer selector uploaded to the composite program.
    pub fn program_choice(self) -> i32 {
        match self {
            Self::SceneOnly => 1,
            Self::Additive => 2,
            Self::Mix => 3,
        }
    }

    /// Combine one scene and bloom texel.
    pub fn apply(self, scene: Vec3, bloom: Vec3, strength: f32) -> Vec3 {
        match self {
            Self::SceneOnly => scene,
            Self::Additive => scene + bloom,
            Self::Mix => scene.lerp(bloom, strength),
        }
    }
}

/// Per-frame composite parameters. Build a new value to change them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositeSettings {
    /// When false the bloom texture is ignored regardless of `mode`.
    pub bloom: bool,
    pub exposure: f32,
    pub mode: BloomBlend,
    /// Bloom weight for [`BloomBlend::Mix`].
    pub bloom_strength: f32,
    pub gamma: f32,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        Self {
            bloom: true,
            exposure: 1.0,
            mode: BloomBlend::Mix,
            bloom_strength: 0.04,
            gamma: 2.2,
        }
    }
}

impl CompositeSettings {
    /// Blend mode after applying the `bloom` toggle.
    pub fn effective_mode(&self) -> BloomBlend {
        if self.bloom {
            self.mode
        } else {
            BloomBlend::SceneOnly
        }
    }

    /// A copy with exposure moved by `delta`, never below zero.
    pub fn with_exposure_step(self, delta: f32) -> Self {
        Self {
            exposure: (self.exposure + delta).max(0.0),
            ..self
        }
    }
}

/// Owns the composite program.
#[derive(Debug, Default)]
pub struct Compositor {
    program: Option<FilterProgram>,
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.program.is_some()
    }

    /// Build the composite program and fix its sampler slots. Idempotent.
    pub fn init<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) -> Result<(), BackendError> {
        if self.program.is_some() {
            return Ok(());
        }
        let program = FilterProgram::new(backend, FilterKind::Composite)?;
        program.set_int(backend, "scene", SCENE_SLOT as i32);
        program.set_int(backend, "bloomBlur", BLOOM_SLOT as i32);
        self.program = Some(program);
        Ok(())
    }

    /// Draw `scene` (plus `bloom`, when given) into the default render target
    /// covering `viewport`. Errors the backend recorded during the draw are
    /// returned as [`BloomError::Backend`].
    pub fn composite<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        scene: TextureHandle,
        bloom: Option<TextureHandle>,
        viewport: Viewport,
        settings: &CompositeSettings,
    ) -> Result<(), BloomError> {
        let Some(program) = self.program else {
            return Err(BloomError::NotInitialized);
        };

        let mode = if bloom.is_some() {
            settings.effective_mode()
        } else {
            BloomBlend::SceneOnly
        };

        backend.bind_framebuffer(None);
        backend.set_viewport(viewport);
        program.bind(backend);
        program.set_int(backend, "programChoice", mode.program_choice());
        program.set_float(backend, "exposure", settings.exposure);
        program.set_float(backend, "bloomStrength", settings.bloom_strength);
        program.set_float(backend, "gamma", settings.gamma);
        backend.bind_texture(SCENE_SLOT, Some(scene));
        backend.bind_texture(BLOOM_SLOT, bloom);
        backend.draw_fullscreen_quad();
        backend.use_program(None);

        match backend.take_error() {
            Some(err) => {
                log::error!("Backend error during composite: {err}");
                Err(err.into())
            }
            None => Ok(()),
        }
    }

    /// Release the program. Safe to call repeatedly.
    pub fn destroy<B: GraphicsBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(program) = self.program.take() {
            program.delete(backend);
        }
    }
}
