//! Progressive upsample: each smaller mip is tent-filtered and added onto the
//! next larger one, smallest first.

use crate::backend::{BlendMode, GraphicsBackend, Viewport};
use crate::mip_chain::MipLevel;
use crate::program::FilterProgram;

/// Texture slot the upsample filter samples from.
pub const SOURCE_SLOT: u32 = 0;

/// Additive blending for as long as the guard lives.
struct AdditiveBlend<'b, B: GraphicsBackend + ?Sized> {
    backend: &'b mut B,
}

impl<'b, B: GraphicsBackend + ?Sized> AdditiveBlend<'b, B> {
    fn enable(backend: &'b mut B) -> Self {
        backend.set_blend(Some(BlendMode::Additive));
        Self { backend }
    }
}

impl<B: GraphicsBackend + ?Sized> Drop for AdditiveBlend<'_, B> {
    fn drop(&mut self) {
        self.backend.set_blend(None);
    }
}

/// Accumulates the mip chain back into its largest level.
#[derive(Debug, Clone, Copy)]
pub struct UpsampleStage<'a> {
    program: &'a FilterProgram,
}

impl<'a> UpsampleStage<'a> {
    pub fn new(program: &'a FilterProgram) -> Self {
        Self { program }
    }

    /// For `i` from the last level down to 1, add a tent-filtered `chain[i]`
    /// into `chain[i - 1]`.
    ///
    /// `filter_radius` is in UV units of the level being sampled. Negative
    /// and NaN radii are treated as zero. The chain's framebuffer must
    /// already be bound. Blending is disabled again on return.
    pub fn run<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        chain: &[MipLevel],
        filter_radius: f32,
    ) {
        let radius = if !(filter_radius >= 0.0) {
            log::warn!("Invalid bloom filter radius {filter_radius}, using 0");
            0.0
        } else {
            filter_radius
        };

        let program = self.program;
        program.bind(backend);
        program.set_float(backend, "filterRadius", radius);

        {
            let blend = AdditiveBlend::enable(backend);
            for pair in chain.windows(2).rev() {
                let (next, mip) = (&pair[0], &pair[1]);

                blend.backend.bind_texture(SOURCE_SLOT, Some(mip.texture));
                blend.backend.set_viewport(Viewport::from_size(next.extent()));
                blend.backend.attach_color(next.texture);
                blend.backend.draw_fullscreen_quad();
            }
        }

        backend.use_program(None);
    }
}
