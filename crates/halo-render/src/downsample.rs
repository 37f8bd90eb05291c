//! Progressive downsample from the HDR source into every mip, largest first.

use glam::Vec2;

use crate::backend::{GraphicsBackend, TextureHandle, Viewport};
use crate::mip_chain::MipLevel;
use crate::program::FilterProgram;

/// Texture slot the downsample filter samples from.
pub const SOURCE_SLOT: u32 = 0;

/// Averaging applied by one downsample draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownsampleFilter {
    /// Weighted 13-tap average.
    PlainAverage,
    /// 13-tap average with luminance-weighted groups, for the first step only.
    KarisAverage,
}

impl DownsampleFilter {
    /// Value of the program's `mipLevel` uniform.
    pub fn mip_level_uniform(self) -> i32 {
        match self {
            Self::KarisAverage => 0,
            Self::PlainAverage => 1,
        }
    }

    /// Filter for draw `index` of a downsample run.
    pub fn for_step(index: usize, karis_on_first: bool) -> Self {
        if index == 0 && karis_on_first {
            Self::KarisAverage
        } else {
            Self::PlainAverage
        }
    }
}

/// Fills the mip chain from a source image.
#[derive(Debug, Clone, Copy)]
pub struct DownsampleStage<'a> {
    program: &'a FilterProgram,
}

impl<'a> DownsampleStage<'a> {
    pub fn new(program: &'a FilterProgram) -> Self {
        Self { program }
    }

    /// Draw `source` into `chain[0]`, then each mip into the next smaller one.
    ///
    /// The chain's framebuffer must already be bound. `source_resolution` is
    /// the source's float size; afterwards each level's `size` takes its place.
    pub fn run<B: GraphicsBackend + ?Sized>(
        &self,
        backend: &mut B,
        source: TextureHandle,
        source_resolution: Vec2,
        chain: &[MipLevel],
        karis_on_first: bool,
    ) {
        let program = self.program;
        program.bind(backend);
        program.set_vec2(backend, "srcResolution", source_resolution);
        backend.bind_texture(SOURCE_SLOT, Some(source));

        for (i, mip) in chain.iter().enumerate() {
            let filter = DownsampleFilter::for_step(i, karis_on_first);
            program.set_int(backend, "mipLevel", filter.mip_level_uniform());

            backend.set_viewport(Viewport::from_size(mip.extent()));
            backend.attach_color(mip.texture);
            backend.draw_fullscreen_quad();

            // This mip is the next draw's input.
            program.set_vec2(backend, "srcResolution", mip.size);
            backend.bind_texture(SOURCE_SLOT, Some(mip.texture));
        }

        backend.use_program(None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{FilterKind, TextureDesc, TextureFormat, UniformValue};
    use crate::mip_chain::MipChainTargets;
    use crate::software::SoftwareBackend;
    use glam::UVec2;

    fn setup(levels: u32) -> (SoftwareBackend, MipChainTargets, FilterProgram, TextureHandle) {
        let mut backend = SoftwareBackend::new(64, 32).with_draw_log();
        let mut targets = MipChainTargets::new(TextureFormat::Rg11b10Float);
        targets.initialize(&mut backend, 64, 32, levels).unwrap();
        let program = FilterProgram::new(&mut backend, FilterKind::Downsample).unwrap();
        let source = backend
            .create_texture(&TextureDesc::render_target(
                "scene",
                UVec2::new(64, 32),
                TextureFormat::Rgba16Float,
            ))
            .unwrap();
        (backend, targets, program, source)
    }

    #[test]
    fn test_filter_for_step() {
        assert_eq!(DownsampleFilter::for_step(0, true), DownsampleFilter::KarisAverage);
        assert_eq!(DownsampleFilter::for_step(1, true), DownsampleFilter::PlainAverage);
        assert_eq!(DownsampleFilter::for_step(0, false), DownsampleFilter::PlainAverage);
    }

    #[test]
    fn test_draws_every_mip_in_order_from_previous_level() {
        let (mut backend, targets, program, source) = setup(4);
        targets.bind_for_writing(&mut backend);
        DownsampleStage::new(&program).run(
            &mut backend,
            source,
            Vec2::new(64.0, 32.0),
            targets.mip_chain(),
            true,
        );

        let draws = backend.draws();
        let chain = targets.mip_chain();
        assert_eq!(draws.len(), chain.len());
        for (i, draw) in draws.iter().enumerate() {
            assert_eq!(draw.target, Some(chain[i].texture));
            assert_eq!(draw.viewport, Viewport::from_size(chain[i].extent()));
            let expected_source = if i == 0 { source } else { chain[i - 1].texture };
            assert_eq!(draw.source(SOURCE_SLOT), Some(expected_source));
            assert_eq!(draw.blend, None);
        }
        assert_eq!(backend.take_error(), None);
    }

    #[test]
    fn test_karis_only_on_first_draw() {
        let (mut backend, targets, program, source) = setup(3);
        targets.bind_for_writing(&mut backend);
        DownsampleStage::new(&program).run(
            &mut backend,
            source,
            Vec2::new(64.0, 32.0),
            targets.mip_chain(),
            true,
        );

        let levels: Vec<_> = backend
            .draws()
            .iter()
            .map(|draw| draw.uniform("mipLevel"))
            .collect();
        assert_eq!(
            levels,
            vec![
                Some(UniformValue::Int(0)),
                Some(UniformValue::Int(1)),
                Some(UniformValue::Int(1)),
            ]
        );
    }

    #[test]
    fn test_source_resolution_tracks_previous_level() {
        let (mut backend, targets, program, source) = setup(3);
        targets.bind_for_writing(&mut backend);
        DownsampleStage::new(&program).run(
            &mut backend,
            source,
            Vec2::new(64.0, 32.0),
            targets.mip_chain(),
            false,
        );

        let resolutions: Vec<_> = backend
            .draws()
            .iter()
            .map(|draw| draw.uniform("srcResolution"))
            .collect();
        assert_eq!(resolutions[0], Some(UniformValue::Vec2(Vec2::new(64.0, 32.0))));
        assert_eq!(resolutions[1], Some(UniformValue::Vec2(Vec2::new(32.0, 16.0))));
        assert_eq!(resolutions[2], Some(UniformValue::Vec2(Vec2::new(16.0, 8.0))));
        // Plain average throughout when the first-step filter is off.
        assert!(
            backend
                .draws()
                .iter()
                .all(|draw| draw.uniform("mipLevel") == Some(UniformValue::Int(1)))
        );
    }
}
