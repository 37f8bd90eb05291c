//! End-to-end bloom scenarios on the software backend.

use glam::{UVec2, Vec2, Vec3};
use halo_render::{
    BloomBlend, BloomError, BloomPipeline, BloomSettings, CompositeSettings, Compositor,
    FramebufferStatus, GraphicsBackend, SoftwareBackend, TextureDesc, TextureFormat,
    TextureHandle, Viewport,
};

fn scene_texture(backend: &mut SoftwareBackend, size: UVec2, texels: &[Vec3]) -> TextureHandle {
    let texture = backend
        .create_texture(&TextureDesc::render_target(
            "hdr-scene",
            size,
            TextureFormat::Rgba16Float,
        ))
        .unwrap();
    backend.upload_texture(texture, texels).unwrap();
    texture
}

/// A black scene with one pixel at `bright` HDR intensity in the middle.
fn single_bright_pixel(size: UVec2, bright: f32) -> Vec<Vec3> {
    let mut texels = vec![Vec3::ZERO; (size.x * size.y) as usize];
    let center = (size.y / 2) * size.x + size.x / 2;
    texels[center as usize] = Vec3::splat(bright);
    texels
}

/// Render bloom for `texels` and return mip 0 with its size.
fn render_bloom(size: UVec2, texels: &[Vec3], filter_radius: f32) -> (Vec<Vec3>, UVec2) {
    let mut backend = SoftwareBackend::new(size.x, size.y);
    let source = scene_texture(&mut backend, size, texels);
    let mut pipeline = BloomPipeline::default();
    pipeline.init(&mut backend, size.x, size.y).unwrap();
    pipeline
        .render_bloom_texture(&mut backend, source, filter_radius)
        .unwrap();

    let bloom = pipeline.bloom_texture().unwrap();
    let result = (
        backend.read_texture(bloom).unwrap(),
        backend.texture_size(bloom).unwrap(),
    );
    pipeline.destroy(&mut backend);
    result
}

/// Energy-weighted mean squared distance from the energy centroid, after
/// removing the uniform floor the first downsample leaves behind.
fn spread(texels: &[Vec3], size: UVec2) -> f32 {
    let energy: Vec<f32> = texels.iter().map(|t| t.x).collect();
    let floor = energy.iter().copied().fold(f32::INFINITY, f32::min);
    let weights: Vec<f32> = energy.iter().map(|e| e - floor).collect();
    let total: f32 = weights.iter().sum();
    assert!(total > 0.0);

    let position = |i: usize| {
        let i = i as u32;
        Vec2::new((i % size.x) as f32, (i / size.x) as f32)
    };
    let centroid = weights
        .iter()
        .enumerate()
        .map(|(i, &w)| position(i) * w)
        .sum::<Vec2>()
        / total;
    weights
        .iter()
        .enumerate()
        .map(|(i, &w)| position(i).distance_squared(centroid) * w)
        .sum::<f32>()
        / total
}

#[test]
fn dark_scene_produces_near_zero_bloom() {
    let size = UVec2::new(64, 64);
    let (bloom, _) = render_bloom(size, &vec![Vec3::ZERO; 64 * 64], 0.005);
    for texel in &bloom {
        assert!(texel.min_element() >= 0.0);
        assert!(texel.max_element() < 1e-3, "{texel:?}");
    }
}

#[test]
fn bright_pixel_spreads_wider_with_larger_radius() {
    let size = UVec2::new(256, 256);
    let texels = single_bright_pixel(size, 500.0);

    let (narrow, mip_size) = render_bloom(size, &texels, 0.002);
    let (wide, _) = render_bloom(size, &texels, 0.01);

    let narrow_spread = spread(&narrow, mip_size);
    let wide_spread = spread(&wide, mip_size);
    assert!(
        wide_spread > narrow_spread,
        "radius 0.01 spread {wide_spread} should exceed radius 0.002 spread {narrow_spread}"
    );
}

#[test]
fn bright_pixel_lights_its_neighbours() {
    let size = UVec2::new(64, 64);
    let (bloom, mip_size) = render_bloom(size, &single_bright_pixel(size, 100.0), 0.005);
    let at = |x: u32, y: u32| bloom[(y * mip_size.x + x) as usize].x;

    // The bright source pixel lands on mip 0 texel (16, 16).
    assert!(at(16, 16) > at(16, 20));
    assert!(at(17, 16) > at(0, 0));
    assert!(at(16, 17) > at(0, 0));
}

#[test]
fn zero_radius_renders_a_valid_texture() {
    let size = UVec2::new(32, 32);
    let (bloom, _) = render_bloom(size, &single_bright_pixel(size, 50.0), 0.0);
    assert!(bloom.iter().all(|t| t.is_finite() && t.min_element() >= 0.0));
    assert!(bloom.iter().any(|t| t.x > 0.01));
}

#[test]
fn viewport_is_restored_for_any_radius() {
    let size = UVec2::new(96, 54);
    let mut backend = SoftwareBackend::new(size.x, size.y);
    let source = scene_texture(&mut backend, size, &vec![Vec3::splat(2.0); 96 * 54]);
    let mut pipeline = BloomPipeline::default();
    pipeline.init(&mut backend, size.x, size.y).unwrap();

    for radius in [0.0, 0.002, 0.005, 0.01, 0.5, -1.0] {
        backend.set_viewport(Viewport {
            x: 3,
            y: 4,
            width: 10,
            height: 10,
        });
        pipeline
            .render_bloom_texture(&mut backend, source, radius)
            .unwrap();
        assert_eq!(backend.viewport(), Viewport::from_size(size), "radius {radius}");
        assert_eq!(backend.bound_framebuffer(), None);
        assert_eq!(backend.blend(), None);
    }
    pipeline.destroy(&mut backend);
}

#[test]
fn rendering_twice_gives_identical_results() {
    let size = UVec2::new(48, 48);
    let mut backend = SoftwareBackend::new(size.x, size.y);
    let source = scene_texture(&mut backend, size, &single_bright_pixel(size, 20.0));
    let mut pipeline = BloomPipeline::default();
    pipeline.init(&mut backend, size.x, size.y).unwrap();

    let bloom = pipeline.bloom_texture().unwrap();
    pipeline.render_bloom_texture(&mut backend, source, 0.005).unwrap();
    let first = backend.read_texture(bloom).unwrap();
    pipeline.render_bloom_texture(&mut backend, source, 0.005).unwrap();
    let second = backend.read_texture(bloom).unwrap();

    assert_eq!(first, second);
    pipeline.destroy(&mut backend);
}

#[test]
fn bloom_mip_never_goes_out_of_range() {
    let mut backend = SoftwareBackend::new(128, 128);
    let mut pipeline = BloomPipeline::new(BloomSettings {
        mip_levels: 4,
        ..Default::default()
    });
    pipeline.init(&mut backend, 128, 128).unwrap();

    let chain: Vec<_> = pipeline.mip_chain().iter().map(|mip| mip.texture).collect();
    assert_eq!(pipeline.bloom_mip(i64::MIN), Some(chain[0]));
    assert_eq!(pipeline.bloom_mip(-1), Some(chain[0]));
    assert_eq!(pipeline.bloom_mip(3), Some(chain[3]));
    assert_eq!(pipeline.bloom_mip(4), Some(chain[3]));
    pipeline.destroy(&mut backend);
}

#[test]
fn destroy_twice_then_reinitialize() {
    let mut backend = SoftwareBackend::new(80, 60);
    let mut pipeline = BloomPipeline::default();
    pipeline.init(&mut backend, 80, 60).unwrap();
    let levels = pipeline.mip_chain().len();

    pipeline.destroy(&mut backend);
    pipeline.destroy(&mut backend);
    assert_eq!(backend.take_error(), None);
    assert_eq!(backend.live_textures(), 0);

    pipeline.init(&mut backend, 80, 60).unwrap();
    assert_eq!(pipeline.mip_chain().len(), levels);
    pipeline.destroy(&mut backend);
}

#[test]
fn unrenderable_mip_format_fails_init_cleanly() {
    let mut backend = SoftwareBackend::new(64, 64)
        .with_renderable_formats(&[TextureFormat::Rgba8Unorm, TextureFormat::Rgba16Float]);
    let mut pipeline = BloomPipeline::default();

    let result = pipeline.init(&mut backend, 64, 64);
    assert_eq!(
        result,
        Err(BloomError::FramebufferIncomplete {
            status: FramebufferStatus::UnsupportedFormat
        })
    );
    assert!(!pipeline.is_initialized());
    assert_eq!(backend.live_textures(), 0);
    assert_eq!(backend.live_framebuffers(), 0);
    assert_eq!(backend.live_programs(), 0);

    // Falling back to a half-float chain works on the same backend.
    let mut fallback = BloomPipeline::new(BloomSettings {
        mip_format: TextureFormat::Rgba16Float,
        ..Default::default()
    });
    fallback.init(&mut backend, 64, 64).unwrap();
    fallback.destroy(&mut backend);
}

#[test]
fn size_overflow_fails_before_allocation() {
    let mut backend = SoftwareBackend::new(4, 4);
    let mut pipeline = BloomPipeline::default();
    let result = pipeline.init(&mut backend, 640, u32::MAX);
    assert!(matches!(result, Err(BloomError::SizeOverflow { .. })));
    assert_eq!(backend.live_textures(), 0);
    assert_eq!(backend.live_programs(), 0);
}

#[test]
fn composite_adds_bloom_around_bright_pixel() {
    let size = UVec2::new(64, 64);
    let mut backend = SoftwareBackend::new(size.x, size.y);
    let source = scene_texture(&mut backend, size, &single_bright_pixel(size, 100.0));
    let mut pipeline = BloomPipeline::default();
    pipeline.init(&mut backend, size.x, size.y).unwrap();
    let mut compositor = Compositor::new();
    compositor.init(&mut backend).unwrap();

    pipeline.render_bloom_texture(&mut backend, source, 0.005).unwrap();
    let bloom = pipeline.bloom_texture();
    let viewport = Viewport::from_size(size);

    let scene_only = CompositeSettings {
        mode: BloomBlend::SceneOnly,
        ..Default::default()
    };
    compositor
        .composite(&mut backend, source, bloom, viewport, &scene_only)
        .unwrap();
    let without = backend.read_default_target().to_vec();

    let additive = CompositeSettings {
        mode: BloomBlend::Additive,
        ..Default::default()
    };
    compositor
        .composite(&mut backend, source, bloom, viewport, &additive)
        .unwrap();
    let with = backend.read_default_target().to_vec();

    // A pixel two to the right of the bright one is black in the scene.
    let neighbour = (32 * size.x + 34) as usize;
    assert_eq!(without[neighbour], Vec3::ZERO);
    assert!(with[neighbour].x > 0.0);
    assert!(with.iter().all(|t| t.max_element() <= 1.0 && t.min_element() >= 0.0));
    assert_eq!(backend.take_error(), None);

    compositor.destroy(&mut backend);
    pipeline.destroy(&mut backend);
}

#[test]
fn disabled_bloom_composites_scene_only() {
    let size = UVec2::new(16, 16);
    let mut backend = SoftwareBackend::new(size.x, size.y);
    let source = scene_texture(&mut backend, size, &vec![Vec3::splat(0.25); 256]);
    let mut pipeline = BloomPipeline::default();
    pipeline.init(&mut backend, size.x, size.y).unwrap();
    let mut compositor = Compositor::new();
    compositor.init(&mut backend).unwrap();
    pipeline.render_bloom_texture(&mut backend, source, 0.005).unwrap();

    let settings = CompositeSettings {
        bloom: false,
        mode: BloomBlend::Additive,
        ..Default::default()
    };
    compositor
        .composite(
            &mut backend,
            source,
            pipeline.bloom_texture(),
            Viewport::from_size(size),
            &settings,
        )
        .unwrap();

    let expected = (1.0 - (-0.25f32).exp()).powf(1.0 / 2.2);
    for texel in backend.read_default_target() {
        assert!((texel.x - expected).abs() < 1e-4, "{texel:?}");
    }
    compositor.destroy(&mut backend);
    pipeline.destroy(&mut backend);
}
