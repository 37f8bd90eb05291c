//! Renders one bloomed frame on the software backend and writes it as PNG.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use glam::{UVec2, Vec3};
use halo_config::Config;
use halo_render::software::DEFAULT_MAX_TEXTURE_SIZE;
use halo_render::{
    BackendError, BloomBlend, BloomError, BloomPipeline, BloomSettings, CompositeSettings,
    Compositor, GraphicsBackend, SoftwareBackend, TextureDesc, TextureFormat, TextureHandle,
    Viewport,
};
use tracing::{debug, info};

use crate::error::AppError;
use crate::scene::HdrScene;

/// A tone-mapped frame with channels in `[0, 1]`, row 0 at the top.
#[derive(Debug, Clone)]
pub struct Frame {
    pub size: UVec2,
    pub pixels: Vec<Vec3>,
}

impl Frame {
    /// Interleaved 8-bit RGBA with opaque alpha.
    pub fn to_rgba8(&self) -> Vec<u8> {
        self.pixels
            .iter()
            .flat_map(|p| {
                let c = (p.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
                [c.x as u8, c.y as u8, c.z as u8, 255]
            })
            .collect()
    }

    pub fn encode_png<W: Write>(&self, writer: W) -> Result<(), AppError> {
        let mut encoder = png::Encoder::new(writer, self.size.x, self.size.y);
        encoder.set_color(png::ColorType::Rgba);
        encoder.set_depth(png::BitDepth::Eight);
        let mut writer = encoder.write_header()?;
        writer.write_image_data(&self.to_rgba8())?;
        writer.finish()?;
        Ok(())
    }

    /// Write the frame to `path`, creating parent directories as needed.
    pub fn write_png(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        self.encode_png(BufWriter::new(file))?;
        info!("Wrote {}x{} frame to {}", self.size.x, self.size.y, path.display());
        Ok(())
    }
}

/// Composite parameters for a config.
pub fn composite_settings(config: &Config) -> CompositeSettings {
    CompositeSettings {
        bloom: config.bloom.enabled,
        exposure: config.composite.exposure,
        mode: BloomBlend::from_program_choice(config.composite.program_choice),
        bloom_strength: config.composite.bloom_strength,
        gamma: config.composite.gamma,
    }
}

/// Bloom pipeline parameters for a config.
pub fn bloom_settings(config: &Config) -> BloomSettings {
    BloomSettings {
        mip_levels: config.bloom.mip_levels,
        karis_average: config.bloom.karis_average,
        ..Default::default()
    }
}

/// Reject a frame size the renderer cannot allocate, before anything is
/// allocated for it.
pub fn check_frame_size(width: u32, height: u32) -> Result<UVec2, AppError> {
    if i32::try_from(width).is_err() || i32::try_from(height).is_err() {
        return Err(BloomError::SizeOverflow { width, height }.into());
    }
    if width == 0 || height == 0 || width.max(height) > DEFAULT_MAX_TEXTURE_SIZE {
        return Err(BackendError::TextureAllocation {
            width,
            height,
            format: TextureFormat::Rgba16Float,
        }
        .into());
    }
    Ok(UVec2::new(width, height))
}

/// Render `scene` with bloom and tone mapping as configured.
pub fn render_frame(scene: &HdrScene, config: &Config) -> Result<Frame, AppError> {
    let size = check_frame_size(scene.size.x, scene.size.y)?;
    let mut backend = SoftwareBackend::new(size.x, size.y);
    let source = backend.create_texture(&TextureDesc::render_target(
        "hdr-scene",
        size,
        TextureFormat::Rgba16Float,
    ))?;
    backend.upload_texture(source, &scene.texels)?;

    let mut pipeline = BloomPipeline::new(bloom_settings(config));
    let mut compositor = Compositor::new();
    let result = draw(&mut backend, &mut pipeline, &mut compositor, source, config);

    compositor.destroy(&mut backend);
    pipeline.destroy(&mut backend);
    backend.delete_texture(source);
    result?;

    debug!("Software backend issued {} draws", backend.draw_calls());
    Ok(Frame {
        size,
        pixels: backend.read_default_target().to_vec(),
    })
}

fn draw(
    backend: &mut SoftwareBackend,
    pipeline: &mut BloomPipeline,
    compositor: &mut Compositor,
    source: TextureHandle,
    config: &Config,
) -> Result<(), AppError> {
    let size = backend.default_target_size();
    let settings = composite_settings(config);

    let bloom = if config.bloom.enabled {
        pipeline.init(backend, size.x, size.y)?;
        pipeline.render_bloom_texture(backend, source, config.bloom.filter_radius)?;
        pipeline.bloom_texture()
    } else {
        None
    };

    compositor.init(backend)?;
    compositor.composite(backend, source, bloom, Viewport::from_size(size), &settings)?;
    Ok(())
}
