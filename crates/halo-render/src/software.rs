//! CPU reference implementation of [`GraphicsBackend`].
//!
//! Texels are stored as linear RGB `f32`. Draws shade every pixel of the
//! viewport (clipped to the target) at its pixel center, reading all sources
//! before writing, so a pass may sample the texture it renders into. The
//! three filter programs run the kernels in [`filters`](crate::filters).

use std::collections::HashMap;

use glam::{IVec2, UVec2, Vec2, Vec3};

use crate::backend::{
    BlendMode, FilterKind, FilterMode, FramebufferHandle, FramebufferStatus, GraphicsBackend,
    ProgramHandle, TextureDesc, TextureFormat, TextureHandle, UniformValue, Viewport, WrapMode,
};
use crate::composite::{BLOOM_SLOT, BloomBlend, SCENE_SLOT};
use crate::error::BackendError;
use crate::filters;

/// Largest texture edge accepted by default.
pub const DEFAULT_MAX_TEXTURE_SIZE: u32 = 16384;

/// Largest finite half-float value.
const HALF_MAX: f32 = 65504.0;

/// Largest values of the 11-bit red/green and 10-bit blue packed floats.
const PACKED_FLOAT_MAX: Vec3 = Vec3::new(65024.0, 65024.0, 64512.0);

const ALL_FORMATS: [TextureFormat; 3] = [
    TextureFormat::Rg11b10Float,
    TextureFormat::Rgba16Float,
    TextureFormat::Rgba8Unorm,
];

#[derive(Debug)]
struct SoftTexture {
    size: UVec2,
    format: TextureFormat,
    filter: FilterMode,
    wrap: WrapMode,
    texels: Vec<Vec3>,
}

impl SoftTexture {
    fn fetch(&self, texel: IVec2) -> Vec3 {
        let size = self.size.as_ivec2();
        let texel = match self.wrap {
            WrapMode::ClampToEdge => texel.clamp(IVec2::ZERO, size - IVec2::ONE),
            WrapMode::Repeat => IVec2::new(texel.x.rem_euclid(size.x), texel.y.rem_euclid(size.y)),
        };
        self.texels[texel.y as usize * size.x as usize + texel.x as usize]
    }

    fn sample(&self, uv: Vec2) -> Vec3 {
        let pos = uv * self.size.as_vec2();
        match self.filter {
            FilterMode::Nearest => self.fetch(pos.floor().as_ivec2()),
            FilterMode::Linear => {
                let pos = pos - Vec2::splat(0.5);
                let base = pos.floor();
                let t = pos - base;
                let base = base.as_ivec2();

                let c00 = self.fetch(base);
                let c10 = self.fetch(base + IVec2::X);
                let c01 = self.fetch(base + IVec2::Y);
                let c11 = self.fetch(base + IVec2::ONE);

                c00.lerp(c10, t.x).lerp(c01.lerp(c11, t.x), t.y)
            }
        }
    }
}

#[derive(Debug, Default)]
struct SoftFramebuffer {
    color: Option<TextureHandle>,
}

#[derive(Debug)]
struct SoftProgram {
    kind: FilterKind,
    uniforms: HashMap<String, UniformValue>,
}

impl SoftProgram {
    fn int(&self, name: &str) -> Option<i32> {
        match self.uniforms.get(name) {
            Some(UniformValue::Int(value)) => Some(*value),
            _ => None,
        }
    }

    fn float(&self, name: &str) -> Option<f32> {
        match self.uniforms.get(name) {
            Some(UniformValue::Float(value)) => Some(*value),
            _ => None,
        }
    }

    fn vec2(&self, name: &str) -> Option<Vec2> {
        match self.uniforms.get(name) {
            Some(UniformValue::Vec2(value)) => Some(*value),
            _ => None,
        }
    }
}

/// Snapshot of the pipeline state at one draw call.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    pub kind: FilterKind,
    /// Color attachment drawn into; `None` for the default target.
    pub target: Option<TextureHandle>,
    pub viewport: Viewport,
    pub blend: Option<BlendMode>,
    sources: HashMap<u32, TextureHandle>,
    uniforms: HashMap<String, UniformValue>,
}

impl DrawRecord {
    /// Texture bound to `slot` at draw time.
    pub fn source(&self, slot: u32) -> Option<TextureHandle> {
        self.sources.get(&slot).copied()
    }

    /// Value of a program uniform at draw time.
    pub fn uniform(&self, name: &str) -> Option<UniformValue> {
        self.uniforms.get(name).copied()
    }
}

/// Deterministic CPU renderer.
#[derive(Debug)]
pub struct SoftwareBackend {
    next_id: u32,
    textures: HashMap<u32, SoftTexture>,
    framebuffers: HashMap<u32, SoftFramebuffer>,
    programs: HashMap<u32, SoftProgram>,

    bound_framebuffer: Option<FramebufferHandle>,
    viewport: Viewport,
    slots: HashMap<u32, TextureHandle>,
    blend: Option<BlendMode>,
    current_program: Option<ProgramHandle>,
    error: Option<BackendError>,

    surface_size: UVec2,
    surface: Vec<Vec3>,

    renderable: Vec<TextureFormat>,
    unsupported_programs: Vec<FilterKind>,
    max_texture_size: u32,

    draw_calls: u64,
    draw_log: Option<Vec<DrawRecord>>,
}

impl SoftwareBackend {
    /// A backend whose default target is a `width` x `height` display surface.
    /// The viewport starts out covering the whole surface.
    pub fn new(width: u32, height: u32) -> Self {
        let surface_size = UVec2::new(width, height);
        Self {
            next_id: 1,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            bound_framebuffer: None,
            viewport: Viewport::from_size(surface_size),
            slots: HashMap::new(),
            blend: None,
            current_program: None,
            error: None,
            surface_size,
            surface: vec![Vec3::ZERO; (width as usize) * (height as usize)],
            renderable: ALL_FORMATS.to_vec(),
            unsupported_programs: Vec::new(),
            max_texture_size: DEFAULT_MAX_TEXTURE_SIZE,
            draw_calls: 0,
            draw_log: None,
        }
    }

    /// Restrict which formats may be rendered to. Framebuffers attached to any
    /// other format report [`FramebufferStatus::UnsupportedFormat`].
    pub fn with_renderable_formats(mut self, formats: &[TextureFormat]) -> Self {
        self.renderable = formats.to_vec();
        self
    }

    /// Make `create_program` fail for the given filters.
    pub fn with_unsupported_programs(mut self, kinds: &[FilterKind]) -> Self {
        self.unsupported_programs = kinds.to_vec();
        self
    }

    pub fn with_max_texture_size(mut self, max: u32) -> Self {
        self.max_texture_size = max;
        self
    }

    /// Record a [`DrawRecord`] for every draw call.
    pub fn with_draw_log(mut self) -> Self {
        self.draw_log = Some(Vec::new());
        self
    }

    /// Draws recorded since creation or the last [`clear_draws`](Self::clear_draws).
    /// Empty unless the log was enabled.
    pub fn draws(&self) -> &[DrawRecord] {
        self.draw_log.as_deref().unwrap_or(&[])
    }

    pub fn clear_draws(&mut self) {
        if let Some(log) = &mut self.draw_log {
            log.clear();
        }
    }

    /// Total draw calls issued, logged or not.
    pub fn draw_calls(&self) -> u64 {
        self.draw_calls
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    /// Replace a texture's contents. `texels` is row-major; row 0 is sampled at `v = 0`.
    pub fn upload_texture(
        &mut self,
        texture: TextureHandle,
        texels: &[Vec3],
    ) -> Result<(), BackendError> {
        let tex = self
            .textures
            .get_mut(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture.0))?;
        if texels.len() != tex.texels.len() {
            return Err(BackendError::DataSizeMismatch {
                actual: texels.len(),
                expected: tex.texels.len(),
            });
        }
        let format = tex.format;
        for (dst, &src) in tex.texels.iter_mut().zip(texels) {
            *dst = store(format, src);
        }
        Ok(())
    }

    /// Copy of a texture's contents, in upload order.
    pub fn read_texture(&self, texture: TextureHandle) -> Result<Vec<Vec3>, BackendError> {
        self.textures
            .get(&texture.0)
            .map(|tex| tex.texels.clone())
            .ok_or(BackendError::UnknownTexture(texture.0))
    }

    pub fn default_target_size(&self) -> UVec2 {
        self.surface_size
    }

    /// Contents of the default target, each channel in `[0, 1]`.
    pub fn read_default_target(&self) -> &[Vec3] {
        &self.surface
    }

    /// Reallocate the default target, clearing it.
    pub fn resize_default_target(&mut self, width: u32, height: u32) {
        self.surface_size = UVec2::new(width, height);
        self.surface = vec![Vec3::ZERO; (width as usize) * (height as usize)];
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, err: BackendError) {
        if self.error.is_none() {
            log::debug!("Software backend error: {err}");
            self.error = Some(err);
        }
    }

    fn sample_slot(&self, slot: u32, uv: Vec2) -> Vec3 {
        self.slots
            .get(&slot)
            .and_then(|handle| self.textures.get(&handle.0))
            .map_or(Vec3::ZERO, |tex| tex.sample(uv))
    }

    fn slot_size(&self, slot: u32) -> Option<Vec2> {
        self.slots
            .get(&slot)
            .and_then(|handle| self.textures.get(&handle.0))
            .map(|tex| tex.size.as_vec2())
    }

    fn shade(&self, program: &SoftProgram, uv: Vec2) -> Vec3 {
        match program.kind {
            FilterKind::Downsample => {
                let resolution = program
                    .vec2("srcResolution")
                    .or_else(|| self.slot_size(0))
                    .unwrap_or(Vec2::ONE);
                let karis = program.int("mipLevel") == Some(0);
                filters::downsample_13_tap(
                    |at| self.sample_slot(0, at),
                    uv,
                    Vec2::ONE / resolution,
                    karis,
                )
            }
            FilterKind::Upsample => {
                let radius = program.float("filterRadius").unwrap_or(0.0);
                filters::upsample_tent(|at| self.sample_slot(0, at), uv, radius)
            }
            FilterKind::Composite => {
                let scene = self.sample_slot(SCENE_SLOT, uv);
                let bloom = self.sample_slot(BLOOM_SLOT, uv);
                let mode = BloomBlend::from_program_choice(program.int("programChoice").unwrap_or(1));
                let hdr = mode.apply(scene, bloom, program.float("bloomStrength").unwrap_or(0.04));
                let mapped = filters::tone_map(hdr, program.float("exposure").unwrap_or(1.0));
                filters::gamma_encode(mapped, program.float("gamma").unwrap_or(2.2))
            }
        }
    }

    fn log_draw(&mut self, kind: FilterKind, target: Option<TextureHandle>, uniforms: &HashMap<String, UniformValue>) {
        if let Some(log) = &mut self.draw_log {
            log.push(DrawRecord {
                kind,
                target,
                viewport: self.viewport,
                blend: self.blend,
                sources: self.slots.clone(),
                uniforms: uniforms.clone(),
            });
        }
    }
}

/// Quantize a value the way a texel of `format` would hold it.
fn store(format: TextureFormat, value: Vec3) -> Vec3 {
    match format {
        TextureFormat::Rg11b10Float => value.max(Vec3::ZERO).min(PACKED_FLOAT_MAX),
        TextureFormat::Rgba16Float => value.clamp(Vec3::splat(-HALF_MAX), Vec3::splat(HALF_MAX)),
        TextureFormat::Rgba8Unorm => value.clamp(Vec3::ZERO, Vec3::ONE),
    }
}

impl GraphicsBackend for SoftwareBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, BackendError> {
        let size = desc.size;
        if size.min_element() == 0 || size.max_element() > self.max_texture_size {
            return Err(BackendError::TextureAllocation {
                width: size.x,
                height: size.y,
                format: desc.format,
            });
        }

        let id = self.allocate_id();
        self.textures.insert(
            id,
            SoftTexture {
                size,
                format: desc.format,
                filter: desc.filter,
                wrap: desc.wrap,
                texels: vec![Vec3::ZERO; (size.x as usize) * (size.y as usize)],
            },
        );
        log::trace!("Allocated texture '{}' #{id} ({}x{})", desc.label, size.x, size.y);
        Ok(TextureHandle(id))
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        if self.textures.remove(&texture.0).is_none() {
            self.record(BackendError::UnknownTexture(texture.0));
            return;
        }
        for framebuffer in self.framebuffers.values_mut() {
            if framebuffer.color == Some(texture) {
                framebuffer.color = None;
            }
        }
        self.slots.retain(|_, bound| *bound != texture);
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<UVec2> {
        self.textures.get(&texture.0).map(|tex| tex.size)
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferHandle, BackendError> {
        let id = self.allocate_id();
        self.framebuffers.insert(id, SoftFramebuffer::default());
        Ok(FramebufferHandle(id))
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        if self.framebuffers.remove(&framebuffer.0).is_none() {
            self.record(BackendError::UnknownFramebuffer(framebuffer.0));
            return;
        }
        if self.bound_framebuffer == Some(framebuffer) {
            self.bound_framebuffer = None;
        }
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        match framebuffer {
            Some(fb) if !self.framebuffers.contains_key(&fb.0) => {
                self.record(BackendError::UnknownFramebuffer(fb.0));
            }
            _ => self.bound_framebuffer = framebuffer,
        }
    }

    fn bound_framebuffer(&self) -> Option<FramebufferHandle> {
        self.bound_framebuffer
    }

    fn attach_color(&mut self, texture: TextureHandle) {
        let Some(bound) = self.bound_framebuffer else {
            self.record(BackendError::NoFramebufferBound);
            return;
        };
        if !self.textures.contains_key(&texture.0) {
            self.record(BackendError::UnknownTexture(texture.0));
            return;
        }
        if let Some(framebuffer) = self.framebuffers.get_mut(&bound.0) {
            framebuffer.color = Some(texture);
        }
    }

    fn framebuffer_status(&self) -> FramebufferStatus {
        let Some(bound) = self.bound_framebuffer else {
            return FramebufferStatus::Complete;
        };
        let Some(color) = self.framebuffers.get(&bound.0).and_then(|fb| fb.color) else {
            return FramebufferStatus::MissingAttachment;
        };
        match self.textures.get(&color.0) {
            None => FramebufferStatus::IncompleteAttachment,
            Some(tex) if !self.renderable.contains(&tex.format) => {
                FramebufferStatus::UnsupportedFormat
            }
            Some(_) => FramebufferStatus::Complete,
        }
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.viewport = viewport;
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn bind_texture(&mut self, slot: u32, texture: Option<TextureHandle>) {
        match texture {
            Some(handle) if !self.textures.contains_key(&handle.0) => {
                self.record(BackendError::UnknownTexture(handle.0));
            }
            Some(handle) => {
                self.slots.insert(slot, handle);
            }
            None => {
                self.slots.remove(&slot);
            }
        }
    }

    fn set_blend(&mut self, blend: Option<BlendMode>) {
        self.blend = blend;
    }

    fn blend(&self) -> Option<BlendMode> {
        self.blend
    }

    fn create_program(&mut self, kind: FilterKind) -> Result<ProgramHandle, BackendError> {
        if self.unsupported_programs.contains(&kind) {
            return Err(BackendError::ShaderCompilation {
                kind,
                message: "program not supported by this backend".to_string(),
            });
        }
        let id = self.allocate_id();
        self.programs.insert(
            id,
            SoftProgram {
                kind,
                uniforms: HashMap::new(),
            },
        );
        Ok(ProgramHandle(id))
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program.0).is_none() {
            self.record(BackendError::UnknownProgram(program.0));
            return;
        }
        if self.current_program == Some(program) {
            self.current_program = None;
        }
    }

    fn use_program(&mut self, program: Option<ProgramHandle>) {
        match program {
            Some(p) if !self.programs.contains_key(&p.0) => {
                self.record(BackendError::UnknownProgram(p.0));
            }
            _ => self.current_program = program,
        }
    }

    fn set_uniform(&mut self, program: ProgramHandle, name: &str, value: UniformValue) {
        match self.programs.get_mut(&program.0) {
            Some(p) => {
                p.uniforms.insert(name.to_string(), value);
            }
            None => self.record(BackendError::UnknownProgram(program.0)),
        }
    }

    fn draw_fullscreen_quad(&mut self) {
        let Some(program_id) = self
            .current_program
            .map(|p| p.0)
            .filter(|id| self.programs.contains_key(id))
        else {
            self.record(BackendError::NoProgramInUse);
            return;
        };

        let target = match self.bound_framebuffer {
            None => None,
            Some(fb) => match self.framebuffers.get(&fb.0).and_then(|f| f.color) {
                Some(color) => Some(color),
                None => {
                    self.record(BackendError::MissingAttachment(fb.0));
                    return;
                }
            },
        };
        let target_size = match target {
            None => self.surface_size,
            Some(color) => match self.textures.get(&color.0) {
                Some(tex) => tex.size,
                None => {
                    self.record(BackendError::UnknownTexture(color.0));
                    return;
                }
            },
        };

        let Some(program) = self.programs.get(&program_id) else {
            return;
        };
        let vp = self.viewport;
        let x_end = vp.x.saturating_add(vp.width).min(target_size.x);
        let y_end = vp.y.saturating_add(vp.height).min(target_size.y);
        let vp_size = vp.size().as_vec2();

        let mut shaded = Vec::new();
        for y in vp.y..y_end {
            for x in vp.x..x_end {
                let uv = (Vec2::new((x - vp.x) as f32, (y - vp.y) as f32) + 0.5) / vp_size;
                let index = y as usize * target_size.x as usize + x as usize;
                shaded.push((index, self.shade(program, uv)));
            }
        }

        let kind = program.kind;
        let uniforms = program.uniforms.clone();
        let blend = self.blend;
        let (texels, format) = match target {
            None => (&mut self.surface, TextureFormat::Rgba8Unorm),
            Some(color) => match self.textures.get_mut(&color.0) {
                Some(tex) => (&mut tex.texels, tex.format),
                None => return,
            },
        };
        for (index, value) in shaded {
            let dst = &mut texels[index];
            *dst = match blend {
                Some(BlendMode::Additive) => store(format, *dst + value),
                None => store(format, value),
            };
        }

        self.draw_calls += 1;
        self.log_draw(kind, target, &uniforms);
    }

    fn take_error(&mut self) -> Option<BackendError> {
        self.error.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texture(backend: &mut SoftwareBackend, size: UVec2, texels: &[Vec3]) -> TextureHandle {
        let handle = backend
            .create_texture(&TextureDesc::render_target("t", size, TextureFormat::Rgba16Float))
            .unwrap();
        backend.upload_texture(handle, texels).unwrap();
        handle
    }

    #[test]
    fn test_zero_size_texture_is_rejected() {
        let mut backend = SoftwareBackend::new(4, 4);
        let result = backend.create_texture(&TextureDesc::render_target(
            "empty",
            UVec2::new(0, 4),
            TextureFormat::Rg11b10Float,
        ));
        assert!(matches!(result, Err(BackendError::TextureAllocation { width: 0, .. })));
    }

    #[test]
    fn test_oversized_texture_is_rejected() {
        let mut backend = SoftwareBackend::new(4, 4).with_max_texture_size(64);
        let result = backend.create_texture(&TextureDesc::render_target(
            "big",
            UVec2::new(65, 1),
            TextureFormat::Rg11b10Float,
        ));
        assert!(result.is_err());
    }

    #[test]
    fn test_upload_size_mismatch() {
        let mut backend = SoftwareBackend::new(4, 4);
        let handle = backend
            .create_texture(&TextureDesc::render_target("t", UVec2::new(2, 2), TextureFormat::Rgba16Float))
            .unwrap();
        assert_eq!(
            backend.upload_texture(handle, &[Vec3::ONE; 3]),
            Err(BackendError::DataSizeMismatch {
                actual: 3,
                expected: 4
            })
        );
    }

    #[test]
    fn test_packed_float_format_drops_negative_values() {
        let mut backend = SoftwareBackend::new(4, 4);
        let handle = backend
            .create_texture(&TextureDesc::render_target("t", UVec2::ONE, TextureFormat::Rg11b10Float))
            .unwrap();
        backend.upload_texture(handle, &[Vec3::new(-1.0, 2.0, 3.0)]).unwrap();
        assert_eq!(backend.read_texture(handle).unwrap(), vec![Vec3::new(0.0, 2.0, 3.0)]);
    }

    #[test]
    fn test_packed_float_format_saturates_per_channel() {
        let mut backend = SoftwareBackend::new(4, 4);
        let handle = backend
            .create_texture(&TextureDesc::render_target("t", UVec2::ONE, TextureFormat::Rg11b10Float))
            .unwrap();
        backend.upload_texture(handle, &[Vec3::splat(65504.0)]).unwrap();
        assert_eq!(
            backend.read_texture(handle).unwrap(),
            vec![Vec3::new(65024.0, 65024.0, 64512.0)]
        );
    }

    #[test]
    fn test_bilinear_sampling_interpolates_between_texel_centers() {
        let tex = SoftTexture {
            size: UVec2::new(2, 1),
            format: TextureFormat::Rgba16Float,
            filter: FilterMode::Linear,
            wrap: WrapMode::ClampToEdge,
            texels: vec![Vec3::ZERO, Vec3::ONE],
        };
        assert_eq!(tex.sample(Vec2::new(0.25, 0.5)), Vec3::ZERO);
        assert_eq!(tex.sample(Vec2::new(0.5, 0.5)), Vec3::splat(0.5));
        assert_eq!(tex.sample(Vec2::new(0.75, 0.5)), Vec3::ONE);
        // Clamped beyond the edge.
        assert_eq!(tex.sample(Vec2::new(2.0, 0.5)), Vec3::ONE);
    }

    #[test]
    fn test_repeat_wrap_and_nearest_filter() {
        let tex = SoftTexture {
            size: UVec2::new(2, 1),
            format: TextureFormat::Rgba16Float,
            filter: FilterMode::Nearest,
            wrap: WrapMode::Repeat,
            texels: vec![Vec3::ZERO, Vec3::ONE],
        };
        assert_eq!(tex.sample(Vec2::new(0.75, 0.5)), Vec3::ONE);
        assert_eq!(tex.sample(Vec2::new(1.25, 0.5)), Vec3::ZERO);
        assert_eq!(tex.sample(Vec2::new(-0.25, 0.5)), Vec3::ONE);
    }

    #[test]
    fn test_draw_without_program_records_error() {
        let mut backend = SoftwareBackend::new(4, 4);
        backend.draw_fullscreen_quad();
        assert_eq!(backend.take_error(), Some(BackendError::NoProgramInUse));
        assert_eq!(backend.take_error(), None);
        assert_eq!(backend.draw_calls(), 0);
    }

    #[test]
    fn test_first_error_is_kept() {
        let mut backend = SoftwareBackend::new(4, 4);
        backend.delete_texture(TextureHandle(99));
        backend.delete_program(ProgramHandle(98));
        assert_eq!(backend.take_error(), Some(BackendError::UnknownTexture(99)));
        assert_eq!(backend.take_error(), None);
    }

    #[test]
    fn test_attach_without_framebuffer_records_error() {
        let mut backend = SoftwareBackend::new(4, 4);
        let tex = texture(&mut backend, UVec2::ONE, &[Vec3::ONE]);
        backend.attach_color(tex);
        assert_eq!(backend.take_error(), Some(BackendError::NoFramebufferBound));
    }

    #[test]
    fn test_draw_into_unattached_framebuffer_records_error() {
        let mut backend = SoftwareBackend::new(4, 4);
        let fb = backend.create_framebuffer().unwrap();
        let program = backend.create_program(FilterKind::Upsample).unwrap();
        backend.bind_framebuffer(Some(fb));
        backend.use_program(Some(program));
        assert_eq!(backend.framebuffer_status(), FramebufferStatus::MissingAttachment);
        backend.draw_fullscreen_quad();
        assert_eq!(backend.take_error(), Some(BackendError::MissingAttachment(fb.0)));
    }

    #[test]
    fn test_deleting_attached_texture_detaches_it() {
        let mut backend = SoftwareBackend::new(4, 4);
        let fb = backend.create_framebuffer().unwrap();
        let tex = texture(&mut backend, UVec2::ONE, &[Vec3::ONE]);
        backend.bind_framebuffer(Some(fb));
        backend.attach_color(tex);
        backend.bind_texture(0, Some(tex));
        backend.delete_texture(tex);
        assert_eq!(backend.framebuffer_status(), FramebufferStatus::MissingAttachment);
        assert_eq!(backend.take_error(), None);
    }

    #[test]
    fn test_additive_blend_accumulates() {
        let mut backend = SoftwareBackend::new(4, 4);
        let source = texture(&mut backend, UVec2::new(2, 2), &[Vec3::ONE; 4]);
        let target = texture(&mut backend, UVec2::new(2, 2), &[Vec3::splat(2.0); 4]);
        let fb = backend.create_framebuffer().unwrap();
        let program = backend.create_program(FilterKind::Upsample).unwrap();

        backend.bind_framebuffer(Some(fb));
        backend.attach_color(target);
        backend.set_viewport(Viewport::from_size(UVec2::new(2, 2)));
        backend.use_program(Some(program));
        backend.set_uniform(program, "filterRadius", UniformValue::Float(0.0));
        backend.bind_texture(0, Some(source));
        backend.set_blend(Some(BlendMode::Additive));
        backend.draw_fullscreen_quad();

        assert_eq!(backend.read_texture(target).unwrap(), vec![Vec3::splat(3.0); 4]);

        backend.set_blend(None);
        backend.draw_fullscreen_quad();
        assert_eq!(backend.read_texture(target).unwrap(), vec![Vec3::ONE; 4]);
        assert_eq!(backend.take_error(), None);
    }

    #[test]
    fn test_viewport_limits_written_pixels() {
        let mut backend = SoftwareBackend::new(4, 4);
        let source = texture(&mut backend, UVec2::new(4, 4), &[Vec3::ONE; 16]);
        let target = texture(&mut backend, UVec2::new(4, 4), &[Vec3::ZERO; 16]);
        let fb = backend.create_framebuffer().unwrap();
        let program = backend.create_program(FilterKind::Upsample).unwrap();

        backend.bind_framebuffer(Some(fb));
        backend.attach_color(target);
        backend.set_viewport(Viewport::from_size(UVec2::new(2, 1)));
        backend.use_program(Some(program));
        backend.bind_texture(0, Some(source));
        backend.draw_fullscreen_quad();

        let texels = backend.read_texture(target).unwrap();
        let lit = texels.iter().filter(|&&t| t == Vec3::ONE).count();
        assert_eq!(lit, 2);
        assert_eq!(texels[0], Vec3::ONE);
        assert_eq!(texels[1], Vec3::ONE);
    }

    #[test]
    fn test_composite_writes_tone_mapped_default_target() {
        let mut backend = SoftwareBackend::new(1, 1);
        let scene = texture(&mut backend, UVec2::ONE, &[Vec3::splat(1.0)]);
        let program = backend.create_program(FilterKind::Composite).unwrap();

        backend.use_program(Some(program));
        backend.set_uniform(program, "programChoice", UniformValue::Int(1));
        backend.set_uniform(program, "exposure", UniformValue::Float(1.0));
        backend.set_uniform(program, "gamma", UniformValue::Float(1.0));
        backend.bind_texture(SCENE_SLOT, Some(scene));
        backend.draw_fullscreen_quad();

        let expected = 1.0 - (-1.0f32).exp();
        let out = backend.read_default_target()[0];
        assert!((out.x - expected).abs() < 1e-5, "{out:?}");
    }

    #[test]
    fn test_draw_log_snapshots_state() {
        let mut backend = SoftwareBackend::new(2, 2).with_draw_log();
        let program = backend.create_program(FilterKind::Upsample).unwrap();
        backend.use_program(Some(program));
        backend.set_uniform(program, "filterRadius", UniformValue::Float(0.25));
        backend.draw_fullscreen_quad();
        backend.set_uniform(program, "filterRadius", UniformValue::Float(0.5));

        let draw = &backend.draws()[0];
        assert_eq!(draw.kind, FilterKind::Upsample);
        assert_eq!(draw.target, None);
        assert_eq!(draw.uniform("filterRadius"), Some(UniformValue::Float(0.25)));
        assert_eq!(draw.source(0), None);

        backend.clear_draws();
        assert!(backend.draws().is_empty());
        assert_eq!(backend.draw_calls(), 1);
    }
}
