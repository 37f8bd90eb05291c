//! [`GraphicsBackend`] over wgpu.
//!
//! Keeps GL-style immediate semantics: each draw records and submits its own
//! render pass with `LoadOp::Load`, so passes execute in call order and
//! additive blending accumulates onto existing contents. Framebuffers are
//! attachment records; textures carry a prebuilt bind group.

use std::collections::HashMap;

use glam::{UVec2, Vec3};
use half::f16;

use crate::backend::{
    BlendMode, FilterKind, FilterMode, FramebufferHandle, FramebufferStatus, GraphicsBackend,
    ProgramHandle, TextureDesc, TextureFormat, TextureHandle, UniformValue, Viewport, WrapMode,
};
use crate::error::BackendError;
use crate::shaders::{self, FilterUniforms};

/// Error type for wgpu device initialization.
#[derive(Debug, thiserror::Error)]
pub enum WgpuBackendError {
    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// Failed to request GPU device.
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// An imported texture uses a format the filters cannot sample.
    #[error("unsupported texture format {0:?}")]
    UnsupportedFormat(wgpu::TextureFormat),
}

fn to_wgpu_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rg11b10Float => wgpu::TextureFormat::Rg11b10Ufloat,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
    }
}

fn from_wgpu_format(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    match format {
        wgpu::TextureFormat::Rg11b10Ufloat => Some(TextureFormat::Rg11b10Float),
        wgpu::TextureFormat::Rgba16Float => Some(TextureFormat::Rgba16Float),
        wgpu::TextureFormat::Rgba8Unorm => Some(TextureFormat::Rgba8Unorm),
        _ => None,
    }
}

fn bytes_per_texel(format: TextureFormat) -> u32 {
    match format {
        TextureFormat::Rg11b10Float | TextureFormat::Rgba8Unorm => 4,
        TextureFormat::Rgba16Float => 8,
    }
}

/// Largest value of the unsigned 11-bit (6 mantissa bits) and 10-bit
/// (5 mantissa bits) packed floats.
const SMALL_FLOAT_MAX_11: f32 = 65024.0;
const SMALL_FLOAT_MAX_10: f32 = 64512.0;

/// The small floats share the half-float exponent, so they are the top bits
/// of a positive half, rounded to nearest.
fn pack_small_float(value: f32, mantissa_bits: u32) -> u32 {
    let max = if mantissa_bits == 6 {
        SMALL_FLOAT_MAX_11
    } else {
        SMALL_FLOAT_MAX_10
    };
    let bits = u32::from(f16::from_f32(value.max(0.0).min(max)).to_bits());
    let shift = 10 - mantissa_bits;
    (bits + (1 << (shift - 1))) >> shift
}

fn unpack_small_float(bits: u32, mantissa_bits: u32) -> f32 {
    f16::from_bits((bits << (10 - mantissa_bits)) as u16).to_f32()
}

fn encode_texels(format: TextureFormat, texels: &[Vec3]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(texels.len() * bytes_per_texel(format) as usize);
    for texel in texels {
        match format {
            TextureFormat::Rgba8Unorm => {
                let c = (texel.clamp(Vec3::ZERO, Vec3::ONE) * 255.0).round();
                bytes.extend_from_slice(&[c.x as u8, c.y as u8, c.z as u8, 255]);
            }
            TextureFormat::Rgba16Float => {
                let halves = [
                    f16::from_f32(texel.x).to_bits(),
                    f16::from_f32(texel.y).to_bits(),
                    f16::from_f32(texel.z).to_bits(),
                    f16::ONE.to_bits(),
                ];
                bytes.extend_from_slice(bytemuck::cast_slice(&halves));
            }
            TextureFormat::Rg11b10Float => {
                let packed = pack_small_float(texel.x, 6)
                    | (pack_small_float(texel.y, 6) << 11)
                    | (pack_small_float(texel.z, 5) << 22);
                bytes.extend_from_slice(&packed.to_le_bytes());
            }
        }
    }
    bytes
}

fn decode_texel(format: TextureFormat, bytes: &[u8]) -> Vec3 {
    match format {
        TextureFormat::Rgba8Unorm => {
            Vec3::new(f32::from(bytes[0]), f32::from(bytes[1]), f32::from(bytes[2])) / 255.0
        }
        TextureFormat::Rgba16Float => {
            let half = |i: usize| f16::from_le_bytes([bytes[i], bytes[i + 1]]).to_f32();
            Vec3::new(half(0), half(2), half(4))
        }
        TextureFormat::Rg11b10Float => {
            let packed = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            Vec3::new(
                unpack_small_float(packed & 0x7ff, 6),
                unpack_small_float((packed >> 11) & 0x7ff, 6),
                unpack_small_float(packed >> 22, 5),
            )
        }
    }
}

struct GpuTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    bind_group: wgpu::BindGroup,
    size: UVec2,
    format: TextureFormat,
    renderable: bool,
}

struct GpuProgram {
    kind: FilterKind,
    module: wgpu::ShaderModule,
    uniforms: FilterUniforms,
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
}

impl GpuProgram {
    fn set(&mut self, name: &str, value: UniformValue) {
        let u = &mut self.uniforms;
        match (name, value) {
            ("srcResolution", UniformValue::Vec2(v)) => u.src_resolution = v.to_array(),
            ("filterRadius", UniformValue::Float(v)) => u.filter_radius = v,
            ("mipLevel", UniformValue::Int(v)) => u.mip_level = v,
            ("programChoice", UniformValue::Int(v)) => u.program_choice = v,
            ("exposure", UniformValue::Float(v)) => u.exposure = v,
            ("bloomStrength", UniformValue::Float(v)) => u.bloom_strength = v,
            ("gamma", UniformValue::Float(v)) => u.gamma = v,
            // Sampler slots are fixed by the bind group layout.
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: u32,
    format: wgpu::TextureFormat,
    additive: bool,
}

/// wgpu implementation of [`GraphicsBackend`].
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    rg11b10_renderable: bool,

    uniform_bgl: wgpu::BindGroupLayout,
    texture_bgl: wgpu::BindGroupLayout,
    filter_layout: wgpu::PipelineLayout,
    composite_layout: wgpu::PipelineLayout,
    fallback: GpuTexture,

    next_id: u32,
    textures: HashMap<u32, GpuTexture>,
    framebuffers: HashMap<u32, Option<TextureHandle>>,
    programs: HashMap<u32, GpuProgram>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    bound_framebuffer: Option<FramebufferHandle>,
    viewport: Viewport,
    slots: HashMap<u32, TextureHandle>,
    blend: Option<BlendMode>,
    current_program: Option<ProgramHandle>,
    default_target: Option<TextureHandle>,
    error: Option<BackendError>,
}

/// Create a headless [`WgpuBackend`], blocking on adapter and device requests.
pub fn init_wgpu_backend_blocking() -> Result<WgpuBackend, WgpuBackendError> {
    pollster::block_on(WgpuBackend::new_headless())
}

impl WgpuBackend {
    /// Request an adapter and device with no surface. Enables
    /// `RG11B10UFLOAT_RENDERABLE` when the adapter offers it.
    pub async fn new_headless() -> Result<Self, WgpuBackendError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| WgpuBackendError::NoAdapter)?;

        let info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?}, {:?})",
            info.name,
            info.backend,
            info.device_type
        );

        let required_features =
            adapter.features() & wgpu::Features::RG11B10UFLOAT_RENDERABLE;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("halo-device"),
                required_features,
                required_limits: wgpu::Limits::default(),
                memory_hints: wgpu::MemoryHints::default(),
                experimental_features: wgpu::ExperimentalFeatures::default(),
                trace: wgpu::Trace::Off,
            })
            .await?;

        Ok(Self::from_device(device, queue))
    }

    /// Wrap an existing device. The viewport starts empty and there is no
    /// default target until [`set_default_target`](Self::set_default_target).
    pub fn from_device(device: wgpu::Device, queue: wgpu::Queue) -> Self {
        let rg11b10_renderable = device
            .features()
            .contains(wgpu::Features::RG11B10UFLOAT_RENDERABLE);
        if !rg11b10_renderable {
            log::warn!("RG11B10 render targets unavailable on this device");
        }

        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("halo-uniform-bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: std::num::NonZeroU64::new(
                        std::mem::size_of::<FilterUniforms>() as u64,
                    ),
                },
                count: None,
            }],
        });

        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("halo-texture-bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let filter_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("halo-filter-layout"),
            bind_group_layouts: &[&uniform_bgl, &texture_bgl],
            immediate_size: 0,
        });
        let composite_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("halo-composite-layout"),
            bind_group_layouts: &[&uniform_bgl, &texture_bgl, &texture_bgl],
            immediate_size: 0,
        });

        let fallback = create_gpu_texture(
            &device,
            &texture_bgl,
            &TextureDesc::render_target("halo-fallback", UVec2::ONE, TextureFormat::Rgba8Unorm),
            false,
        );
        queue.write_texture(
            fallback.texture.as_image_copy(),
            &[0, 0, 0, 255],
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4),
                rows_per_image: Some(1),
            },
            extent(UVec2::ONE),
        );

        Self {
            device,
            queue,
            rg11b10_renderable,
            uniform_bgl,
            texture_bgl,
            filter_layout,
            composite_layout,
            fallback,
            next_id: 1,
            textures: HashMap::new(),
            framebuffers: HashMap::new(),
            programs: HashMap::new(),
            pipelines: HashMap::new(),
            bound_framebuffer: None,
            viewport: Viewport::default(),
            slots: HashMap::new(),
            blend: None,
            current_program: None,
            default_target: None,
            error: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn is_renderable(&self, format: TextureFormat) -> bool {
        format != TextureFormat::Rg11b10Float || self.rg11b10_renderable
    }

    fn allocate_id(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, err: BackendError) {
        if self.error.is_none() {
            log::debug!("wgpu backend error: {err}");
            self.error = Some(err);
        }
    }

    /// Register an externally created texture, e.g. the scene's HDR target.
    /// It must have been created with `TEXTURE_BINDING` usage.
    pub fn import_texture(
        &mut self,
        texture: wgpu::Texture,
    ) -> Result<TextureHandle, WgpuBackendError> {
        let wgpu_format = texture.format();
        let format =
            from_wgpu_format(wgpu_format).ok_or(WgpuBackendError::UnsupportedFormat(wgpu_format))?;
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let sampler = create_sampler(&self.device, FilterMode::Linear, WrapMode::ClampToEdge);
        let bind_group = create_texture_bind_group(&self.device, &self.texture_bgl, &view, &sampler);
        let renderable = texture
            .usage()
            .contains(wgpu::TextureUsages::RENDER_ATTACHMENT)
            && self.is_renderable(format);

        let id = self.allocate_id();
        self.textures.insert(
            id,
            GpuTexture {
                size: UVec2::new(texture.width(), texture.height()),
                texture,
                view,
                bind_group,
                format,
                renderable,
            },
        );
        Ok(TextureHandle(id))
    }

    /// Texture that draws with no framebuffer bound render into.
    pub fn set_default_target(&mut self, texture: Option<TextureHandle>) {
        self.default_target = texture;
    }

    /// Replace a texture's contents, row 0 first.
    pub fn upload_texture(
        &mut self,
        texture: TextureHandle,
        texels: &[Vec3],
    ) -> Result<(), BackendError> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture.0))?;
        let expected = (tex.size.x * tex.size.y) as usize;
        if texels.len() != expected {
            return Err(BackendError::DataSizeMismatch {
                actual: texels.len(),
                expected,
            });
        }

        let bytes = encode_texels(tex.format, texels);
        self.queue.write_texture(
            tex.texture.as_image_copy(),
            &bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(tex.size.x * bytes_per_texel(tex.format)),
                rows_per_image: Some(tex.size.y),
            },
            extent(tex.size),
        );
        Ok(())
    }

    /// Copy a texture back to the CPU, blocking until the GPU is done.
    pub fn read_texture(&self, texture: TextureHandle) -> Result<Vec<Vec3>, BackendError> {
        let tex = self
            .textures
            .get(&texture.0)
            .ok_or(BackendError::UnknownTexture(texture.0))?;

        let bpp = bytes_per_texel(tex.format);
        let unpadded = tex.size.x * bpp;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("halo-readback"),
            size: u64::from(padded * tex.size.y),
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("halo-readback-encoder"),
            });
        encoder.copy_texture_to_buffer(
            tex.texture.as_image_copy(),
            wgpu::TexelCopyBufferInfo {
                buffer: &buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(tex.size.y),
                },
            },
            extent(tex.size),
        );
        self.queue.submit([encoder.finish()]);

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .map_err(|err| BackendError::Readback(err.to_string()))?;
        rx.recv()
            .map_err(|err| BackendError::Readback(err.to_string()))?
            .map_err(|err| BackendError::Readback(err.to_string()))?;

        let mapped = slice.get_mapped_range();
        let mut texels = Vec::with_capacity((tex.size.x * tex.size.y) as usize);
        for row in 0..tex.size.y {
            let start = (row * padded) as usize;
            let row_bytes = &mapped[start..start + unpadded as usize];
            texels.extend(
                row_bytes
                    .chunks_exact(bpp as usize)
                    .map(|chunk| decode_texel(tex.format, chunk)),
            );
        }
        drop(mapped);
        buffer.unmap();
        Ok(texels)
    }

    fn pipeline(&mut self, key: PipelineKey) -> Option<&wgpu::RenderPipeline> {
        if !self.pipelines.contains_key(&key) {
            let program = self.programs.get(&key.program)?;
            let layout = match program.kind {
                FilterKind::Composite => &self.composite_layout,
                FilterKind::Downsample | FilterKind::Upsample => &self.filter_layout,
            };
            let blend = key.additive.then_some(wgpu::BlendState {
                color: ADDITIVE,
                alpha: ADDITIVE,
            });
            let label = format!("halo-{:?}-pipeline", program.kind).to_lowercase();
            let pipeline = create_fullscreen_pipeline(
                &self.device,
                &program.module,
                layout,
                key.format,
                blend,
                &label,
            );
            self.pipelines.insert(key, pipeline);
        }
        self.pipelines.get(&key)
    }

    fn slot_bind_group(&self, slot: u32) -> &wgpu::BindGroup {
        self.slots
            .get(&slot)
            .and_then(|handle| self.textures.get(&handle.0))
            .map_or(&self.fallback.bind_group, |tex| &tex.bind_group)
    }
}

const ADDITIVE: wgpu::BlendComponent = wgpu::BlendComponent {
    src_factor: wgpu::BlendFactor::One,
    dst_factor: wgpu::BlendFactor::One,
    operation: wgpu::BlendOperation::Add,
};

fn extent(size: UVec2) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: size.x,
        height: size.y,
        depth_or_array_layers: 1,
    }
}

fn create_sampler(device: &wgpu::Device, filter: FilterMode, wrap: WrapMode) -> wgpu::Sampler {
    let (filter, mipmap_filter) = match filter {
        FilterMode::Linear => (wgpu::FilterMode::Linear, wgpu::MipmapFilterMode::Linear),
        FilterMode::Nearest => (wgpu::FilterMode::Nearest, wgpu::MipmapFilterMode::Nearest),
    };
    let address_mode = match wrap {
        WrapMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        WrapMode::Repeat => wgpu::AddressMode::Repeat,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("halo-sampler"),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter,
        ..Default::default()
    })
}

fn create_texture_bind_group(
    device: &wgpu::Device,
    texture_bgl: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("halo-texture-bg"),
        layout: texture_bgl,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

fn create_gpu_texture(
    device: &wgpu::Device,
    texture_bgl: &wgpu::BindGroupLayout,
    desc: &TextureDesc,
    renderable: bool,
) -> GpuTexture {
    let mut usage = wgpu::TextureUsages::TEXTURE_BINDING
        | wgpu::TextureUsages::COPY_DST
        | wgpu::TextureUsages::COPY_SRC;
    if renderable {
        usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(&desc.label),
        size: extent(desc.size),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: to_wgpu_format(desc.format),
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = create_sampler(device, desc.filter, desc.wrap);
    let bind_group = create_texture_bind_group(device, texture_bgl, &view, &sampler);
    GpuTexture {
        texture,
        view,
        bind_group,
        size: desc.size,
        format: desc.format,
        renderable,
    }
}

fn create_fullscreen_pipeline(
    device: &wgpu::Device,
    module: &wgpu::ShaderModule,
    layout: &wgpu::PipelineLayout,
    target_format: wgpu::TextureFormat,
    blend: Option<wgpu::BlendState>,
    label: &str,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_fullscreen"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: target_format,
                blend,
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        multiview_mask: None,
        cache: None,
    })
}

impl GraphicsBackend for WgpuBackend {
    fn create_texture(&mut self, desc: &TextureDesc) -> Result<TextureHandle, BackendError> {
        let max = self.device.limits().max_texture_dimension_2d;
        if desc.size.min_element() == 0 || desc.size.max_element() > max {
            return Err(BackendError::TextureAllocation {
                width: desc.size.x,
                height: desc.size.y,
                format: desc.format,
            });
        }
        let renderable = self.is_renderable(desc.format);
        let texture = create_gpu_texture(&self.device, &self.texture_bgl, desc, renderable);
        let id = self.allocate_id();
        self.textures.insert(id, texture);
        Ok(TextureHandle(id))
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        let Some(tex) = self.textures.remove(&texture.0) else {
            self.record(BackendError::UnknownTexture(texture.0));
            return;
        };
        tex.texture.destroy();
        for color in self.framebuffers.values_mut() {
            if *color == Some(texture) {
                *color = None;
            }
        }
        self.slots.retain(|_, bound| *bound != texture);
        if self.default_target == Some(texture) {
            self.default_target = None;
        }
    }

    fn texture_size(&self, texture: TextureHandle) -> Option<UVec2> {
        self.textures.get(&texture.0).map(|tex| tex.size)
    }

    fn create_framebuffer(&mut self) -> Result<FramebufferHandle, BackendError> {
        let id = self.allocate_id();
        self.framebuffers.insert(id, None);
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
        self.framebuffers.insert(bound.0, Some(texture));
    }

    fn framebuffer_status(&self) -> FramebufferStatus {
        let target = match self.bound_framebuffer {
            Some(fb) => self.framebuffers.get(&fb.0).copied().flatten(),
            None => self.default_target,
        };
        let Some(target) = target else {
            return FramebufferStatus::MissingAttachment;
        };
        match self.textures.get(&target.0) {
            None => FramebufferStatus::IncompleteAttachment,
            Some(tex) if !tex.renderable => FramebufferStatus::UnsupportedFormat,
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
        let label = format!("halo-{kind:?}-shader").to_lowercase();
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(&label),
                source: wgpu::ShaderSource::Wgsl(shaders::source(kind).into()),
            });

        use wgpu::util::DeviceExt;
        let uniforms = FilterUniforms::default();
        let buffer = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("halo-filter-uniforms"),
                contents: bytemuck::cast_slice(&[uniforms]),
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("halo-filter-uniforms-bg"),
            layout: &self.uniform_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: buffer.as_entire_binding(),
            }],
        });

        let id = self.allocate_id();
        self.programs.insert(
            id,
            GpuProgram {
                kind,
                module,
                uniforms,
                buffer,
                bind_group,
            },
        );
        Ok(ProgramHandle(id))
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program.0).is_none() {
            self.record(BackendError::UnknownProgram(program.0));
            return;
        }
        self.pipelines.retain(|key, _| key.program != program.0);
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
            Some(p) => p.set(name, value),
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
            Some(fb) => match self.framebuffers.get(&fb.0).copied().flatten() {
                Some(color) => color,
                None => {
                    self.record(BackendError::MissingAttachment(fb.0));
                    return;
                }
            },
            None => match self.default_target {
                Some(color) => color,
                None => {
                    self.record(BackendError::NoFramebufferBound);
                    return;
                }
            },
        };
        let Some((target_size, target_format, renderable)) = self
            .textures
            .get(&target.0)
            .map(|tex| (tex.size, tex.format, tex.renderable))
        else {
            self.record(BackendError::UnknownTexture(target.0));
            return;
        };
        if !renderable {
            log::error!("Draw into non-renderable {target_format:?} texture #{}", target.0);
            self.record(BackendError::MissingAttachment(
                self.bound_framebuffer.map_or(0, |fb| fb.0),
            ));
            return;
        }

        // Viewport rows count from texel row 0, as in `upload_texture`.
        let vp = self.viewport;
        let x_end = vp.x.saturating_add(vp.width).min(target_size.x);
        let y_end = vp.y.saturating_add(vp.height).min(target_size.y);
        if x_end <= vp.x || y_end <= vp.y {
            return;
        }

        let key = PipelineKey {
            program: program_id,
            format: to_wgpu_format(target_format),
            additive: self.blend == Some(BlendMode::Additive),
        };
        if self.pipeline(key).is_none() {
            return;
        }

        let (Some(program), Some(pipeline), Some(target_tex)) = (
            self.programs.get(&program_id),
            self.pipelines.get(&key),
            self.textures.get(&target.0),
        ) else {
            return;
        };
        self.queue
            .write_buffer(&program.buffer, 0, bytemuck::cast_slice(&[program.uniforms]));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("halo-filter-encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("halo-filter-pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_tex.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });
            pass.set_viewport(
                vp.x as f32,
                vp.y as f32,
                vp.width as f32,
                vp.height as f32,
                0.0,
                1.0,
            );
            pass.set_scissor_rect(vp.x, vp.y, x_end - vp.x, y_end - vp.y);
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &program.bind_group, &[]);
            pass.set_bind_group(1, self.slot_bind_group(0), &[]);
            if shaders::texture_groups(program.kind) > 1 {
                pass.set_bind_group(2, self.slot_bind_group(1), &[]);
            }
            pass.draw(0..3, 0..1);
        }
        self.queue.submit([encoder.finish()]);
    }

    fn take_error(&mut self) -> Option<BackendError> {
        self.error.take()
    }
}
