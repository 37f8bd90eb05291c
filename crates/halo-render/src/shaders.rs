//! WGSL sources for the three filter programs.
//!
//! Every program shares [`FULLSCREEN_PRELUDE`]: a fullscreen-triangle vertex
//! stage, the `FilterUniforms` block at group 0, and the slot 0 texture at
//! group 1. The composite program adds the bloom texture at group 2.

use bytemuck::{Pod, Zeroable};

use crate::backend::FilterKind;

/// GPU mirror of the named program uniforms. Layout matches `FilterUniforms`
/// in [`FULLSCREEN_PRELUDE`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct FilterUniforms {
    pub src_resolution: [f32; 2],
    pub filter_radius: f32,
    pub mip_level: i32,
    pub program_choice: i32,
    pub exposure: f32,
    pub bloom_strength: f32,
    pub gamma: f32,
}

impl Default for FilterUniforms {
    fn default() -> Self {
        Self {
            src_resolution: [1.0, 1.0],
            filter_radius: 0.0,
            mip_level: 1,
            program_choice: 1,
            exposure: 1.0,
            bloom_strength: 0.04,
            gamma: 2.2,
        }
    }
}

pub const FULLSCREEN_PRELUDE: &str = r#"
struct FilterUniforms {
    src_resolution: vec2<f32>,
    filter_radius: f32,
    mip_level: i32,
    program_choice: i32,
    exposure: f32,
    bloom_strength: f32,
    gamma: f32,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var<uniform> params: FilterUniforms;
@group(1) @binding(0) var src_texture: texture_2d<f32>;
@group(1) @binding(1) var src_sampler: sampler;

@vertex
fn vs_fullscreen(@builtin(vertex_index) idx: u32) -> VertexOutput {
    let uv = vec2<f32>(f32((idx << 1u) & 2u), f32(idx & 2u));
    var out: VertexOutput;
    out.position = vec4<f32>(uv * 2.0 - 1.0, 0.0, 1.0);
    out.uv = vec2<f32>(uv.x, 1.0 - uv.y);
    return out;
}

fn tap(uv: vec2<f32>, dx: f32, dy: f32) -> vec3<f32> {
    return textureSample(src_texture, src_sampler, uv + vec2<f32>(dx, dy)).rgb;
}
"#;

pub const DOWNSAMPLE: &str = r#"
fn luminance(c: vec3<f32>) -> f32 {
    return dot(c, vec3<f32>(0.2126, 0.7152, 0.0722));
}

fn to_srgb(c: vec3<f32>) -> vec3<f32> {
    return pow(max(c, vec3<f32>(0.0)), vec3<f32>(1.0 / 2.2));
}

fn karis_weight(c: vec3<f32>) -> f32 {
    let luma = luminance(to_srgb(c)) * 0.25;
    return 1.0 / (1.0 + luma);
}

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let texel = 1.0 / params.src_resolution;
    let x = texel.x;
    let y = texel.y;
    let uv = in.uv;

    // a - b - c
    // - j - k -
    // d - e - f
    // - l - m -
    // g - h - i
    let a = tap(uv, -2.0 * x, 2.0 * y);
    let b = tap(uv, 0.0, 2.0 * y);
    let c = tap(uv, 2.0 * x, 2.0 * y);
    let d = tap(uv, -2.0 * x, 0.0);
    let e = tap(uv, 0.0, 0.0);
    let f = tap(uv, 2.0 * x, 0.0);
    let g = tap(uv, -2.0 * x, -2.0 * y);
    let h = tap(uv, 0.0, -2.0 * y);
    let i = tap(uv, 2.0 * x, -2.0 * y);
    let j = tap(uv, -x, y);
    let k = tap(uv, x, y);
    let l = tap(uv, -x, -y);
    let m = tap(uv, x, -y);

    var color: vec3<f32>;
    if params.mip_level == 0 {
        let g0 = (a + b + d + e) * (0.125 / 4.0);
        let g1 = (b + c + e + f) * (0.125 / 4.0);
        let g2 = (d + e + g + h) * (0.125 / 4.0);
        let g3 = (e + f + h + i) * (0.125 / 4.0);
        let g4 = (j + k + l + m) * (0.5 / 4.0);
        color = g0 * karis_weight(g0) + g1 * karis_weight(g1) + g2 * karis_weight(g2)
            + g3 * karis_weight(g3) + g4 * karis_weight(g4);
        color = max(color, vec3<f32>(0.0001));
    } else {
        color = e * 0.125;
        color += (a + c + g + i) * 0.03125;
        color += (b + d + f + h) * 0.0625;
        color += (j + k + l + m) * 0.125;
    }
    return vec4<f32>(color, 1.0);
}
"#;

pub const UPSAMPLE: &str = r#"
@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let r = params.filter_radius;
    let uv = in.uv;

    let a = tap(uv, -r, r);
    let b = tap(uv, 0.0, r);
    let c = tap(uv, r, r);
    let d = tap(uv, -r, 0.0);
    let e = tap(uv, 0.0, 0.0);
    let f = tap(uv, r, 0.0);
    let g = tap(uv, -r, -r);
    let h = tap(uv, 0.0, -r);
    let i = tap(uv, r, -r);

    var color = e * 4.0;
    color += (b + d + f + h) * 2.0;
    color += a + c + g + i;
    return vec4<f32>(color * (1.0 / 16.0), 1.0);
}
"#;

pub const COMPOSITE: &str = r#"
@group(2) @binding(0) var bloom_texture: texture_2d<f32>;
@group(2) @binding(1) var bloom_sampler: sampler;

@fragment
fn fs_main(in: VertexOutput) -> @location(0) vec4<f32> {
    let scene = textureSample(src_texture, src_sampler, in.uv).rgb;
    let bloom = textureSample(bloom_texture, bloom_sampler, in.uv).rgb;

    var hdr = scene;
    if params.program_choice == 2 {
        hdr = scene + bloom;
    } else if params.program_choice == 3 {
        hdr = mix(scene, bloom, vec3<f32>(params.bloom_strength));
    }

    var mapped = vec3<f32>(1.0) - exp(-hdr * params.exposure);
    if params.gamma > 0.0 {
        mapped = pow(max(mapped, vec3<f32>(0.0)), vec3<f32>(1.0 / params.gamma));
    }
    return vec4<f32>(mapped, 1.0);
}
"#;

/// Complete WGSL module for a filter.
pub fn source(kind: FilterKind) -> String {
    let body = match kind {
        FilterKind::Downsample => DOWNSAMPLE,
        FilterKind::Upsample => UPSAMPLE,
        FilterKind::Composite => COMPOSITE,
    };
    format!("{FULLSCREEN_PRELUDE}{body}")
}

/// Number of texture bind groups a filter samples from.
pub fn texture_groups(kind: FilterKind) -> u32 {
    match kind {
        FilterKind::Composite => 2,
        FilterKind::Downsample | FilterKind::Upsample => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_block_is_32_bytes() {
        assert_eq!(std::mem::size_of::<FilterUniforms>(), 32);
    }

    #[test]
    fn test_every_source_has_both_entry_points() {
        for kind in [FilterKind::Downsample, FilterKind::Upsample, FilterKind::Composite] {
            let src = source(kind);
            assert!(src.contains("fn vs_fullscreen"), "{kind:?}");
            assert!(src.contains("fn fs_main"), "{kind:?}");
        }
    }

    #[test]
    fn test_composite_declares_bloom_group() {
        assert!(source(FilterKind::Composite).contains("@group(2)"));
        assert!(!source(FilterKind::Upsample).contains("@group(2)"));
        assert_eq!(texture_groups(FilterKind::Composite), 2);
    }
}
