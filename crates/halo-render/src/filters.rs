//! CPU versions of the bloom filter kernels.
//!
//! These mirror the WGSL in [`shaders`](crate::shaders) tap for tap and drive
//! the [`SoftwareBackend`](crate::SoftwareBackend). Kernels take a sampling
//! closure so they stay independent of texture storage.

use glam::{Vec2, Vec3};

/// Rec. 709 luma coefficients.
pub const LUMA: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

/// Lower bound applied to the Karis-averaged first downsample.
pub const DOWNSAMPLE_FLOOR: f32 = 0.0001;

const INV_GAMMA: f32 = 1.0 / 2.2;

pub fn luminance(color: Vec3) -> f32 {
    color.dot(LUMA)
}

/// Approximate linear to sRGB transfer.
pub fn to_srgb(color: Vec3) -> Vec3 {
    color.max(Vec3::ZERO).powf(INV_GAMMA)
}

/// Karis average weight: `1 / (1 + luma / 4)` on the sRGB value.
pub fn karis_weight(color: Vec3) -> f32 {
    let luma = luminance(to_srgb(color)) * 0.25;
    1.0 / (1.0 + luma)
}

/// 13-tap downsample centred on `uv`.
///
/// `texel` is the size of one source texel in UV units. With `karis` the five
/// overlapping 2x2 groups are individually weighted by [`karis_weight`], which
/// keeps single very bright texels from dominating the level.
pub fn downsample_13_tap(
    sample: impl Fn(Vec2) -> Vec3,
    uv: Vec2,
    texel: Vec2,
    karis: bool,
) -> Vec3 {
    let (x, y) = (texel.x, texel.y);
    let tap = |dx: f32, dy: f32| sample(uv + Vec2::new(dx, dy));

    let a = tap(-2.0 * x, 2.0 * y);
    let b = tap(0.0, 2.0 * y);
    let c = tap(2.0 * x, 2.0 * y);

    let d = tap(-2.0 * x, 0.0);
    let e = tap(0.0, 0.0);
    let f = tap(2.0 * x, 0.0);

    let g = tap(-2.0 * x, -2.0 * y);
    let h = tap(0.0, -2.0 * y);
    let i = tap(2.0 * x, -2.0 * y);

    let j = tap(-x, y);
    let k = tap(x, y);
    let l = tap(-x, -y);
    let m = tap(x, -y);

    if karis {
        let groups = [
            (a + b + d + e) * (0.125 / 4.0),
            (b + c + e + f) * (0.125 / 4.0),
            (d + e + g + h) * (0.125 / 4.0),
            (e + f + h + i) * (0.125 / 4.0),
            (j + k + l + m) * (0.5 / 4.0),
        ];
        let sum: Vec3 = groups.iter().map(|&group| group * karis_weight(group)).sum();
        sum.max(Vec3::splat(DOWNSAMPLE_FLOOR))
    } else {
        e * 0.125 + (a + c + g + i) * 0.03125 + (b + d + f + h) * 0.0625 + (j + k + l + m) * 0.125
    }
}

/// 3x3 tent upsample with taps `radius` UV units apart.
pub fn upsample_tent(sample: impl Fn(Vec2) -> Vec3, uv: Vec2, radius: f32) -> Vec3 {
    let r = radius;
    let tap = |dx: f32, dy: f32| sample(uv + Vec2::new(dx, dy));

    let a = tap(-r, r);
    let b = tap(0.0, r);
    let c = tap(r, r);

    let d = tap(-r, 0.0);
    let e = tap(0.0, 0.0);
    let f = tap(r, 0.0);

    let g = tap(-r, -r);
    let h = tap(0.0, -r);
    let i = tap(r, -r);

    (e * 4.0 + (b + d + f + h) * 2.0 + (a + c + g + i)) * (1.0 / 16.0)
}

/// Exponential exposure tone mapping into `[0, 1)`.
pub fn tone_map(hdr: Vec3, exposure: f32) -> Vec3 {
    Vec3::ONE - (-hdr * exposure).exp()
}

/// Gamma encode a tone-mapped color. A non-positive gamma leaves it linear.
pub fn gamma_encode(color: Vec3, gamma: f32) -> Vec3 {
    if gamma <= 0.0 {
        return color;
    }
    color.max(Vec3::ZERO).powf(1.0 / gamma)
}
