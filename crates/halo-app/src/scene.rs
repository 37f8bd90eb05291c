//! Procedural HDR test scene.

use glam::{UVec2, Vec2, Vec3};

/// A light source in normalized scene coordinates.
#[derive(Debug, Clone, Copy)]
struct Emitter {
    center: Vec2,
    /// Radius as a fraction of the frame height.
    radius: f32,
    radiance: Vec3,
}

const EMITTERS: [Emitter; 4] = [
    Emitter {
        center: Vec2::new(0.25, 0.35),
        radius: 0.06,
        radiance: Vec3::new(40.0, 32.0, 18.0),
    },
    Emitter {
        center: Vec2::new(0.7, 0.3),
        radius: 0.025,
        radiance: Vec3::new(4.0, 12.0, 30.0),
    },
    Emitter {
        center: Vec2::new(0.55, 0.72),
        radius: 0.012,
        radiance: Vec3::new(120.0, 20.0, 10.0),
    },
    Emitter {
        center: Vec2::new(0.85, 0.8),
        radius: 0.04,
        radiance: Vec3::new(1.5, 1.5, 1.5),
    },
];

/// Linear HDR radiance, row 0 at the top.
#[derive(Debug, Clone)]
pub struct HdrScene {
    pub size: UVec2,
    pub texels: Vec<Vec3>,
}

impl HdrScene {
    /// A dim gradient sky with a handful of emitters well above 1.0.
    pub fn synthetic(width: u32, height: u32) -> Self {
        let size = UVec2::new(width.max(1), height.max(1));
        let aspect = size.x as f32 / size.y as f32;
        let mut texels = Vec::with_capacity(size.x as usize * size.y as usize);

        for y in 0..size.y {
            for x in 0..size.x {
                let uv = (UVec2::new(x, y).as_vec2() + 0.5) / size.as_vec2();
                let sky = Vec3::new(0.02, 0.03, 0.06).lerp(Vec3::new(0.08, 0.05, 0.04), uv.y);

                let radiance = EMITTERS.iter().fold(sky, |acc, emitter| {
                    let offset = (uv - emitter.center) * Vec2::new(aspect, 1.0);
                    if offset.length() <= emitter.radius {
                        acc + emitter.radiance
                    } else {
                        acc
                    }
                });
                texels.push(radiance);
            }
        }

        Self { size, texels }
    }

    /// Brightest channel value in the scene.
    pub fn peak(&self) -> f32 {
        self.texels
            .iter()
            .map(|t| t.max_element())
            .fold(0.0, f32::max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_scene_has_hdr_highlights() {
        let scene = HdrScene::synthetic(320, 180);
        assert_eq!(scene.texels.len(), 320 * 180);
        assert!(scene.peak() > 1.0);
        // Corners are sky only.
        assert!(scene.texels[0].max_element() < 0.1);
        assert!(scene.texels.iter().all(|t| t.min_element() >= 0.0));
    }

    #[test]
    fn test_zero_size_is_promoted() {
        let scene = HdrScene::synthetic(0, 0);
        assert_eq!(scene.size, UVec2::ONE);
        assert_eq!(scene.texels.len(), 1);
    }
}
