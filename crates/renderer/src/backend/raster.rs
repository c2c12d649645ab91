//! Scanline-free half-space triangle rasterizer for the software backend.
//!
//! Conventions match wgpu: clip-space z in [0, w], screen y pointing down,
//! counter-clockwise front faces, samples at pixel centres.

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

/// Post-vertex-shader data for one corner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClipVertex {
    pub clip: Vec4,
    pub world: Vec3,
    pub normal: Vec3,
    pub uv: Vec2,
    pub color: Vec4,
}

impl ClipVertex {
    pub fn at(clip: Vec4) -> Self {
        Self {
            clip,
            ..Default::default()
        }
    }

    fn lerp(&self, other: &Self, t: f32) -> Self {
        Self {
            clip: self.clip.lerp(other.clip, t),
            world: self.world.lerp(other.world, t),
            normal: self.normal.lerp(other.normal, t),
            uv: self.uv.lerp(other.uv, t),
            color: self.color.lerp(other.color, t),
        }
    }

    fn weighted(v: &[ClipVertex; 3], w: Vec3) -> Self {
        Self {
            clip: v[0].clip * w.x + v[1].clip * w.y + v[2].clip * w.z,
            world: v[0].world * w.x + v[1].world * w.y + v[2].world * w.z,
            normal: v[0].normal * w.x + v[1].normal * w.y + v[2].normal * w.z,
            uv: v[0].uv * w.x + v[1].uv * w.y + v[2].uv * w.z,
            color: v[0].color * w.x + v[1].color * w.y + v[2].color * w.z,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Fragment {
    pub x: u32,
    pub y: u32,
    /// Normalized device depth in [0, 1].
    pub depth: f32,
    pub front_facing: bool,
    /// Perspective-correct interpolated attributes.
    pub attributes: ClipVertex,
}

/// Clip a triangle against the near plane (z >= 0). Returns 0, 3 or 4 vertices.
fn clip_near(tri: &[ClipVertex; 3]) -> Vec<ClipVertex> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let a = &tri[i];
        let b = &tri[(i + 1) % 3];
        let (da, db) = (a.clip.z, b.clip.z);
        if da >= 0.0 {
            out.push(*a);
        }
        if (da >= 0.0) != (db >= 0.0) {
            out.push(a.lerp(b, da / (da - db)));
        }
    }
    out
}

fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x)
}

/// Rasterize one triangle into a `width × height` target, calling `fragment`
/// for every covered pixel centre with depth in [0, 1].
pub fn rasterize_triangle(tri: &[ClipVertex; 3], width: u32, height: u32, mut fragment: impl FnMut(Fragment)) {
    let polygon = clip_near(tri);
    for i in 1..polygon.len().saturating_sub(1) {
        let sub = [polygon[0], polygon[i], polygon[i + 1]];
        rasterize_clipped(&sub, width, height, &mut fragment);
    }
}

fn rasterize_clipped(tri: &[ClipVertex; 3], width: u32, height: u32, fragment: &mut impl FnMut(Fragment)) {
    if tri.iter().any(|v| v.clip.w <= f32::EPSILON) {
        return;
    }
    let (w, h) = (width as f32, height as f32);
    let screen = tri.map(|v| {
        let ndc = v.clip.xyz() / v.clip.w;
        Vec3::new((ndc.x * 0.5 + 0.5) * w, (0.5 - ndc.y * 0.5) * h, ndc.z)
    });
    let s = screen.map(|p| p.truncate());
    let area = edge(s[0], s[1], s[2]);
    if area.abs() <= f32::EPSILON {
        return;
    }
    // Counter-clockwise in NDC is clockwise once y points down.
    let front_facing = area < 0.0;

    let min = s[0].min(s[1]).min(s[2]).max(Vec2::ZERO);
    let max = s[0].max(s[1]).max(s[2]).min(Vec2::new(w, h));
    if min.x >= max.x || min.y >= max.y {
        return;
    }
    let inv_w = Vec3::new(1.0 / tri[0].clip.w, 1.0 / tri[1].clip.w, 1.0 / tri[2].clip.w);

    let (x0, y0) = (min.x.floor() as u32, min.y.floor() as u32);
    let (x1, y1) = ((max.x.ceil() as u32).min(width), (max.y.ceil() as u32).min(height));
    for y in y0..y1 {
        for x in x0..x1 {
            let p = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let b = Vec3::new(edge(s[1], s[2], p), edge(s[2], s[0], p), edge(s[0], s[1], p)) / area;
            if b.min_element() < 0.0 {
                continue;
            }
            let depth = b.x * screen[0].z + b.y * screen[1].z + b.z * screen[2].z;
            if !(0.0..=1.0).contains(&depth) {
                continue;
            }
            let perspective = b * inv_w;
            let weights = perspective / perspective.element_sum();
            fragment(Fragment {
                x,
                y,
                depth,
                front_facing,
                attributes: ClipVertex::weighted(tri, weights),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ndc_triangle(points: [(f32, f32); 3]) -> [ClipVertex; 3] {
        points.map(|(x, y)| ClipVertex::at(Vec4::new(x, y, 0.5, 1.0)))
    }

    #[test]
    fn covers_expected_half_of_the_target() {
        // Lower-left half in NDC, counter-clockwise.
        let tri = ndc_triangle([(-1.0, -1.0), (1.0, -1.0), (-1.0, 1.0)]);
        let mut count = 0;
        let mut front = true;
        rasterize_triangle(&tri, 16, 16, |f| {
            count += 1;
            front &= f.front_facing;
        });
        assert!((120..=136).contains(&count), "{count}");
        assert!(front);
    }

    #[test]
    fn clockwise_winding_is_back_facing() {
        let tri = ndc_triangle([(-1.0, -1.0), (-1.0, 1.0), (1.0, -1.0)]);
        let mut any = false;
        rasterize_triangle(&tri, 8, 8, |f| {
            any = true;
            assert!(!f.front_facing);
        });
        assert!(any);
    }

    #[test]
    fn triangle_behind_near_plane_is_dropped() {
        let tri = [(-1.0, -1.0), (1.0, -1.0), (0.0, 1.0)].map(|(x, y)| ClipVertex::at(Vec4::new(x, y, -0.5, 1.0)));
        let mut count = 0;
        rasterize_triangle(&tri, 8, 8, |_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn attributes_interpolate_across_the_face() {
        let mut tri = ndc_triangle([(-1.0, -1.0), (3.0, -1.0), (-1.0, 3.0)]);
        tri[0].uv = Vec2::ZERO;
        tri[1].uv = Vec2::new(2.0, 0.0);
        tri[2].uv = Vec2::new(0.0, 2.0);
        rasterize_triangle(&tri, 4, 4, |f| {
            let expected_u = (f.x as f32 + 0.5) / 4.0;
            assert!((f.attributes.uv.x - expected_u).abs() < 1e-4);
        });
    }
}
