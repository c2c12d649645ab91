//! CPU versions of the single-pass post stages.

use super::bloom::{gaussian_blur, knee_weight};
use super::pingpong::PingPong;
use crate::camera::{project_with, CameraMatrices};
use crate::color::{luminance, smoothstep};
use crate::image::HdrImage;
use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};
use noise::{NoiseFn, Value};
use std::f32::consts::SQRT_2;

const MOTION_BLUR_SAMPLES: u32 = 8;
const LENS_GHOSTS: u32 = 4;
const LENS_GHOST_SPACING: f32 = 0.3;
const TAA_HISTORY_WEIGHT: f32 = 0.9;

fn texel(image: &HdrImage, uv: Vec2) -> Vec4 {
    let x = (uv.x * image.width() as f32).floor() as i32;
    let y = (uv.y * image.height() as f32).floor() as i32;
    image.get_clamped(x, y)
}

/// Screen-space motion per pixel: current uv minus previous uv. Uncovered pixels are static.
pub fn velocity_buffer(position: &HdrImage, camera: &CameraMatrices) -> Option<HdrImage> {
    let previous = camera.previous_view_projection?;
    Some(position.map(|_, _, p| {
        if p.w < 0.5 {
            return Vec4::ZERO;
        }
        match (camera.project(p.xyz()), project_with(&previous, p.xyz())) {
            (Some(now), Some(before)) => (now - before).extend(0.0).extend(1.0),
            _ => Vec4::ZERO,
        }
    }))
}

pub struct SsrParams {
    pub intensity: f32,
    pub max_steps: u32,
    pub thickness: f32,
    pub step: f32,
}

/// Linear ray march along the reflected view ray, hit-tested against the position buffer.
pub fn screen_space_reflections(
    color: &HdrImage,
    position: &HdrImage,
    normal: &HdrImage,
    camera: &CameraMatrices,
    params: &SsrParams,
) -> HdrImage {
    color.map(|x, y, c| {
        let p = position.get(x, y);
        let n = normal.get(x, y);
        let roughness = n.w;
        if p.w < 0.5 || roughness > 0.8 {
            return c;
        }
        let origin = p.xyz();
        let normal = n.xyz().normalize_or_zero();
        let v = (camera.position - origin).normalize_or_zero();
        let r = normal * (2.0 * normal.dot(v)) - v;

        for i in 1..=params.max_steps {
            let point = origin + r * (params.step * i as f32);
            let Some(uv) = camera.project(point) else {
                break;
            };
            if !(0.0..=1.0).contains(&uv.x) || !(0.0..=1.0).contains(&uv.y) {
                break;
            }
            let scene = texel(position, uv);
            if scene.w < 0.5 {
                continue;
            }
            let ray_depth = (point - camera.position).length();
            let scene_depth = (scene.xyz() - camera.position).length();
            let behind = ray_depth - scene_depth;
            if behind > 0.0 && behind < params.thickness {
                let edge = Vec2::new(uv.x.min(1.0 - uv.x), uv.y.min(1.0 - uv.y)).min_element();
                let fade = smoothstep(0.0, 0.1, edge);
                let strength = params.intensity * (1.0 - roughness).powi(2) * fade;
                let hit = texel(color, uv).xyz();
                return (c.xyz() + hit * strength).extend(c.w);
            }
        }
        c
    })
}

/// Circle-of-confusion blend between sharp and blurred colour.
pub fn depth_of_field(
    color: &HdrImage,
    position: &HdrImage,
    camera_position: Vec3,
    focus_distance: f32,
    aperture: f32,
) -> HdrImage {
    let mut targets = PingPong::new(color.clone(), HdrImage::new(color.width(), color.height()));
    gaussian_blur(&mut targets, 2, 1.0 + aperture);
    let blurred = targets.read();
    color.map(|x, y, c| {
        let p = position.get(x, y);
        let coc = if p.w < 0.5 {
            1.0
        } else {
            let distance = (p.xyz() - camera_position).length();
            (aperture * (distance - focus_distance).abs() / focus_distance.max(1e-3)).clamp(0.0, 1.0)
        };
        c.lerp(blurred.get(x, y), coc)
    })
}

pub fn motion_blur(color: &HdrImage, velocity: &HdrImage, intensity: f32) -> HdrImage {
    color.map(|x, y, c| {
        let v = velocity.get(x, y).xy() * intensity;
        if v.length_squared() < 1e-10 {
            return c;
        }
        let uv = color.uv(x, y);
        let mut sum = Vec3::ZERO;
        for i in 0..MOTION_BLUR_SAMPLES {
            let t = i as f32 / (MOTION_BLUR_SAMPLES - 1) as f32;
            sum += color.sample_bilinear(uv - v * t).xyz();
        }
        (sum / MOTION_BLUR_SAMPLES as f32).extend(c.w)
    })
}

/// Ghosts of bright regions mirrored through the screen centre.
pub fn lens_flares(color: &HdrImage, threshold: f32, intensity: f32) -> HdrImage {
    color.map(|x, y, c| {
        let uv = color.uv(x, y);
        let mirrored = Vec2::ONE - uv;
        let to_centre = (Vec2::splat(0.5) - mirrored) * LENS_GHOST_SPACING;
        let mut flare = Vec3::ZERO;
        for i in 0..LENS_GHOSTS {
            let ghost = mirrored + to_centre * i as f32;
            let sample_uv = ghost - ghost.floor();
            let s = color.sample_bilinear(sample_uv).xyz().max(Vec3::ZERO);
            let weight = 1.0 - ((Vec2::splat(0.5) - sample_uv).length() / 0.7071).min(1.0);
            flare += s * knee_weight(s.max_element(), threshold, 0.1) * weight.powi(4);
        }
        (c.xyz() + flare * intensity).extend(c.w)
    })
}

/// Per-pixel grain. Sampling value noise on its lattice gives one independent value per pixel.
pub fn film_grain(color: &HdrImage, intensity: f32, frame_index: u64) -> HdrImage {
    let grain = Value::new((frame_index % 4096) as u32 * 131);
    color.map(|x, y, c| {
        let noise = grain.get([x as f64, y as f64]) as f32 * 0.5;
        (c.xyz() + Vec3::splat(noise * intensity)).clamp(Vec3::ZERO, Vec3::ONE).extend(c.w)
    })
}

pub fn vignette(color: &HdrImage, intensity: f32, softness: f32) -> HdrImage {
    color.map(|x, y, c| {
        let d = (color.uv(x, y) - Vec2::splat(0.5)).length() * SQRT_2;
        let shade = 1.0 - intensity * smoothstep(0.75 * (1.0 - softness), 1.0, d);
        (c.xyz() * shade).extend(c.w)
    })
}

pub fn chromatic_aberration(color: &HdrImage, intensity: f32) -> HdrImage {
    color.map(|x, y, c| {
        let uv = color.uv(x, y);
        let offset = (uv - Vec2::splat(0.5)) * intensity * 0.02;
        let r = color.sample_bilinear(uv + offset).x;
        let b = color.sample_bilinear(uv - offset).z;
        Vec4::new(r, c.y, b, c.w)
    })
}

/// Unsharp mask against the 4-neighbour average.
pub fn sharpen(color: &HdrImage, strength: f32) -> HdrImage {
    color.map(|x, y, c| {
        let (x, y) = (x as i32, y as i32);
        let blur = (color.get_clamped(x - 1, y)
            + color.get_clamped(x + 1, y)
            + color.get_clamped(x, y - 1)
            + color.get_clamped(x, y + 1))
            .xyz()
            * 0.25;
        let sharpened = c.xyz() + (c.xyz() - blur) * strength;
        sharpened.clamp(Vec3::ZERO, Vec3::ONE).extend(c.w)
    })
}

const FXAA_REDUCE_MIN: f32 = 1.0 / 128.0;
const FXAA_REDUCE_MUL: f32 = 1.0 / 8.0;
const FXAA_SPAN_MAX: f32 = 8.0;

/// Fast approximate anti-aliasing on display-range colour.
pub fn fxaa(color: &HdrImage) -> HdrImage {
    let texel_size = Vec2::new(1.0 / color.width() as f32, 1.0 / color.height() as f32);
    color.map(|x, y, c| {
        let (xi, yi) = (x as i32, y as i32);
        let luma = |dx: i32, dy: i32| luminance(color.get_clamped(xi + dx, yi + dy).xyz());
        let (nw, ne, sw, se, m) = (luma(-1, -1), luma(1, -1), luma(-1, 1), luma(1, 1), luminance(c.xyz()));
        let luma_min = m.min(nw.min(ne).min(sw.min(se)));
        let luma_max = m.max(nw.max(ne).max(sw.max(se)));

        let dir = Vec2::new(-((nw + ne) - (sw + se)), (nw + sw) - (ne + se));
        let reduce = ((nw + ne + sw + se) * 0.25 * FXAA_REDUCE_MUL).max(FXAA_REDUCE_MIN);
        let rcp = 1.0 / (dir.x.abs().min(dir.y.abs()) + reduce);
        let dir = (dir * rcp).clamp(Vec2::splat(-FXAA_SPAN_MAX), Vec2::splat(FXAA_SPAN_MAX)) * texel_size;

        let uv = color.uv(x, y);
        let sample = |t: f32| color.sample_bilinear(uv + dir * t).xyz();
        let rgb_a = (sample(1.0 / 3.0 - 0.5) + sample(2.0 / 3.0 - 0.5)) * 0.5;
        let rgb_b = rgb_a * 0.5 + (sample(-0.5) + sample(0.5)) * 0.25;
        let luma_b = luminance(rgb_b);
        let out = if luma_b < luma_min || luma_b > luma_max { rgb_a } else { rgb_b };
        out.extend(c.w)
    })
}

/// Temporal resolve: reproject history with velocity and clamp to the 3x3 neighbourhood.
pub fn temporal_aa(color: &HdrImage, history: &HdrImage, velocity: &HdrImage) -> HdrImage {
    color.map(|x, y, c| {
        let (xi, yi) = (x as i32, y as i32);
        let mut lo = Vec3::splat(f32::MAX);
        let mut hi = Vec3::splat(f32::MIN);
        for dy in -1..=1 {
            for dx in -1..=1 {
                let n = color.get_clamped(xi + dx, yi + dy).xyz();
                lo = lo.min(n);
                hi = hi.max(n);
            }
        }
        let previous_uv = color.uv(x, y) - velocity.get(x, y).xy();
        let previous = history.sample_bilinear(previous_uv).xyz().clamp(lo, hi);
        previous.lerp(c.xyz(), 1.0 - TAA_HISTORY_WEIGHT).extend(c.w)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: f32) -> HdrImage {
        HdrImage::filled(8, 8, Vec4::new(value, value, value, 1.0))
    }

    #[test]
    fn fxaa_leaves_uniform_image_untouched() {
        let img = flat(0.4);
        let out = fxaa(&img);
        for p in out.pixels() {
            assert!((p.x - 0.4).abs() < 1e-5);
        }
    }

    #[test]
    fn fxaa_softens_hard_edge() {
        let img = HdrImage::from_fn(8, 8, |x, y| if x > y { Vec4::ONE } else { Vec4::W });
        let out = fxaa(&img);
        let changed = out.pixels().iter().zip(img.pixels()).any(|(a, b)| (a.x - b.x).abs() > 1e-3);
        assert!(changed);
    }

    #[test]
    fn vignette_darkens_corners_more_than_centre() {
        let out = vignette(&flat(1.0), 0.5, 0.4);
        assert!(out.get(0, 0).x < out.get(4, 4).x);
    }

    #[test]
    fn sharpen_is_identity_on_flat_colour() {
        let out = sharpen(&flat(0.5), 2.0);
        assert!(out.pixels().iter().all(|p| (p.x - 0.5).abs() < 1e-6));
    }

    #[test]
    fn film_grain_stays_in_display_range() {
        let out = film_grain(&flat(0.98), 1.0, 3);
        assert!(out.pixels().iter().all(|p| p.x <= 1.0 && p.x >= 0.0));
    }

    #[test]
    fn film_grain_changes_between_frames() {
        let base = flat(0.5);
        let a = film_grain(&base, 0.2, 1);
        assert_eq!(a, film_grain(&base, 0.2, 1));
        assert_ne!(a, film_grain(&base, 0.2, 2));
        assert!(a.pixels().iter().all(|p| (p.x - 0.5).abs() <= 0.1 + 1e-6));
    }

    #[test]
    fn zero_chromatic_aberration_is_identity() {
        let img = HdrImage::from_fn(8, 8, |x, y| Vec4::new(x as f32 / 8.0, y as f32 / 8.0, 0.5, 1.0));
        let out = chromatic_aberration(&img, 0.0);
        for (a, b) in out.pixels().iter().zip(img.pixels()) {
            assert!((*a - *b).abs().max_element() < 1e-5);
        }
    }

    #[test]
    fn velocity_needs_previous_frame() {
        let camera = crate::camera::Camera::looking_at(Vec3::new(0.0, 2.0, 5.0), Vec3::ZERO);
        let position = HdrImage::filled(4, 4, Vec4::W);
        let first = CameraMatrices::from_view(&camera, None);
        assert!(velocity_buffer(&position, &first).is_none());

        let still = CameraMatrices::from_view(&camera, Some(first.view_projection));
        let velocity = velocity_buffer(&position, &still).expect("previous frame set");
        assert!(velocity.pixels().iter().all(|v| v.xy().length() < 1e-5));
    }

    #[test]
    fn temporal_aa_clamps_history_to_neighbourhood() {
        let current = flat(0.5);
        let history = flat(0.4);
        let velocity = HdrImage::new(8, 8);
        let out = temporal_aa(&current, &history, &velocity);
        assert!((out.get(3, 3).x - 0.5).abs() < 1e-5);
    }
}
