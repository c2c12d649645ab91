//! Bright-pass extraction, separable Gaussian blur and additive composite.

use super::pingpong::PingPong;
use crate::image::HdrImage;
use glam::{Vec3, Vec4Swizzles};

/// 9-tap Gaussian, centre weight first.
pub const GAUSSIAN_WEIGHTS: [f32; 5] = [0.227027, 0.1945946, 0.1216216, 0.054054, 0.016216];

/// Horizontal and vertical blur pairs for a given radius.
pub fn blur_iterations(radius: f32) -> u32 {
    (radius * 4.0).round().clamp(1.0, 32.0) as u32
}

/// Soft-knee threshold weight applied to a colour with brightest channel `brightness`.
pub fn knee_weight(brightness: f32, threshold: f32, knee: f32) -> f32 {
    let knee = knee.max(1e-5);
    let soft = (brightness - threshold + knee).clamp(0.0, 2.0 * knee);
    let soft = soft * soft / (4.0 * knee);
    (soft.max(brightness - threshold)) / brightness.max(1e-5)
}

pub fn bright_pass(image: &HdrImage, threshold: f32, knee: f32) -> HdrImage {
    image.map(|_, _, c| {
        let rgb = c.xyz().max(Vec3::ZERO);
        let weight = knee_weight(rgb.max_element(), threshold, knee);
        (rgb * weight).extend(1.0)
    })
}

/// Linear fetch `offset` texels away from (x, y) along (dx, dy).
fn fetch_along(src: &HdrImage, x: i32, y: i32, dx: i32, dy: i32, offset: f32) -> Vec3 {
    let whole = offset.floor();
    let frac = offset - whole;
    let o = whole as i32;
    let a = src.get_clamped(x + dx * o, y + dy * o).xyz();
    let b = src.get_clamped(x + dx * (o + 1), y + dy * (o + 1)).xyz();
    a.lerp(b, frac)
}

fn blur_step(src: &HdrImage, dst: &mut HdrImage, dx: i32, dy: i32, spread: f32) {
    *dst = HdrImage::from_fn(src.width(), src.height(), |x, y| {
        let (x, y) = (x as i32, y as i32);
        let mut sum = src.get_clamped(x, y).xyz() * GAUSSIAN_WEIGHTS[0];
        for (i, w) in GAUSSIAN_WEIGHTS.iter().enumerate().skip(1) {
            let offset = i as f32 * spread;
            sum += fetch_along(src, x, y, dx, dy, offset) * *w;
            sum += fetch_along(src, x, y, -dx, -dy, offset) * *w;
        }
        sum.extend(1.0)
    });
}

/// Separable blur through a read/write pair; the result is left on the read side.
pub fn gaussian_blur(targets: &mut PingPong<HdrImage>, iterations: u32, spread: f32) {
    for _ in 0..iterations {
        for (dx, dy) in [(1, 0), (0, 1)] {
            let (src, dst) = targets.split();
            blur_step(src, dst, dx, dy, spread);
            targets.swap();
        }
    }
}

/// Full bloom stage: extract, blur, add back scaled by `intensity`.
pub fn apply_bloom(image: &HdrImage, threshold: f32, knee: f32, radius: f32, intensity: f32) -> HdrImage {
    let bright = bright_pass(image, threshold, knee);
    let scratch = HdrImage::new(image.width(), image.height());
    let mut targets = PingPong::new(bright, scratch);
    gaussian_blur(&mut targets, blur_iterations(radius), 1.0 + radius);
    let bloom = targets.read();
    image.map(|x, y, c| {
        let add = bloom.get(x, y).xyz() * intensity;
        (c.xyz() + add).extend(c.w)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn weights_sum_to_one() {
        let total = GAUSSIAN_WEIGHTS[0] + 2.0 * GAUSSIAN_WEIGHTS[1..].iter().sum::<f32>();
        assert!((total - 1.0).abs() < 1e-3);
    }

    #[test]
    fn dim_pixels_contribute_nothing() {
        let img = HdrImage::filled(4, 4, Vec4::new(0.5, 0.5, 0.5, 1.0));
        let bright = bright_pass(&img, 1.0, 0.1);
        assert!(bright.pixels().iter().all(|p| p.xyz() == Vec3::ZERO));
    }

    #[test]
    fn bright_pixel_spreads_to_neighbours() {
        let img = HdrImage::from_fn(9, 9, |x, y| {
            if (x, y) == (4, 4) {
                Vec4::new(20.0, 20.0, 20.0, 1.0)
            } else {
                Vec4::W
            }
        });
        let out = apply_bloom(&img, 1.0, 0.1, 0.6, 0.5);
        assert!(out.get(5, 4).x > 0.0);
        assert!(out.get(4, 4).x > 20.0);
    }

    #[test]
    fn blur_preserves_uniform_image() {
        let flat = HdrImage::filled(6, 6, Vec4::new(2.0, 1.0, 0.5, 1.0));
        let mut pp = PingPong::new(flat.clone(), HdrImage::new(6, 6));
        gaussian_blur(&mut pp, 3, 1.5);
        for p in pp.read().pixels() {
            assert!((p.x - 2.0).abs() < 1e-3 && (p.z - 0.5).abs() < 1e-3);
        }
    }
}
