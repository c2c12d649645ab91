//! CPU-side RGBA float images used by the software backend and the CPU post chain.

use glam::{Vec2, Vec3, Vec4, Vec4Swizzles};

#[derive(Debug, Clone, PartialEq)]
pub struct HdrImage {
    width: u32,
    height: u32,
    pixels: Vec<Vec4>,
}

impl HdrImage {
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, Vec4::ZERO)
    }

    pub fn filled(width: u32, height: u32, value: Vec4) -> Self {
        Self {
            width,
            height,
            pixels: vec![value; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> Vec4) -> Self {
        let mut pixels = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                pixels.push(f(x, y));
            }
        }
        Self { width, height, pixels }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixels(&self) -> &[Vec4] {
        &self.pixels
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[self.index(x, y)]
    }

    pub fn set(&mut self, x: u32, y: u32, value: Vec4) {
        let i = self.index(x, y);
        self.pixels[i] = value;
    }

    pub fn rgb(&self, x: u32, y: u32) -> Vec3 {
        self.get(x, y).xyz()
    }

    /// Texel fetch with clamp-to-edge addressing.
    pub fn get_clamped(&self, x: i32, y: i32) -> Vec4 {
        if self.pixels.is_empty() {
            return Vec4::ZERO;
        }
        let x = x.clamp(0, self.width as i32 - 1) as u32;
        let y = y.clamp(0, self.height as i32 - 1) as u32;
        self.get(x, y)
    }

    /// Bilinear sample at normalized `uv` (texel centres at half-integers).
    pub fn sample_bilinear(&self, uv: Vec2) -> Vec4 {
        let px = uv.x * self.width as f32 - 0.5;
        let py = uv.y * self.height as f32 - 0.5;
        let (x0, y0) = (px.floor(), py.floor());
        let (fx, fy) = (px - x0, py - y0);
        let (x0, y0) = (x0 as i32, y0 as i32);
        let a = self.get_clamped(x0, y0);
        let b = self.get_clamped(x0 + 1, y0);
        let c = self.get_clamped(x0, y0 + 1);
        let d = self.get_clamped(x0 + 1, y0 + 1);
        a.lerp(b, fx).lerp(c.lerp(d, fx), fy)
    }

    /// Normalized coordinate of a texel centre.
    pub fn uv(&self, x: u32, y: u32) -> Vec2 {
        Vec2::new(
            (x as f32 + 0.5) / self.width as f32,
            (y as f32 + 0.5) / self.height as f32,
        )
    }

    /// New image with `f` applied to every texel.
    pub fn map(&self, mut f: impl FnMut(u32, u32, Vec4) -> Vec4) -> Self {
        Self::from_fn(self.width, self.height, |x, y| f(x, y, self.get(x, y)))
    }

    /// Byte size of the image when stored with `bytes_per_texel`.
    pub fn byte_size(&self, bytes_per_texel: u64) -> u64 {
        self.width as u64 * self.height as u64 * bytes_per_texel
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_fetch_repeats_edges() {
        let img = HdrImage::from_fn(2, 2, |x, y| Vec4::new(x as f32, y as f32, 0.0, 1.0));
        assert_eq!(img.get_clamped(-5, 0), img.get(0, 0));
        assert_eq!(img.get_clamped(9, 9), img.get(1, 1));
    }

    #[test]
    fn bilinear_at_texel_centre_is_exact() {
        let img = HdrImage::from_fn(4, 4, |x, y| Vec4::splat((x + y * 4) as f32));
        assert_eq!(img.sample_bilinear(img.uv(2, 1)), img.get(2, 1));
    }

    #[test]
    fn bilinear_between_texels_interpolates() {
        let img = HdrImage::from_fn(2, 1, |x, _| Vec4::splat(x as f32));
        let mid = img.sample_bilinear(Vec2::new(0.5, 0.5));
        assert!((mid.x - 0.5).abs() < 1e-6);
    }
}
