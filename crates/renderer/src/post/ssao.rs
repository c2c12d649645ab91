//! Screen-space ambient occlusion: hemisphere kernel, tiled rotation noise,
//! view-space depth comparison with a range check.

use crate::camera::CameraMatrices;
use crate::color::smoothstep;
use crate::image::HdrImage;
use glam::{Mat3, Vec3, Vec4, Vec4Swizzles};
use rand::rngs::StdRng;
use rand::Rng;

pub const MAX_KERNEL_SIZE: usize = 64;
pub const NOISE_DIM: u32 = 4;

/// Hemisphere samples around +Z, denser near the origin.
pub fn generate_kernel(rng: &mut StdRng, size: usize) -> Vec<Vec3> {
    let size = size.clamp(1, MAX_KERNEL_SIZE);
    (0..size)
        .map(|i| {
            let dir = Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), rng.gen_range(0.0..1.0))
                .try_normalize()
                .unwrap_or(Vec3::Z);
            let scale = i as f32 / size as f32;
            let scale = 0.1 + 0.9 * scale * scale;
            dir * rng.gen_range(0.0..1.0f32) * scale
        })
        .collect()
}

/// 4x4 tile of unit rotation vectors in the tangent plane.
pub fn generate_noise(rng: &mut StdRng) -> Vec<Vec3> {
    (0..NOISE_DIM * NOISE_DIM)
        .map(|_| {
            Vec3::new(rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0), 0.0)
                .try_normalize()
                .unwrap_or(Vec3::X)
        })
        .collect()
}

pub struct SsaoInputs<'a> {
    pub position: &'a HdrImage,
    pub normal: &'a HdrImage,
    pub camera: &'a CameraMatrices,
    pub kernel: &'a [Vec3],
    pub noise: &'a [Vec3],
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SsaoParams {
    pub radius: f32,
    pub bias: f32,
    pub power: f32,
    pub samples: usize,
}

/// Visibility per pixel in [0, 1]; 1 = unoccluded. Uncovered pixels are 1.
pub fn compute_occlusion(inputs: &SsaoInputs<'_>, params: &SsaoParams) -> HdrImage {
    let (w, h) = inputs.position.size();
    let view = inputs.camera.view;
    let view_normal = Mat3::from_mat4(view);
    let samples = params.samples.clamp(1, inputs.kernel.len().max(1)).min(inputs.kernel.len());

    HdrImage::from_fn(w, h, |x, y| {
        let p = inputs.position.get(x, y);
        if p.w < 0.5 || samples == 0 {
            return Vec4::ONE;
        }
        let frag = (view * p.xyz().extend(1.0)).xyz();
        let normal = (view_normal * inputs.normal.get(x, y).xyz()).normalize_or_zero();
        let noise_index = ((y % NOISE_DIM) * NOISE_DIM + (x % NOISE_DIM)) as usize;
        let random = inputs.noise.get(noise_index).copied().unwrap_or(Vec3::X);

        let tangent = (random - normal * random.dot(normal))
            .try_normalize()
            .unwrap_or_else(|| normal.any_orthonormal_vector());
        let bitangent = normal.cross(tangent);
        let tbn = Mat3::from_cols(tangent, bitangent, normal);

        let mut occlusion = 0.0;
        for sample in &inputs.kernel[..samples] {
            let sample_pos = frag + tbn * *sample * params.radius;
            let clip = inputs.camera.projection * sample_pos.extend(1.0);
            if clip.w <= f32::EPSILON {
                continue;
            }
            let ndc = clip.xyz() / clip.w;
            let uv = glam::Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5);
            let sx = (uv.x * w as f32).floor() as i32;
            let sy = (uv.y * h as f32).floor() as i32;
            let scene = inputs.position.get_clamped(sx, sy);
            if scene.w < 0.5 {
                continue;
            }
            let scene_depth = (view * scene.xyz().extend(1.0)).z;
            let range = smoothstep(0.0, 1.0, params.radius / (frag.z - scene_depth).abs().max(1e-4));
            if scene_depth >= sample_pos.z + params.bias {
                occlusion += range;
            }
        }
        let visibility = (1.0 - occlusion / samples as f32).clamp(0.0, 1.0).powf(params.power);
        Vec4::new(visibility, visibility, visibility, 1.0)
    })
}

/// Box blur over the noise tile to remove the rotation pattern.
pub fn blur_occlusion(ao: &HdrImage) -> HdrImage {
    let half = NOISE_DIM as i32 / 2;
    ao.map(|x, y, _| {
        let mut sum = 0.0;
        for dy in -half..half {
            for dx in -half..half {
                sum += ao.get_clamped(x as i32 + dx, y as i32 + dy).x;
            }
        }
        let v = sum / (NOISE_DIM * NOISE_DIM) as f32;
        Vec4::new(v, v, v, 1.0)
    })
}

/// Multiply lit colour by visibility.
pub fn apply_occlusion(color: &HdrImage, ao: &HdrImage) -> HdrImage {
    color.map(|x, y, c| (c.xyz() * ao.get(x, y).x).extend(c.w))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use rand::SeedableRng;

    #[test]
    fn kernel_stays_in_unit_hemisphere() {
        let mut rng = StdRng::seed_from_u64(7);
        let kernel = generate_kernel(&mut rng, 64);
        assert_eq!(kernel.len(), 64);
        assert!(kernel.iter().all(|s| s.z >= 0.0 && s.length() <= 1.0 + 1e-5));
        assert_eq!(generate_kernel(&mut rng, 500).len(), MAX_KERNEL_SIZE);
    }

    #[test]
    fn noise_vectors_lie_in_tangent_plane() {
        let mut rng = StdRng::seed_from_u64(7);
        let noise = generate_noise(&mut rng);
        assert_eq!(noise.len(), 16);
        assert!(noise.iter().all(|n| n.z == 0.0 && (n.length() - 1.0).abs() < 1e-4));
    }

    #[test]
    fn occlusion_is_bounded_on_flat_floor() {
        let camera = Camera::looking_at(glam::Vec3::new(0.0, 4.0, 4.0), glam::Vec3::ZERO);
        let matrices = CameraMatrices::from_view(&camera, None);
        let (w, h) = (16, 16);
        // Every pixel sees a point on y = 0 below the camera.
        let position = HdrImage::from_fn(w, h, |x, y| {
            Vec4::new(x as f32 * 0.1 - 0.8, 0.0, y as f32 * 0.1 - 0.8, 1.0)
        });
        let normal = HdrImage::filled(w, h, Vec4::new(0.0, 1.0, 0.0, 0.5));
        let mut rng = StdRng::seed_from_u64(1);
        let kernel = generate_kernel(&mut rng, 16);
        let noise = generate_noise(&mut rng);
        let inputs = SsaoInputs {
            position: &position,
            normal: &normal,
            camera: &matrices,
            kernel: &kernel,
            noise: &noise,
        };
        let params = SsaoParams {
            radius: 0.5,
            bias: 0.025,
            power: 1.0,
            samples: 16,
        };
        let ao = compute_occlusion(&inputs, &params);
        assert!(ao.pixels().iter().all(|p| (0.0..=1.0).contains(&p.x)));
    }

    #[test]
    fn uncovered_pixels_are_fully_visible() {
        let camera = Camera::new(glam::Vec3::ZERO);
        let matrices = CameraMatrices::from_view(&camera, None);
        let empty = HdrImage::new(4, 4);
        let kernel = vec![Vec3::Z * 0.5];
        let noise = vec![Vec3::X];
        let inputs = SsaoInputs {
            position: &empty,
            normal: &empty,
            camera: &matrices,
            kernel: &kernel,
            noise: &noise,
        };
        let params = SsaoParams {
            radius: 0.5,
            bias: 0.025,
            power: 2.0,
            samples: 4,
        };
        let ao = compute_occlusion(&inputs, &params);
        assert!(ao.pixels().iter().all(|p| p.x == 1.0));
    }
}
