//! Cook-Torrance microfacet BRDF.
//!
//! Same terms as `lighting.wgsl`; the software backend and tests evaluate
//! these directly.

use glam::{Vec2, Vec3};
use std::f32::consts::PI;

/// Reflectance at normal incidence for dielectrics.
pub const DIELECTRIC_F0: f32 = 0.04;

/// GGX / Trowbridge-Reitz normal distribution.
pub fn distribution_ggx(n_dot_h: f32, roughness: f32) -> f32 {
    let a = roughness * roughness;
    let a2 = a * a;
    let n_dot_h = n_dot_h.max(0.0);
    let denom = n_dot_h * n_dot_h * (a2 - 1.0) + 1.0;
    a2 / (PI * denom * denom).max(1e-7)
}

/// Schlick-GGX geometry term for one direction, `k = (r + 1)² / 8`.
pub fn geometry_schlick_ggx(n_dot_v: f32, roughness: f32) -> f32 {
    let r = roughness + 1.0;
    let k = r * r / 8.0;
    n_dot_v / (n_dot_v * (1.0 - k) + k)
}

/// Smith combination of view and light geometry terms.
pub fn geometry_smith(n_dot_v: f32, n_dot_l: f32, roughness: f32) -> f32 {
    geometry_schlick_ggx(n_dot_v.max(0.0), roughness) * geometry_schlick_ggx(n_dot_l.max(0.0), roughness)
}

pub fn fresnel_schlick(cos_theta: f32, f0: Vec3) -> Vec3 {
    f0 + (Vec3::ONE - f0) * (1.0 - cos_theta).clamp(0.0, 1.0).powi(5)
}

/// Fresnel with roughness damping, for the ambient specular term.
pub fn fresnel_schlick_roughness(cos_theta: f32, f0: Vec3, roughness: f32) -> Vec3 {
    let max = Vec3::splat(1.0 - roughness).max(f0);
    f0 + (max - f0) * (1.0 - cos_theta).clamp(0.0, 1.0).powi(5)
}

/// `F0 = mix(0.04, albedo, metallic)`.
pub fn base_reflectivity(albedo: Vec3, metallic: f32) -> Vec3 {
    Vec3::splat(DIELECTRIC_F0).lerp(albedo, metallic)
}

/// Outgoing radiance per unit incoming radiance: `(kD·albedo/π + specular)·n·l`.
///
/// `n`, `v` and `l` must be normalized; `l` points toward the light.
pub fn cook_torrance(n: Vec3, v: Vec3, l: Vec3, albedo: Vec3, metallic: f32, roughness: f32) -> Vec3 {
    let n_dot_l = n.dot(l).max(0.0);
    if n_dot_l <= 0.0 {
        return Vec3::ZERO;
    }
    let n_dot_v = n.dot(v).max(0.0);
    let h = (v + l).normalize_or_zero();
    let f0 = base_reflectivity(albedo, metallic);

    let ndf = distribution_ggx(n.dot(h), roughness);
    let g = geometry_smith(n_dot_v, n_dot_l, roughness);
    let f = fresnel_schlick(h.dot(v).max(0.0), f0);

    let specular = ndf * g * f / (4.0 * n_dot_v * n_dot_l + 0.001);
    let k_d = (Vec3::ONE - f) * (1.0 - metallic);
    (k_d * albedo / PI + specular) * n_dot_l
}

/// Split-sum environment BRDF as `(scale, bias)` applied to F0.
///
/// Analytic fit of the integrated BRDF table, used both directly and to bake
/// the GPU lookup texture.
pub fn env_brdf(n_dot_v: f32, roughness: f32) -> Vec2 {
    let c0 = [-1.0, -0.0275, -0.572, 0.022];
    let c1 = [1.0, 0.0425, 1.04, -0.04];
    let r = [
        roughness * c0[0] + c1[0],
        roughness * c0[1] + c1[1],
        roughness * c0[2] + c1[2],
        roughness * c0[3] + c1[3],
    ];
    let a004 = (r[0] * r[0]).min((-9.28 * n_dot_v.max(0.0)).exp2()) * r[0] + r[1];
    Vec2::new(-1.04 * a004 + r[2], 1.04 * a004 + r[3])
}

/// `size × size` table of [`env_brdf`], rows indexed by roughness, columns by n·v.
pub fn build_brdf_lut(size: u32) -> Vec<[f32; 2]> {
    let size = size.max(2);
    let mut lut = Vec::with_capacity((size * size) as usize);
    for y in 0..size {
        let roughness = (y as f32 + 0.5) / size as f32;
        for x in 0..size {
            let n_dot_v = (x as f32 + 0.5) / size as f32;
            lut.push(env_brdf(n_dot_v, roughness).to_array());
        }
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresnel_at_normal_incidence_is_f0() {
        let f0 = Vec3::new(0.04, 0.5, 0.9);
        assert!((fresnel_schlick(1.0, f0) - f0).length() < 1e-6);
        assert!((fresnel_schlick(0.0, f0) - Vec3::ONE).length() < 1e-6);
    }

    #[test]
    fn f0_interpolates_between_dielectric_and_albedo() {
        let albedo = Vec3::new(0.9, 0.6, 0.2);
        assert_eq!(base_reflectivity(albedo, 0.0), Vec3::splat(DIELECTRIC_F0));
        assert!((base_reflectivity(albedo, 1.0) - albedo).length() < 1e-6);
    }

    #[test]
    fn ggx_peaks_when_half_vector_aligns_with_normal() {
        let aligned = distribution_ggx(1.0, 0.3);
        let tilted = distribution_ggx(0.8, 0.3);
        assert!(aligned > tilted);
    }

    #[test]
    fn geometry_term_is_one_at_normal_incidence() {
        assert!((geometry_smith(1.0, 1.0, 0.5) - 1.0).abs() < 1e-6);
        assert!(geometry_smith(0.1, 0.1, 0.5) < 1.0);
    }

    #[test]
    fn light_behind_surface_contributes_nothing() {
        let out = cook_torrance(Vec3::Y, Vec3::Y, Vec3::NEG_Y, Vec3::splat(0.8), 0.0, 0.5);
        assert_eq!(out, Vec3::ZERO);
    }

    #[test]
    fn rough_dielectric_is_mostly_lambertian() {
        let out = cook_torrance(Vec3::Y, Vec3::Y, Vec3::Y, Vec3::splat(0.8), 0.0, 1.0);
        let lambert = 0.8 / PI;
        assert!(out.x > lambert * 0.9 && out.x < lambert * 1.3);
    }

    #[test]
    fn brdf_lut_stays_in_unit_range() {
        for texel in build_brdf_lut(8) {
            assert!(texel[0] >= -0.05 && texel[0] <= 1.05);
            assert!(texel[1] >= -0.05 && texel[1] <= 1.05);
        }
    }
}
