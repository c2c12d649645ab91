//! Per-light radiance, ambient terms and the full deferred shading function.
//!
//! `shade` is the CPU counterpart of `lighting.wgsl` and is what the software
//! backend runs per G-buffer texel.

use crate::brdf;
use crate::light::{Light, LightType};
use crate::shadow::{pcf_shadow, DepthLookup, ShadowAssignment};
use glam::Vec3;
use std::f32::consts::PI;

/// Material and geometry read back from the G-buffer for one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SurfaceSample {
    pub position: Vec3,
    pub normal: Vec3,
    pub albedo: Vec3,
    pub metallic: f32,
    pub roughness: f32,
    pub ao: f32,
    pub emission: Vec3,
}

/// Incoming light at a surface point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightSample {
    /// Unit vector from the surface toward the light.
    pub to_light: Vec3,
    pub radiance: Vec3,
}

/// Incoming radiance from `light` at `position`, or `None` when the light has
/// no direct surface contribution.
pub fn light_radiance(light: &Light, position: Vec3, intensity_scale: f32) -> Option<LightSample> {
    if !light.enabled || !light.light_type.is_direct() {
        return None;
    }
    let base = light.color * light.intensity * intensity_scale;
    if light.light_type == LightType::Directional {
        let to_light = -light.direction.try_normalize()?;
        return Some(LightSample {
            to_light,
            radiance: base,
        });
    }

    let offset = light.position - position;
    let distance = offset.length();
    let to_light = offset.try_normalize()?;
    let axis = light.direction.try_normalize().unwrap_or(Vec3::NEG_Y);
    let cos_theta = (-to_light).dot(axis);

    // Lumens to candela for an isotropic emitter.
    let mut radiance = base / (4.0 * PI) * light.attenuation.factor(distance);
    match light.light_type {
        LightType::Spot => radiance *= light.spot.factor(cos_theta),
        LightType::Area => radiance *= light.area.area() * cos_theta.max(0.0),
        LightType::Ies => {
            if let Some(profile) = &light.ies_profile {
                radiance *= profile.sample(cos_theta.clamp(-1.0, 1.0).acos());
            }
        }
        _ => {}
    }
    Some(LightSample { to_light, radiance })
}

/// Six directional colours (+X -X +Y -Y +Z -Z) blended by squared normal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AmbientCube {
    pub faces: [Vec3; 6],
}

impl AmbientCube {
    pub fn uniform(color: Vec3) -> Self {
        Self { faces: [color; 6] }
    }

    /// Sky-over-ground gradient.
    pub fn gradient(sky: Vec3, horizon: Vec3, ground: Vec3) -> Self {
        Self {
            faces: [horizon, horizon, sky, ground, horizon, horizon],
        }
    }

    pub fn sample(&self, n: Vec3) -> Vec3 {
        let sq = n * n;
        let x = if n.x >= 0.0 { self.faces[0] } else { self.faces[1] };
        let y = if n.y >= 0.0 { self.faces[2] } else { self.faces[3] };
        let z = if n.z >= 0.0 { self.faces[4] } else { self.faces[5] };
        x * sq.x + y * sq.y + z * sq.z
    }
}

/// Low-frequency environment lighting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImageBasedLighting {
    /// Cosine-convolved environment.
    pub irradiance: AmbientCube,
    /// Mirror-direction environment; blended toward irradiance with roughness.
    pub specular: AmbientCube,
    pub intensity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Ambient {
    Flat(Vec3),
    ImageBased(ImageBasedLighting),
}

/// Ambient and indirect contribution. `sky_fill` is the summed Sky-light colour.
pub fn ambient_term(ambient: &Ambient, surface: &SurfaceSample, v: Vec3, sky_fill: Vec3) -> Vec3 {
    let fill = sky_fill * surface.albedo * surface.ao;
    match ambient {
        Ambient::Flat(color) => *color * surface.albedo * surface.ao + fill,
        Ambient::ImageBased(ibl) => {
            let n = surface.normal;
            let n_dot_v = n.dot(v).max(0.0);
            let f0 = brdf::base_reflectivity(surface.albedo, surface.metallic);
            let f = brdf::fresnel_schlick_roughness(n_dot_v, f0, surface.roughness);
            let k_d = (Vec3::ONE - f) * (1.0 - surface.metallic);
            let diffuse = ibl.irradiance.sample(n) * surface.albedo;

            let r = n * (2.0 * n.dot(v)) - v;
            let prefiltered = ibl
                .specular
                .sample(r)
                .lerp(ibl.irradiance.sample(r), surface.roughness);
            let env = brdf::env_brdf(n_dot_v, surface.roughness);
            let specular = prefiltered * (f * env.x + Vec3::splat(env.y));
            (k_d * diffuse + specular) * surface.ao * ibl.intensity + fill
        }
    }
}

/// Shadow visibility source for the lighting pass.
pub trait ShadowLookup {
    /// 0 = fully lit, 1 = fully shadowed.
    fn shadow_factor(&self, assignment: &ShadowAssignment, position: Vec3, normal: Vec3, to_light: Vec3) -> f32;
}

/// PCF against a layered depth map.
pub struct PcfShadows<'a> {
    pub map: &'a dyn DepthLookup,
}

impl ShadowLookup for PcfShadows<'_> {
    fn shadow_factor(&self, assignment: &ShadowAssignment, position: Vec3, normal: Vec3, to_light: Vec3) -> f32 {
        let (layer, m) = assignment.lookup(position);
        let bias = assignment.settings.bias_for(normal.dot(to_light).max(0.0));
        pcf_shadow(self.map, layer, &m, position, bias, assignment.settings.softness)
    }
}

/// A light together with its shadow slot for this frame.
#[derive(Debug, Clone, Copy)]
pub struct ShadedLight<'a> {
    pub light: &'a Light,
    pub shadow: Option<&'a ShadowAssignment>,
}

/// Frame-wide inputs to shading that are not per-light.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LightingEnvironment {
    pub ambient: Ambient,
    pub sky_fill: Vec3,
    pub intensity_scale: f32,
}

/// Shadow factor for one light: always 0 unless the light casts and owns a slot.
pub fn light_shadow_factor(
    light: &ShadedLight<'_>,
    surface: &SurfaceSample,
    to_light: Vec3,
    shadows: &dyn ShadowLookup,
) -> f32 {
    match light.shadow {
        Some(assignment) if light.light.casts_shadows => {
            shadows.shadow_factor(assignment, surface.position, surface.normal, to_light)
        }
        _ => 0.0,
    }
}

/// Linear HDR radiance leaving `surface` toward `camera_position`.
pub fn shade(
    surface: &SurfaceSample,
    camera_position: Vec3,
    lights: &[ShadedLight<'_>],
    shadows: &dyn ShadowLookup,
    environment: &LightingEnvironment,
) -> Vec3 {
    let v = (camera_position - surface.position).normalize_or_zero();
    let mut lo = Vec3::ZERO;
    for shaded in lights {
        let Some(sample) = light_radiance(shaded.light, surface.position, environment.intensity_scale) else {
            continue;
        };
        if surface.normal.dot(sample.to_light) <= 0.0 {
            continue;
        }
        let shadow = light_shadow_factor(shaded, surface, sample.to_light, shadows);
        let reflected = brdf::cook_torrance(
            surface.normal,
            v,
            sample.to_light,
            surface.albedo,
            surface.metallic,
            surface.roughness,
        );
        lo += reflected * sample.radiance * (1.0 - shadow);
    }
    lo + ambient_term(&environment.ambient, surface, v, environment.sky_fill) + surface.emission
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shadow::ShadowProjection;
    use glam::Mat4;
    use std::cell::Cell;

    struct CountingShadows {
        calls: Cell<u32>,
    }

    impl ShadowLookup for CountingShadows {
        fn shadow_factor(&self, _: &ShadowAssignment, _: Vec3, _: Vec3, _: Vec3) -> f32 {
            self.calls.set(self.calls.get() + 1);
            1.0
        }
    }

    fn gray_surface() -> SurfaceSample {
        SurfaceSample {
            position: Vec3::ZERO,
            normal: Vec3::Y,
            albedo: Vec3::splat(0.8),
            metallic: 0.0,
            roughness: 0.5,
            ao: 1.0,
            emission: Vec3::ZERO,
        }
    }

    fn environment() -> LightingEnvironment {
        LightingEnvironment {
            ambient: Ambient::Flat(Vec3::splat(0.03)),
            sky_fill: Vec3::ZERO,
            intensity_scale: 0.001,
        }
    }

    #[test]
    fn directional_light_is_not_attenuated() {
        let light = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1000.0);
        let near = light_radiance(&light, Vec3::ZERO, 1.0).map(|s| s.radiance);
        let far = light_radiance(&light, Vec3::new(0.0, -500.0, 0.0), 1.0).map(|s| s.radiance);
        assert_eq!(near, far);
    }

    #[test]
    fn point_light_falls_off_with_distance() {
        let light = Light::point(Vec3::new(0.0, 2.0, 0.0), Vec3::ONE, 1000.0);
        let close = light_radiance(&light, Vec3::new(0.0, 1.0, 0.0), 1.0).map(|s| s.radiance.x);
        let distant = light_radiance(&light, Vec3::new(0.0, -8.0, 0.0), 1.0).map(|s| s.radiance.x);
        assert!(close > distant);
    }

    #[test]
    fn spot_light_is_dark_outside_cone() {
        let spot = Light::spot(Vec3::new(0.0, 5.0, 0.0), Vec3::NEG_Y, Vec3::ONE, 1000.0);
        let inside = light_radiance(&spot, Vec3::ZERO, 1.0).map(|s| s.radiance.x);
        let outside = light_radiance(&spot, Vec3::new(10.0, 4.0, 0.0), 1.0).map(|s| s.radiance.x);
        assert!(inside.is_some_and(|r| r > 0.0));
        assert_eq!(outside, Some(0.0));
    }

    #[test]
    fn sky_and_volume_lights_have_no_direct_radiance() {
        assert!(light_radiance(&Light::sky(Vec3::ONE, 1.0), Vec3::ZERO, 1.0).is_none());
        let volume = Light::point(Vec3::Y, Vec3::ONE, 10.0).with_type(LightType::Volume);
        assert!(light_radiance(&volume, Vec3::ZERO, 1.0).is_none());
    }

    #[test]
    fn non_casting_light_never_samples_shadow_map() {
        let light = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1000.0).with_shadows(false);
        let assignment = ShadowAssignment {
            light_index: 0,
            slot: 0,
            projection: ShadowProjection::Orthographic(Mat4::IDENTITY),
            settings: light.shadow,
            light_position: light.position,
        };
        let shadows = CountingShadows { calls: Cell::new(0) };
        let lights = [ShadedLight {
            light: &light,
            shadow: Some(&assignment),
        }];
        let lit = shade(&gray_surface(), Vec3::new(0.0, 5.0, 0.0), &lights, &shadows, &environment());
        assert_eq!(shadows.calls.get(), 0);
        assert!(lit.x > 0.1);
    }

    #[test]
    fn shadow_factor_only_dims_its_own_light() {
        let a = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1000.0);
        let b = Light::directional(Vec3::NEG_Y, Vec3::ONE, 1000.0).with_shadows(false);
        let assignment = ShadowAssignment {
            light_index: 0,
            slot: 0,
            projection: ShadowProjection::Orthographic(Mat4::IDENTITY),
            settings: a.shadow,
            light_position: a.position,
        };
        let shadows = CountingShadows { calls: Cell::new(0) };
        let eye = Vec3::new(0.0, 5.0, 0.0);
        let env = environment();
        let only_b = shade(&gray_surface(), eye, &[ShadedLight { light: &b, shadow: None }], &shadows, &env);
        let both = shade(
            &gray_surface(),
            eye,
            &[
                ShadedLight {
                    light: &a,
                    shadow: Some(&assignment),
                },
                ShadedLight { light: &b, shadow: None },
            ],
            &shadows,
            &env,
        );
        assert_eq!(shadows.calls.get(), 1);
        assert!((both - only_b).length() < 1e-6);
    }

    #[test]
    fn flat_ambient_is_scaled_by_albedo_and_occlusion() {
        let mut surface = gray_surface();
        surface.ao = 0.5;
        let ambient = ambient_term(&Ambient::Flat(Vec3::splat(0.03)), &surface, Vec3::Y, Vec3::ZERO);
        assert!((ambient.x - 0.03 * 0.8 * 0.5).abs() < 1e-6);
    }

    #[test]
    fn ambient_cube_picks_face_along_axis() {
        let cube = AmbientCube::gradient(Vec3::new(0.0, 0.0, 1.0), Vec3::ZERO, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(cube.sample(Vec3::Y), Vec3::new(0.0, 0.0, 1.0));
        assert_eq!(cube.sample(Vec3::NEG_Y), Vec3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn image_based_ambient_brightens_with_environment() {
        let dim = Ambient::ImageBased(ImageBasedLighting {
            irradiance: AmbientCube::uniform(Vec3::splat(0.1)),
            specular: AmbientCube::uniform(Vec3::splat(0.1)),
            intensity: 1.0,
        });
        let bright = Ambient::ImageBased(ImageBasedLighting {
            irradiance: AmbientCube::uniform(Vec3::splat(1.0)),
            specular: AmbientCube::uniform(Vec3::splat(1.0)),
            intensity: 1.0,
        });
        let s = gray_surface();
        assert!(ambient_term(&bright, &s, Vec3::Y, Vec3::ZERO).x > ambient_term(&dim, &s, Vec3::Y, Vec3::ZERO).x);
    }
}
