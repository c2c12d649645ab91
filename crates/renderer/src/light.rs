//! Light records consumed by the shadow and lighting passes.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Every light type the pipeline understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LightType {
    Directional,
    Point,
    Spot,
    Area,
    /// Uniform sky fill; feeds the ambient term only.
    Sky,
    /// Emissive geometry approximated as a point emitter.
    Mesh,
    /// Participating-media light; no direct surface radiance.
    Volume,
    /// Point light shaped by a measured candela profile.
    Ies,
}

/// How a light's shadow map is projected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowProjectionKind {
    Orthographic,
    Perspective,
    Cube,
}

impl LightType {
    /// Types that produce direct surface radiance.
    pub fn is_direct(&self) -> bool {
        !matches!(self, LightType::Sky | LightType::Volume)
    }

    pub fn can_cast_shadows(&self) -> bool {
        self.shadow_projection().is_some()
    }

    pub fn shadow_projection(&self) -> Option<ShadowProjectionKind> {
        match self {
            LightType::Directional => Some(ShadowProjectionKind::Orthographic),
            LightType::Spot | LightType::Area => Some(ShadowProjectionKind::Perspective),
            LightType::Point | LightType::Mesh | LightType::Ies => Some(ShadowProjectionKind::Cube),
            LightType::Sky | LightType::Volume => None,
        }
    }
}

/// Inverse-polynomial distance falloff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attenuation {
    pub constant: f32,
    pub linear: f32,
    pub quadratic: f32,
}

impl Default for Attenuation {
    fn default() -> Self {
        Self {
            constant: 1.0,
            linear: 0.09,
            quadratic: 0.032,
        }
    }
}

impl Attenuation {
    /// `1 / (constant + linear·d + quadratic·d²)`.
    pub fn factor(&self, distance: f32) -> f32 {
        let denom = self.constant + self.linear * distance + self.quadratic * distance * distance;
        if denom > 0.0 {
            1.0 / denom
        } else {
            0.0
        }
    }
}

/// Spot cone, angles in degrees measured across the full cone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpotCone {
    pub inner_angle: f32,
    pub outer_angle: f32,
}

impl Default for SpotCone {
    fn default() -> Self {
        Self {
            inner_angle: 30.0,
            outer_angle: 45.0,
        }
    }
}

impl SpotCone {
    pub fn cos_inner(&self) -> f32 {
        (self.inner_angle * 0.5).to_radians().cos()
    }

    pub fn cos_outer(&self) -> f32 {
        (self.outer_angle * 0.5).to_radians().cos()
    }

    /// Smooth cutoff `clamp((cosθ − cosOuter) / (cosInner − cosOuter), 0, 1)`.
    pub fn factor(&self, cos_theta: f32) -> f32 {
        let (inner, outer) = (self.cos_inner(), self.cos_outer());
        let epsilon = inner - outer;
        if epsilon <= f32::EPSILON {
            // Degenerate cone: hard edge at the outer angle.
            return if cos_theta >= outer { 1.0 } else { 0.0 };
        }
        ((cos_theta - outer) / epsilon).clamp(0.0, 1.0)
    }

    /// Shadow frustum field of view in degrees (twice the outer angle, kept below 180).
    pub fn shadow_fov_degrees(&self) -> f32 {
        (2.0 * self.outer_angle).clamp(1.0, 179.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AreaShape {
    Rectangle,
    Disk,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AreaLight {
    /// Width and height in metres; a disk uses `x` as its diameter.
    pub size: Vec2,
    pub shape: AreaShape,
}

impl Default for AreaLight {
    fn default() -> Self {
        Self {
            size: Vec2::ONE,
            shape: AreaShape::Rectangle,
        }
    }
}

impl AreaLight {
    /// Emitting surface area in square metres.
    pub fn area(&self) -> f32 {
        match self.shape {
            AreaShape::Rectangle => self.size.x * self.size.y,
            AreaShape::Disk => std::f32::consts::PI * (self.size.x * 0.5).powi(2),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShadowSettings {
    /// Requested map resolution; the pool renders at its own fixed size.
    pub resolution: u32,
    /// Minimum depth bias.
    pub bias: f32,
    /// Bias added at grazing angles, scaled by `1 − n·l`.
    pub slope_bias: f32,
    /// PCF kernel spread in texels (1.0 = adjacent texels).
    pub softness: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            resolution: 4096,
            bias: 0.005,
            slope_bias: 0.05,
            softness: 1.0,
        }
    }
}

impl ShadowSettings {
    /// Slope-scaled bias: `max(slope_bias·(1 − n·l), bias)`.
    pub fn bias_for(&self, n_dot_l: f32) -> f32 {
        (self.slope_bias * (1.0 - n_dot_l)).max(self.bias)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumetricSettings {
    pub enabled: bool,
    pub intensity: f32,
    pub steps: u32,
    pub scattering: f32,
}

impl Default for VolumetricSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            intensity: 1.0,
            steps: 64,
            scattering: 0.5,
        }
    }
}

/// Candela values sampled uniformly over the vertical angle 0..180°.
#[derive(Debug, Clone, PartialEq)]
pub struct IesProfile {
    candela: Vec<f32>,
    peak: f32,
}

impl IesProfile {
    pub fn new(candela: Vec<f32>) -> Self {
        let peak = candela.iter().copied().fold(0.0_f32, f32::max);
        Self { candela, peak }
    }

    /// Normalized intensity (0..1) at `angle` radians from the light's axis.
    pub fn sample(&self, angle: f32) -> f32 {
        if self.candela.is_empty() || self.peak <= 0.0 {
            return 1.0;
        }
        if self.candela.len() == 1 {
            return self.candela[0] / self.peak;
        }
        let t = (angle / std::f32::consts::PI).clamp(0.0, 1.0) * (self.candela.len() - 1) as f32;
        let i = (t.floor() as usize).min(self.candela.len() - 2);
        let f = t - i as f32;
        (self.candela[i] * (1.0 - f) + self.candela[i + 1] * f) / self.peak
    }
}

/// A light source. Created by scene setup, mutated per frame by gameplay.
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    /// Identifier used in diagnostics.
    pub name: String,
    pub light_type: LightType,
    pub enabled: bool,
    /// Linear RGB.
    pub color: Vec3,
    /// Lux for directional and sky lights, lumens otherwise.
    pub intensity: f32,
    pub position: Vec3,
    /// Direction the light travels (normalized on use).
    pub direction: Vec3,
    /// Reach used to bound point and spot shadow frusta.
    pub range: f32,
    pub attenuation: Attenuation,
    pub spot: SpotCone,
    pub area: AreaLight,
    pub casts_shadows: bool,
    pub shadow: ShadowSettings,
    pub volumetric: VolumetricSettings,
    /// Indirect bounce multiplier.
    pub bounce_intensity: f32,
    pub lens_flare: bool,
    pub ies_profile: Option<Arc<IesProfile>>,
}

impl Default for Light {
    fn default() -> Self {
        Self {
            name: String::from("light"),
            light_type: LightType::Point,
            enabled: true,
            color: Vec3::new(1.0, 0.95, 0.9),
            intensity: 1000.0,
            position: Vec3::new(0.0, 10.0, 0.0),
            direction: Vec3::NEG_Y,
            range: 10.0,
            attenuation: Attenuation::default(),
            spot: SpotCone::default(),
            area: AreaLight::default(),
            casts_shadows: true,
            shadow: ShadowSettings::default(),
            volumetric: VolumetricSettings::default(),
            bounce_intensity: 0.3,
            lens_flare: false,
            ies_profile: None,
        }
    }
}

impl Light {
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            name: String::from("directional"),
            light_type: LightType::Directional,
            direction: direction.normalize_or_zero(),
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn point(position: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            name: String::from("point"),
            light_type: LightType::Point,
            position,
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn spot(position: Vec3, direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            name: String::from("spot"),
            light_type: LightType::Spot,
            position,
            direction: direction.normalize_or_zero(),
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn area(position: Vec3, direction: Vec3, area: AreaLight, color: Vec3, intensity: f32) -> Self {
        Self {
            name: String::from("area"),
            light_type: LightType::Area,
            position,
            direction: direction.normalize_or_zero(),
            area,
            color,
            intensity,
            ..Default::default()
        }
    }

    pub fn sky(color: Vec3, intensity: f32) -> Self {
        Self {
            name: String::from("sky"),
            light_type: LightType::Sky,
            color,
            intensity,
            casts_shadows: false,
            ..Default::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_type(mut self, light_type: LightType) -> Self {
        self.light_type = light_type;
        self
    }

    pub fn with_shadows(mut self, casts_shadows: bool) -> Self {
        self.casts_shadows = casts_shadows;
        self
    }

    pub fn with_spot_angles(mut self, inner: f32, outer: f32) -> Self {
        self.spot = SpotCone {
            inner_angle: inner,
            outer_angle: outer,
        };
        self
    }

    pub fn with_range(mut self, range: f32) -> Self {
        self.range = range;
        self
    }

    pub fn with_ies_profile(mut self, profile: IesProfile) -> Self {
        self.ies_profile = Some(Arc::new(profile));
        self
    }

    /// Set `color` from a black-body temperature in Kelvin.
    pub fn with_temperature(mut self, kelvin: f32) -> Self {
        self.color = kelvin_to_rgb(kelvin);
        self
    }

    /// True when the shadow pass should consider this light at all.
    pub fn wants_shadow(&self) -> bool {
        self.enabled && self.casts_shadows && self.light_type.can_cast_shadows()
    }
}

/// Approximate linear RGB of a black body (1000K..40000K), normalized to max channel 1.
pub fn kelvin_to_rgb(kelvin: f32) -> Vec3 {
    let t = kelvin.clamp(1000.0, 40000.0) / 100.0;
    let r = if t <= 66.0 {
        255.0
    } else {
        329.698_73 * (t - 60.0).powf(-0.133_204_76)
    };
    let g = if t <= 66.0 {
        99.470_8 * t.ln() - 161.119_57
    } else {
        288.122_16 * (t - 60.0).powf(-0.075_514_85)
    };
    let b = if t >= 66.0 {
        255.0
    } else if t <= 19.0 {
        0.0
    } else {
        138.517_73 * (t - 10.0).ln() - 305.044_8
    };
    let srgb = Vec3::new(r, g, b).clamp(Vec3::ZERO, Vec3::splat(255.0)) / 255.0;
    // sRGB-encoded fit; decode to linear.
    let linear = srgb.powf(2.2);
    linear / linear.max_element().max(1e-6)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attenuation_matches_inverse_polynomial() {
        let a = Attenuation::default();
        let d = 3.0;
        let expected = 1.0 / (1.0 + 0.09 * d + 0.032 * d * d);
        assert!((a.factor(d) - expected).abs() < 1e-6);
        assert!((a.factor(0.0) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn spot_factor_is_one_inside_inner_and_zero_outside_outer() {
        let cone = SpotCone::default();
        assert_eq!(cone.factor(1.0), 1.0);
        assert_eq!(cone.factor((40.0_f32).to_radians().cos()), 0.0);
        let mid = cone.factor(((15.0_f32 + 22.5) * 0.5).to_radians().cos());
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn spot_shadow_fov_is_twice_outer_angle() {
        let cone = SpotCone {
            inner_angle: 20.0,
            outer_angle: 40.0,
        };
        assert_eq!(cone.shadow_fov_degrees(), 80.0);
    }

    #[test]
    fn sky_and_volume_never_cast_shadows() {
        assert!(!LightType::Sky.can_cast_shadows());
        assert!(!LightType::Volume.can_cast_shadows());
        assert!(!Light::sky(Vec3::ONE, 1.0).wants_shadow());
        assert!(Light::point(Vec3::ZERO, Vec3::ONE, 100.0).wants_shadow());
    }

    #[test]
    fn disk_area_uses_diameter() {
        let disk = AreaLight {
            size: Vec2::new(2.0, 0.0),
            shape: AreaShape::Disk,
        };
        assert!((disk.area() - std::f32::consts::PI).abs() < 1e-5);
    }

    #[test]
    fn ies_profile_interpolates_and_normalizes() {
        let profile = IesProfile::new(vec![100.0, 50.0, 0.0]);
        assert!((profile.sample(0.0) - 1.0).abs() < 1e-6);
        assert!((profile.sample(std::f32::consts::FRAC_PI_4) - 0.75).abs() < 1e-4);
        assert!(profile.sample(std::f32::consts::PI).abs() < 1e-6);
    }

    #[test]
    fn daylight_temperature_is_near_white() {
        let c = kelvin_to_rgb(6500.0);
        assert!(c.min_element() > 0.8);
    }
}
