//! Typed GPU uniform blocks.
//!
//! Every block is `#[repr(C)]` + `Pod` and mirrors one WGSL struct. The
//! [`UniformBlock`] trait names that struct and the shaders that declare it so
//! `ShaderLibrary::validate` can check sizes when shaders are loaded instead of
//! failing at draw time.

use crate::camera::CameraMatrices;
use crate::error::{RenderError, RenderResult};
use crate::light::{Light, LightType};
use crate::lighting::{Ambient, LightingEnvironment};
use crate::material::{AlphaMode, Material};
use crate::post::config::{Effect, PostProcessConfig, ToneMapOperator};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Dynamic-offset stride for per-object and per-layer uniforms.
pub const DYNAMIC_STRIDE: u64 = 256;
/// Samples of an IES profile packed into [`GpuLight::ies`].
pub const IES_SAMPLES: usize = 16;

pub trait UniformBlock: Pod {
    /// Name of the matching WGSL struct.
    const WGSL_NAME: &'static str;
    /// Shader keys whose source declares the struct.
    const SHADERS: &'static [&'static str];
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_proj: [[f32; 4]; 4],
    pub view: [[f32; 4]; 4],
    pub proj: [[f32; 4]; 4],
    pub inv_view_proj: [[f32; 4]; 4],
    pub prev_view_proj: [[f32; 4]; 4],
    /// xyz = camera position, w = 1 when `prev_view_proj` is valid.
    pub position: [f32; 4],
    /// x = width, y = height, z = frame index, w = debug view.
    pub params: [f32; 4],
}

impl CameraUniform {
    pub fn new(camera: &CameraMatrices, size: (u32, u32), frame_index: u64, debug_view: u32) -> Self {
        let prev = camera.previous_view_projection;
        Self {
            view_proj: camera.view_projection.to_cols_array_2d(),
            view: camera.view.to_cols_array_2d(),
            proj: camera.projection.to_cols_array_2d(),
            inv_view_proj: camera.inverse_view_projection.to_cols_array_2d(),
            prev_view_proj: prev.unwrap_or(camera.view_projection).to_cols_array_2d(),
            position: camera.position.extend(if prev.is_some() { 1.0 } else { 0.0 }).to_array(),
            params: [size.0 as f32, size.1 as f32, (frame_index % 65_536) as f32, debug_view as f32],
        }
    }
}

impl UniformBlock for CameraUniform {
    const WGSL_NAME: &'static str = "CameraUniform";
    const SHADERS: &'static [&'static str] = &[
        "geometry",
        "shadow",
        "lighting",
        "skybox",
        "bloom",
        "ssao",
        "tone_mapping",
        "post_effects",
        "debug",
    ];
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ObjectUniform {
    pub model: [[f32; 4]; 4],
    /// Inverse-transpose of the model's upper 3x3, padded to a mat4.
    pub normal_matrix: [[f32; 4]; 4],
    /// rgb = albedo, a = alpha.
    pub albedo: [f32; 4],
    /// metallic, roughness, ao, alpha cutoff.
    pub params: [f32; 4],
    /// rgb = emission × strength, w = two-sided.
    pub emission: [f32; 4],
    /// xy = UV scale, zw = UV offset.
    pub uv: [f32; 4],
    /// x = alpha mode (0 opaque, 1 mask, 2 blend), y = has normal map.
    pub flags: [f32; 4],
}

impl ObjectUniform {
    pub fn new(model: Mat4, material: &Material, has_normal_map: bool) -> Self {
        let normal = Mat4::from_mat3(engine_core::transform::normal_matrix(&model));
        let alpha_mode = match material.alpha_mode {
            AlphaMode::Opaque => 0.0,
            AlphaMode::Mask => 1.0,
            AlphaMode::Blend => 2.0,
        };
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        Self {
            model: model.to_cols_array_2d(),
            normal_matrix: normal.to_cols_array_2d(),
            albedo: material.albedo.extend(material.alpha).to_array(),
            params: [material.metallic, material.roughness, material.ao, material.alpha_cutoff],
            emission: material.emissive_radiance().extend(flag(material.two_sided)).to_array(),
            uv: [material.uv.scale.x, material.uv.scale.y, material.uv.offset.x, material.uv.offset.y],
            flags: [alpha_mode, flag(has_normal_map), 0.0, 0.0],
        }
    }
}

impl UniformBlock for ObjectUniform {
    const WGSL_NAME: &'static str = "ObjectUniform";
    const SHADERS: &'static [&'static str] = &["geometry", "shadow"];
}

/// Light-space matrix for one shadow atlas layer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct ShadowPassUniform {
    pub light_view_proj: [[f32; 4]; 4],
}

impl UniformBlock for ShadowPassUniform {
    const WGSL_NAME: &'static str = "ShadowPassUniform";
    const SHADERS: &'static [&'static str] = &["shadow"];
}

pub fn light_type_code(light_type: LightType) -> f32 {
    match light_type {
        LightType::Directional => 0.0,
        LightType::Point => 1.0,
        LightType::Spot => 2.0,
        LightType::Area => 3.0,
        LightType::Sky => 4.0,
        LightType::Mesh => 5.0,
        LightType::Volume => 6.0,
        LightType::Ies => 7.0,
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct GpuLight {
    /// xyz = position, w = range.
    pub position_range: [f32; 4],
    /// xyz = direction, w = type code.
    pub direction_type: [f32; 4],
    /// rgb = colour, w = intensity.
    pub color_intensity: [f32; 4],
    /// constant, linear, quadratic, area factor.
    pub attenuation: [f32; 4],
    /// cos inner, cos outer, shadow slot (-1 = none), enabled.
    pub spot: [f32; 4],
    /// bias, slope bias, softness, has IES profile.
    pub shadow: [f32; 4],
    pub ies: [[f32; 4]; 4],
}

impl GpuLight {
    pub fn new(light: &Light, shadow_slot: Option<u32>) -> Self {
        let mut ies = [[0.0; 4]; 4];
        let has_ies = match &light.ies_profile {
            Some(profile) => {
                for i in 0..IES_SAMPLES {
                    let angle = i as f32 / (IES_SAMPLES - 1) as f32 * std::f32::consts::PI;
                    ies[i / 4][i % 4] = profile.sample(angle);
                }
                1.0
            }
            None => 0.0,
        };
        let area_factor = if light.light_type == LightType::Area {
            light.area.area()
        } else {
            1.0
        };
        let slot = match shadow_slot {
            Some(slot) if light.casts_shadows => slot as f32,
            _ => -1.0,
        };
        Self {
            position_range: light.position.extend(light.range).to_array(),
            direction_type: light
                .direction
                .try_normalize()
                .unwrap_or(Vec3::NEG_Y)
                .extend(light_type_code(light.light_type))
                .to_array(),
            color_intensity: light.color.extend(light.intensity).to_array(),
            attenuation: [
                light.attenuation.constant,
                light.attenuation.linear,
                light.attenuation.quadratic,
                area_factor,
            ],
            spot: [
                light.spot.cos_inner(),
                light.spot.cos_outer(),
                slot,
                if light.enabled { 1.0 } else { 0.0 },
            ],
            shadow: [light.shadow.bias, light.shadow.slope_bias, light.shadow.softness, has_ies],
            ies,
        }
    }
}

impl UniformBlock for GpuLight {
    const WGSL_NAME: &'static str = "GpuLight";
    const SHADERS: &'static [&'static str] = &["lighting"];
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct LightingUniform {
    /// light count, intensity scale, IBL intensity (0 = flat ambient), shadow resolution.
    pub params: [f32; 4],
    pub ambient: [f32; 4],
    pub sky_fill: [f32; 4],
    /// +X -X +Y -Y +Z -Z.
    pub irradiance: [[f32; 4]; 6],
    pub specular: [[f32; 4]; 6],
}

impl LightingUniform {
    pub fn new(light_count: usize, environment: &LightingEnvironment, shadow_resolution: u32) -> Self {
        let mut uniform = Self {
            params: [
                light_count as f32,
                environment.intensity_scale,
                0.0,
                shadow_resolution as f32,
            ],
            ambient: [0.0; 4],
            sky_fill: environment.sky_fill.extend(0.0).to_array(),
            irradiance: [[0.0; 4]; 6],
            specular: [[0.0; 4]; 6],
        };
        match environment.ambient {
            Ambient::Flat(color) => uniform.ambient = color.extend(0.0).to_array(),
            Ambient::ImageBased(ibl) => {
                uniform.params[2] = ibl.intensity;
                for face in 0..6 {
                    uniform.irradiance[face] = ibl.irradiance.faces[face].extend(0.0).to_array();
                    uniform.specular[face] = ibl.specular.faces[face].extend(0.0).to_array();
                }
            }
        }
        uniform
    }
}

impl UniformBlock for LightingUniform {
    const WGSL_NAME: &'static str = "LightingUniform";
    const SHADERS: &'static [&'static str] = &["lighting"];
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct AtmosphereUniform {
    /// xyz = direction toward the sun, w = intensity.
    pub sun_direction: [f32; 4],
    /// rgb = colour, w = angular radius.
    pub sun_color: [f32; 4],
    /// xyz = direction toward the moon, w = intensity.
    pub moon_direction: [f32; 4],
    /// rgb = fog colour, w = density (0 = off).
    pub fog_color: [f32; 4],
    /// height falloff, base height, time of day, star intensity.
    pub fog_params: [f32; 4],
    /// coverage, density, offset x, offset y.
    pub clouds: [f32; 4],
    /// rain, snow, wind speed, turbulence.
    pub weather: [f32; 4],
    /// mie g, rayleigh scale height, mie scale height, planet radius.
    pub scattering: [f32; 4],
}

impl UniformBlock for AtmosphereUniform {
    const WGSL_NAME: &'static str = "AtmosphereUniform";
    const SHADERS: &'static [&'static str] = &["lighting", "skybox"];
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct PostUniform {
    /// exposure, operator (0 Reinhard, 1 ACES), gamma, grading enabled.
    pub tone: [f32; 4],
    /// contrast, saturation, brightness, tone mapping enabled.
    pub grading: [f32; 4],
    /// temperature, tint.
    pub white_balance: [f32; 4],
    /// threshold, knee, intensity, blur spread.
    pub bloom: [f32; 4],
    /// radius, bias, power, samples.
    pub ssao: [f32; 4],
    /// intensity, max steps, thickness, step.
    pub ssr: [f32; 4],
    /// focus distance, aperture.
    pub dof: [f32; 4],
    /// intensity, has velocity.
    pub motion: [f32; 4],
    /// lens flare intensity, threshold.
    pub lens: [f32; 4],
    /// vignette intensity, vignette softness, grain intensity, chromatic intensity.
    pub vignette: [f32; 4],
    /// width, height, frame index, sharpen strength.
    pub screen: [f32; 4],
}

impl PostUniform {
    pub fn new(config: &PostProcessConfig, size: (u32, u32), frame_index: u64, has_velocity: bool) -> Self {
        let p = &config.params;
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        let operator = match p.tone_map_operator {
            ToneMapOperator::Reinhard => 0.0,
            ToneMapOperator::Aces => 1.0,
        };
        Self {
            tone: [p.exposure, operator, p.gamma, flag(config.is_enabled(Effect::ColorGrading))],
            grading: [p.contrast, p.saturation, p.brightness, flag(config.is_enabled(Effect::ToneMapping))],
            white_balance: [p.temperature, p.tint, 0.0, 0.0],
            bloom: [p.bloom_threshold, p.bloom_knee, p.bloom_intensity, 1.0 + p.bloom_radius],
            ssao: [p.ssao_radius, p.ssao_bias, p.ssao_power, p.ssao_samples as f32],
            ssr: [p.ssr_intensity, p.ssr_max_steps as f32, p.ssr_thickness, p.ssr_step],
            dof: [p.dof_focus_distance, p.dof_aperture, 0.0, 0.0],
            motion: [p.motion_blur_intensity, flag(has_velocity), 0.0, 0.0],
            lens: [p.lens_flare_intensity, p.lens_flare_threshold, 0.0, 0.0],
            vignette: [
                p.vignette_intensity,
                p.vignette_softness,
                p.film_grain_intensity,
                p.chromatic_aberration_intensity,
            ],
            screen: [size.0 as f32, size.1 as f32, (frame_index % 4096) as f32, p.sharpen_strength],
        }
    }
}

impl UniformBlock for PostUniform {
    const WGSL_NAME: &'static str = "PostUniform";
    const SHADERS: &'static [&'static str] = &["bloom", "ssao", "tone_mapping", "post_effects"];
}

/// x, y = texel step direction, z = spread.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct BlurUniform {
    pub direction: [f32; 4],
}

impl BlurUniform {
    pub fn horizontal(spread: f32) -> Self {
        Self {
            direction: [1.0, 0.0, spread, 0.0],
        }
    }

    pub fn vertical(spread: f32) -> Self {
        Self {
            direction: [0.0, 1.0, spread, 0.0],
        }
    }
}

impl UniformBlock for BlurUniform {
    const WGSL_NAME: &'static str = "BlurUniform";
    const SHADERS: &'static [&'static str] = &["bloom"];
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct SsaoKernelUniform {
    pub samples: [[f32; 4]; 64],
}

impl SsaoKernelUniform {
    pub fn new(kernel: &[Vec3]) -> Self {
        let mut samples = [[0.0; 4]; 64];
        for (dst, src) in samples.iter_mut().zip(kernel) {
            *dst = src.extend(0.0).to_array();
        }
        Self { samples }
    }
}

impl UniformBlock for SsaoKernelUniform {
    const WGSL_NAME: &'static str = "SsaoKernelUniform";
    const SHADERS: &'static [&'static str] = &["ssao"];
}

/// Byte size of a WGSL field type, for the 16-byte-aligned types used in uniform blocks.
fn wgsl_type_size(ty: &str) -> Option<usize> {
    let ty: String = ty.chars().filter(|c| !c.is_whitespace()).collect();
    match ty.as_str() {
        "vec4<f32>" | "vec4f" => Some(16),
        "mat4x4<f32>" | "mat4x4f" => Some(64),
        _ => {
            let inner = ty.strip_prefix("array<")?.strip_suffix('>')?;
            let (elem, count) = inner.rsplit_once(',')?;
            let count: usize = count.parse().ok()?;
            Some(wgsl_type_size(elem)? * count)
        }
    }
}

/// Split on commas outside `<...>`.
fn split_fields(body: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let (mut depth, mut start) = (0i32, 0);
    for (i, c) in body.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth -= 1,
            ',' if depth == 0 => {
                fields.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(&body[start..]);
    fields
}

/// Size of `struct name { ... }` in `source`, or `None` if it is absent.
pub fn wgsl_struct_size(source: &str, name: &str) -> Option<Result<usize, String>> {
    let header = format!("struct {name} {{");
    let start = source.find(&header)? + header.len();
    let body = &source[start..];
    let end = body.find('}')?;
    let body: String = body[..end]
        .lines()
        .map(|line| line.split("//").next().unwrap_or(""))
        .collect::<Vec<_>>()
        .join(" ");

    let mut total = 0;
    for field in split_fields(&body).into_iter().map(str::trim).filter(|f| !f.is_empty()) {
        let Some((_, ty)) = field.split_once(':') else {
            return Some(Err(format!("malformed field '{field}'")));
        };
        match wgsl_type_size(ty) {
            Some(size) => total += size,
            None => return Some(Err(format!("unsupported field type '{}'", ty.trim()))),
        }
    }
    Some(Ok(total))
}

/// Check that `T` matches its WGSL declaration in `source`.
pub fn validate_block<T: UniformBlock>(stage: &str, source: &str) -> RenderResult<()> {
    let expected = std::mem::size_of::<T>();
    match wgsl_struct_size(source, T::WGSL_NAME) {
        None => Err(RenderError::initialization(
            stage,
            format!("struct {} is not declared", T::WGSL_NAME),
        )),
        Some(Err(reason)) => Err(RenderError::initialization(
            stage,
            format!("struct {}: {reason}", T::WGSL_NAME),
        )),
        Some(Ok(size)) if size != expected => Err(RenderError::initialization(
            stage,
            format!("struct {} is {size} bytes in WGSL but {expected} bytes on the host", T::WGSL_NAME),
        )),
        Some(Ok(_)) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::light::IesProfile;

    #[test]
    fn block_sizes_are_multiples_of_sixteen() {
        assert_eq!(std::mem::size_of::<CameraUniform>(), 352);
        assert_eq!(std::mem::size_of::<ObjectUniform>(), 208);
        assert_eq!(std::mem::size_of::<GpuLight>(), 160);
        assert_eq!(std::mem::size_of::<LightingUniform>(), 240);
        assert_eq!(std::mem::size_of::<AtmosphereUniform>(), 128);
        assert_eq!(std::mem::size_of::<PostUniform>(), 176);
        assert!(std::mem::size_of::<ObjectUniform>() as u64 <= DYNAMIC_STRIDE);
    }

    #[test]
    fn struct_size_parses_wgsl() {
        let src = "struct Foo {\n    a: vec4<f32>,\n    // note\n    m: mat4x4<f32>,\n    k: array<vec4<f32>, 4>,\n}\n";
        assert_eq!(wgsl_struct_size(src, "Foo"), Some(Ok(16 + 64 + 64)));
        assert_eq!(wgsl_struct_size(src, "Bar"), None);
    }

    #[test]
    fn mismatched_layout_is_an_initialization_error() {
        let src = "struct BlurUniform {\n    direction: vec4<f32>,\n    extra: vec4<f32>,\n}\n";
        let err = validate_block::<BlurUniform>("bloom", src).unwrap_err();
        assert!(matches!(err, RenderError::Initialization { ref stage, .. } if stage == "bloom"));
    }

    #[test]
    fn non_casting_light_has_no_shadow_slot() {
        let light = Light::point(Vec3::ZERO, Vec3::ONE, 100.0).with_shadows(false);
        assert_eq!(GpuLight::new(&light, Some(2)).spot[2], -1.0);
        let caster = Light::point(Vec3::ZERO, Vec3::ONE, 100.0);
        assert_eq!(GpuLight::new(&caster, Some(2)).spot[2], 2.0);
    }

    #[test]
    fn ies_profile_is_resampled() {
        let light = Light::point(Vec3::ZERO, Vec3::ONE, 100.0)
            .with_type(LightType::Ies)
            .with_ies_profile(IesProfile::new(vec![1.0, 0.0]));
        let gpu = GpuLight::new(&light, None);
        assert_eq!(gpu.shadow[3], 1.0);
        assert_eq!(gpu.ies[0][0], 1.0);
        assert_eq!(gpu.ies[3][3], 0.0);
    }
}
