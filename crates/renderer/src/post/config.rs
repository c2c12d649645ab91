//! Post-process configuration: per-effect toggles and the parameter record.
//!
//! Every mutation goes through [`PostProcessConfig::set_option`] or
//! [`PostProcessConfig::set_effect_enabled`], which validate before writing so
//! a rejected call leaves the configuration untouched.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User-facing effect names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effect {
    ToneMapping,
    Bloom,
    Ssr,
    Ssao,
    Dof,
    MotionBlur,
    ChromaticAberration,
    Vignette,
    FilmGrain,
    LensFlares,
    ColorGrading,
    Fxaa,
    Taa,
    Sharpen,
}

impl Effect {
    pub const ALL: [Effect; 14] = [
        Effect::ToneMapping,
        Effect::Bloom,
        Effect::Ssr,
        Effect::Ssao,
        Effect::Dof,
        Effect::MotionBlur,
        Effect::ChromaticAberration,
        Effect::Vignette,
        Effect::FilmGrain,
        Effect::LensFlares,
        Effect::ColorGrading,
        Effect::Fxaa,
        Effect::Taa,
        Effect::Sharpen,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            Effect::ToneMapping => "tone_mapping",
            Effect::Bloom => "bloom",
            Effect::Ssr => "ssr",
            Effect::Ssao => "ssao",
            Effect::Dof => "dof",
            Effect::MotionBlur => "motion_blur",
            Effect::ChromaticAberration => "chromatic_aberration",
            Effect::Vignette => "vignette",
            Effect::FilmGrain => "film_grain",
            Effect::LensFlares => "lens_flares",
            Effect::ColorGrading => "color_grading",
            Effect::Fxaa => "fxaa",
            Effect::Taa => "taa",
            Effect::Sharpen => "sharpen",
        }
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for Effect {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Effect::ALL
            .into_iter()
            .find(|e| e.key() == s)
            .ok_or_else(|| ConfigError::UnknownEffect(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToneMapOperator {
    Reinhard,
    Aces,
}

impl FromStr for ToneMapOperator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reinhard" => Ok(ToneMapOperator::Reinhard),
            "aces" => Ok(ToneMapOperator::Aces),
            _ => Err(()),
        }
    }
}

/// Value passed to `set_post_process_option`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OptionValue {
    Float(f32),
    Bool(bool),
    Operator(ToneMapOperator),
}

impl From<f32> for OptionValue {
    fn from(v: f32) -> Self {
        OptionValue::Float(v)
    }
}

impl From<u32> for OptionValue {
    fn from(v: u32) -> Self {
        OptionValue::Float(v as f32)
    }
}

impl From<bool> for OptionValue {
    fn from(v: bool) -> Self {
        OptionValue::Bool(v)
    }
}

impl From<ToneMapOperator> for OptionValue {
    fn from(v: ToneMapOperator) -> Self {
        OptionValue::Operator(v)
    }
}

/// Per-effect enabled flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EffectToggles {
    pub tone_mapping: bool,
    pub bloom: bool,
    pub ssr: bool,
    pub ssao: bool,
    pub dof: bool,
    pub motion_blur: bool,
    pub chromatic_aberration: bool,
    pub vignette: bool,
    pub film_grain: bool,
    pub lens_flares: bool,
    pub color_grading: bool,
    pub fxaa: bool,
    pub taa: bool,
    pub sharpen: bool,
}

impl Default for EffectToggles {
    fn default() -> Self {
        Self {
            tone_mapping: true,
            bloom: true,
            ssr: true,
            ssao: true,
            dof: false,
            motion_blur: false,
            chromatic_aberration: false,
            vignette: true,
            film_grain: false,
            lens_flares: true,
            color_grading: true,
            fxaa: true,
            taa: false,
            sharpen: true,
        }
    }
}

impl EffectToggles {
    /// Everything off: the chain is an identity.
    pub fn none() -> Self {
        Self {
            tone_mapping: false,
            bloom: false,
            ssr: false,
            ssao: false,
            dof: false,
            motion_blur: false,
            chromatic_aberration: false,
            vignette: false,
            film_grain: false,
            lens_flares: false,
            color_grading: false,
            fxaa: false,
            taa: false,
            sharpen: false,
        }
    }

    fn flag_mut(&mut self, effect: Effect) -> &mut bool {
        match effect {
            Effect::ToneMapping => &mut self.tone_mapping,
            Effect::Bloom => &mut self.bloom,
            Effect::Ssr => &mut self.ssr,
            Effect::Ssao => &mut self.ssao,
            Effect::Dof => &mut self.dof,
            Effect::MotionBlur => &mut self.motion_blur,
            Effect::ChromaticAberration => &mut self.chromatic_aberration,
            Effect::Vignette => &mut self.vignette,
            Effect::FilmGrain => &mut self.film_grain,
            Effect::LensFlares => &mut self.lens_flares,
            Effect::ColorGrading => &mut self.color_grading,
            Effect::Fxaa => &mut self.fxaa,
            Effect::Taa => &mut self.taa,
            Effect::Sharpen => &mut self.sharpen,
        }
    }

    pub fn get(&self, effect: Effect) -> bool {
        match effect {
            Effect::ToneMapping => self.tone_mapping,
            Effect::Bloom => self.bloom,
            Effect::Ssr => self.ssr,
            Effect::Ssao => self.ssao,
            Effect::Dof => self.dof,
            Effect::MotionBlur => self.motion_blur,
            Effect::ChromaticAberration => self.chromatic_aberration,
            Effect::Vignette => self.vignette,
            Effect::FilmGrain => self.film_grain,
            Effect::LensFlares => self.lens_flares,
            Effect::ColorGrading => self.color_grading,
            Effect::Fxaa => self.fxaa,
            Effect::Taa => self.taa,
            Effect::Sharpen => self.sharpen,
        }
    }

    pub fn set(&mut self, effect: Effect, enabled: bool) {
        *self.flag_mut(effect) = enabled;
    }
}

/// Fixed parameter record read by the post chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessParams {
    pub exposure: f32,
    pub tone_map_operator: ToneMapOperator,
    pub gamma: f32,
    pub bloom_threshold: f32,
    pub bloom_intensity: f32,
    pub bloom_radius: f32,
    pub bloom_knee: f32,
    pub ssao_radius: f32,
    pub ssao_bias: f32,
    pub ssao_power: f32,
    pub ssao_samples: u32,
    pub ssr_intensity: f32,
    pub ssr_max_steps: u32,
    pub ssr_thickness: f32,
    pub ssr_step: f32,
    pub dof_focus_distance: f32,
    pub dof_aperture: f32,
    pub motion_blur_intensity: f32,
    pub lens_flare_intensity: f32,
    /// Brightness above which pixels spawn flare ghosts.
    pub lens_flare_threshold: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub brightness: f32,
    pub temperature: f32,
    pub tint: f32,
    pub film_grain_intensity: f32,
    pub vignette_intensity: f32,
    pub vignette_softness: f32,
    pub chromatic_aberration_intensity: f32,
    pub sharpen_strength: f32,
}

impl Default for PostProcessParams {
    fn default() -> Self {
        Self {
            exposure: 1.0,
            tone_map_operator: ToneMapOperator::Aces,
            gamma: 2.2,
            bloom_threshold: 1.0,
            bloom_intensity: 0.04,
            bloom_radius: 0.6,
            bloom_knee: 0.1,
            ssao_radius: 0.5,
            ssao_bias: 0.025,
            ssao_power: 2.0,
            ssao_samples: 16,
            ssr_intensity: 0.8,
            ssr_max_steps: 32,
            ssr_thickness: 0.1,
            ssr_step: 0.1,
            dof_focus_distance: 10.0,
            dof_aperture: 1.0,
            motion_blur_intensity: 0.5,
            lens_flare_intensity: 0.3,
            lens_flare_threshold: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            brightness: 1.0,
            temperature: 0.0,
            tint: 0.0,
            film_grain_intensity: 0.05,
            vignette_intensity: 0.3,
            vignette_softness: 0.4,
            chromatic_aberration_intensity: 0.0,
            sharpen_strength: 0.5,
        }
    }
}

/// Allowed values for a float parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Range {
    min: f32,
    max: f32,
    min_exclusive: bool,
}

impl Range {
    const fn closed(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            min_exclusive: false,
        }
    }

    const fn open_min(min: f32, max: f32) -> Self {
        Self {
            min,
            max,
            min_exclusive: true,
        }
    }

    fn contains(&self, v: f32) -> bool {
        let above = if self.min_exclusive { v > self.min } else { v >= self.min };
        v.is_finite() && above && v <= self.max
    }
}

enum Slot<'a> {
    Float(&'a mut f32, Range),
    Count(&'a mut u32, Range),
    Operator(&'a mut ToneMapOperator),
    Toggle(&'a mut bool),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PostProcessConfig {
    pub enabled: EffectToggles,
    pub params: PostProcessParams,
}

impl PostProcessConfig {
    pub fn is_enabled(&self, effect: Effect) -> bool {
        self.enabled.get(effect)
    }

    /// Toggle an effect by name.
    pub fn set_effect_enabled(&mut self, effect: &str, enabled: bool) -> Result<(), ConfigError> {
        let effect: Effect = effect.parse()?;
        self.enabled.set(effect, enabled);
        Ok(())
    }

    /// Validate and apply one parameter. `param = "enabled"` toggles the effect.
    pub fn set_option(&mut self, effect: &str, param: &str, value: OptionValue) -> Result<(), ConfigError> {
        let effect: Effect = effect.parse()?;
        let (enabled, params) = (&mut self.enabled, &mut self.params);
        let slot = Self::slot(enabled, params, effect, param).ok_or_else(|| ConfigError::UnknownParameter {
            effect: effect.key().to_string(),
            param: param.to_string(),
        })?;

        let wrong_type = |expected| ConfigError::WrongValueType {
            effect: effect.key().to_string(),
            param: param.to_string(),
            expected,
        };
        let out_of_range = |value: f32, range: Range| ConfigError::OutOfRange {
            effect: effect.key().to_string(),
            param: param.to_string(),
            value,
            min: range.min,
            max: range.max,
        };

        match (slot, value) {
            (Slot::Float(field, range), OptionValue::Float(v)) => {
                if !range.contains(v) {
                    return Err(out_of_range(v, range));
                }
                *field = v;
            }
            (Slot::Count(field, range), OptionValue::Float(v)) => {
                let rounded = v.round();
                if !range.contains(rounded) {
                    return Err(out_of_range(v, range));
                }
                *field = rounded as u32;
            }
            (Slot::Operator(field), OptionValue::Operator(op)) => *field = op,
            (Slot::Toggle(field), OptionValue::Bool(b)) => *field = b,
            (Slot::Float(..) | Slot::Count(..), _) => return Err(wrong_type("a number")),
            (Slot::Operator(_), _) => return Err(wrong_type("a tone-map operator")),
            (Slot::Toggle(_), _) => return Err(wrong_type("a boolean")),
        }
        Ok(())
    }

    fn slot<'a>(
        enabled: &'a mut EffectToggles,
        p: &'a mut PostProcessParams,
        effect: Effect,
        param: &str,
    ) -> Option<Slot<'a>> {
        use Effect as E;
        let unit = Range::closed(0.0, 1.0);
        let grading = Range::closed(0.0, 4.0);
        let signed = Range::closed(-1.0, 1.0);
        let slot = match (effect, param) {
            (_, "enabled") => Slot::Toggle(enabled.flag_mut(effect)),
            (E::ToneMapping, "exposure") => Slot::Float(&mut p.exposure, Range::open_min(0.0, 64.0)),
            (E::ToneMapping, "operator") => Slot::Operator(&mut p.tone_map_operator),
            (E::ToneMapping, "gamma") => Slot::Float(&mut p.gamma, Range::closed(1.0, 3.0)),
            (E::Bloom, "threshold") => Slot::Float(&mut p.bloom_threshold, Range::closed(0.0, 100.0)),
            (E::Bloom, "intensity") => Slot::Float(&mut p.bloom_intensity, Range::closed(0.0, 10.0)),
            (E::Bloom, "radius") => Slot::Float(&mut p.bloom_radius, Range::closed(0.0, 8.0)),
            (E::Bloom, "knee") => Slot::Float(&mut p.bloom_knee, unit),
            (E::Ssao, "radius") => Slot::Float(&mut p.ssao_radius, Range::open_min(0.0, 10.0)),
            (E::Ssao, "bias") => Slot::Float(&mut p.ssao_bias, unit),
            (E::Ssao, "power") => Slot::Float(&mut p.ssao_power, Range::closed(0.1, 8.0)),
            (E::Ssao, "samples") => Slot::Count(&mut p.ssao_samples, Range::closed(1.0, 64.0)),
            (E::Ssr, "intensity") => Slot::Float(&mut p.ssr_intensity, unit),
            (E::Ssr, "max_steps") => Slot::Count(&mut p.ssr_max_steps, Range::closed(1.0, 256.0)),
            (E::Ssr, "thickness") => Slot::Float(&mut p.ssr_thickness, Range::open_min(0.0, 10.0)),
            (E::Ssr, "step") => Slot::Float(&mut p.ssr_step, Range::open_min(0.0, 10.0)),
            (E::Dof, "focus_distance") => Slot::Float(&mut p.dof_focus_distance, Range::open_min(0.0, 10_000.0)),
            (E::Dof, "aperture") => Slot::Float(&mut p.dof_aperture, Range::open_min(0.0, 32.0)),
            (E::MotionBlur, "intensity") => Slot::Float(&mut p.motion_blur_intensity, unit),
            (E::LensFlares, "intensity") => Slot::Float(&mut p.lens_flare_intensity, Range::closed(0.0, 4.0)),
            (E::LensFlares, "threshold") => Slot::Float(&mut p.lens_flare_threshold, Range::closed(0.0, 100.0)),
            (E::ColorGrading, "contrast") => Slot::Float(&mut p.contrast, grading),
            (E::ColorGrading, "saturation") => Slot::Float(&mut p.saturation, grading),
            (E::ColorGrading, "brightness") => Slot::Float(&mut p.brightness, grading),
            (E::ColorGrading, "temperature") => Slot::Float(&mut p.temperature, signed),
            (E::ColorGrading, "tint") => Slot::Float(&mut p.tint, signed),
            (E::FilmGrain, "intensity") => Slot::Float(&mut p.film_grain_intensity, unit),
            (E::Vignette, "intensity") => Slot::Float(&mut p.vignette_intensity, unit),
            (E::Vignette, "softness") => Slot::Float(&mut p.vignette_softness, unit),
            (E::ChromaticAberration, "intensity") => Slot::Float(&mut p.chromatic_aberration_intensity, unit),
            (E::Sharpen, "strength") => Slot::Float(&mut p.sharpen_strength, grading),
            _ => return None,
        };
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_documented_effects() {
        let config = PostProcessConfig::default();
        for effect in [Effect::ToneMapping, Effect::Bloom, Effect::Fxaa, Effect::Sharpen] {
            assert!(config.is_enabled(effect), "{effect} should start enabled");
        }
        for effect in [Effect::Dof, Effect::MotionBlur, Effect::Taa, Effect::FilmGrain] {
            assert!(!config.is_enabled(effect), "{effect} should start disabled");
        }
    }

    #[test]
    fn effect_names_round_trip_through_parse() {
        for effect in Effect::ALL {
            assert_eq!(effect.key().parse::<Effect>(), Ok(effect));
        }
    }

    #[test]
    fn unknown_effect_is_rejected() {
        let mut config = PostProcessConfig::default();
        let err = config.set_option("lens_dirt", "intensity", 1.0_f32.into());
        assert_eq!(err, Err(ConfigError::UnknownEffect("lens_dirt".into())));
        assert_eq!(config, PostProcessConfig::default());
    }

    #[test]
    fn out_of_range_value_leaves_config_unchanged() {
        let mut config = PostProcessConfig::default();
        config.set_option("bloom", "intensity", 0.5_f32.into()).unwrap();
        let before = config.clone();
        let err = config.set_option("vignette", "intensity", 1.5_f32.into());
        assert!(matches!(err, Err(ConfigError::OutOfRange { .. })));
        let err = config.set_option("tone_mapping", "exposure", 0.0_f32.into());
        assert!(matches!(err, Err(ConfigError::OutOfRange { .. })));
        assert_eq!(config, before);
    }

    #[test]
    fn unknown_parameter_and_wrong_type_are_rejected() {
        let mut config = PostProcessConfig::default();
        assert!(matches!(
            config.set_option("bloom", "exposure", 1.0_f32.into()),
            Err(ConfigError::UnknownParameter { .. })
        ));
        assert!(matches!(
            config.set_option("bloom", "threshold", true.into()),
            Err(ConfigError::WrongValueType { .. })
        ));
    }

    #[test]
    fn valid_options_are_applied() {
        let mut config = PostProcessConfig::default();
        config.set_option("tone_mapping", "exposure", 2.5_f32.into()).unwrap();
        config
            .set_option("tone_mapping", "operator", ToneMapOperator::Reinhard.into())
            .unwrap();
        config.set_option("ssr", "max_steps", 64u32.into()).unwrap();
        config.set_option("dof", "enabled", true.into()).unwrap();
        config.set_option("lens_flares", "threshold", 4.0_f32.into()).unwrap();
        assert_eq!(config.params.exposure, 2.5);
        assert_eq!(config.params.lens_flare_threshold, 4.0);
        assert_eq!(config.params.bloom_threshold, 1.0);
        assert_eq!(config.params.tone_map_operator, ToneMapOperator::Reinhard);
        assert_eq!(config.params.ssr_max_steps, 64);
        assert!(config.is_enabled(Effect::Dof));
    }

    #[test]
    fn set_effect_enabled_by_name() {
        let mut config = PostProcessConfig::default();
        config.set_effect_enabled("bloom", false).unwrap();
        assert!(!config.is_enabled(Effect::Bloom));
        assert!(config.set_effect_enabled("glow", true).is_err());
    }
}
