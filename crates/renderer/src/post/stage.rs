//! The fixed stage order and per-frame plan.
//!
//! The order never changes. Disabling an effect turns its stage into a
//! pass-through; it is still present in the plan at the same position.

use super::config::{Effect, PostProcessConfig};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostStage {
    Ssao,
    Ssr,
    Bloom,
    DepthOfField,
    MotionBlur,
    LensFlares,
    ColorGradingToneMapping,
    FilmGrain,
    Vignette,
    ChromaticAberration,
    Sharpen,
    AntiAliasing,
}

pub const PIPELINE_ORDER: [PostStage; 12] = [
    PostStage::Ssao,
    PostStage::Ssr,
    PostStage::Bloom,
    PostStage::DepthOfField,
    PostStage::MotionBlur,
    PostStage::LensFlares,
    PostStage::ColorGradingToneMapping,
    PostStage::FilmGrain,
    PostStage::Vignette,
    PostStage::ChromaticAberration,
    PostStage::Sharpen,
    PostStage::AntiAliasing,
];

impl PostStage {
    pub fn name(&self) -> &'static str {
        match self {
            PostStage::Ssao => "ssao",
            PostStage::Ssr => "ssr",
            PostStage::Bloom => "bloom",
            PostStage::DepthOfField => "dof",
            PostStage::MotionBlur => "motion_blur",
            PostStage::LensFlares => "lens_flares",
            PostStage::ColorGradingToneMapping => "tone_mapping",
            PostStage::FilmGrain => "film_grain",
            PostStage::Vignette => "vignette",
            PostStage::ChromaticAberration => "chromatic_aberration",
            PostStage::Sharpen => "sharpen",
            PostStage::AntiAliasing => "anti_aliasing",
        }
    }
}

impl fmt::Display for PostStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AntiAliasing {
    Temporal,
    Fast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedStage {
    pub stage: PostStage,
    pub enabled: bool,
}

/// Which stages run this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostPlan {
    pub stages: [PlannedStage; 12],
    pub anti_aliasing: Option<AntiAliasing>,
}

impl PostPlan {
    pub fn active(&self) -> impl Iterator<Item = PostStage> + '_ {
        self.stages.iter().filter(|s| s.enabled).map(|s| s.stage)
    }

    pub fn is_enabled(&self, stage: PostStage) -> bool {
        self.stages.iter().any(|s| s.stage == stage && s.enabled)
    }
}

/// Build the plan for one frame. `velocity_available` is false on the first
/// frame and right after a resize.
pub fn plan(config: &PostProcessConfig, velocity_available: bool) -> PostPlan {
    let on = |e: Effect| config.is_enabled(e);
    let anti_aliasing = if on(Effect::Taa) && velocity_available {
        Some(AntiAliasing::Temporal)
    } else if on(Effect::Fxaa) || on(Effect::Taa) {
        Some(AntiAliasing::Fast)
    } else {
        None
    };
    let stages = PIPELINE_ORDER.map(|stage| {
        let enabled = match stage {
            PostStage::Ssao => on(Effect::Ssao),
            PostStage::Ssr => on(Effect::Ssr),
            PostStage::Bloom => on(Effect::Bloom),
            PostStage::DepthOfField => on(Effect::Dof),
            PostStage::MotionBlur => on(Effect::MotionBlur) && velocity_available,
            PostStage::LensFlares => on(Effect::LensFlares),
            PostStage::ColorGradingToneMapping => on(Effect::ToneMapping) || on(Effect::ColorGrading),
            PostStage::FilmGrain => on(Effect::FilmGrain),
            PostStage::Vignette => on(Effect::Vignette),
            PostStage::ChromaticAberration => on(Effect::ChromaticAberration),
            PostStage::Sharpen => on(Effect::Sharpen),
            PostStage::AntiAliasing => anti_aliasing.is_some(),
        };
        PlannedStage { stage, enabled }
    });
    PostPlan { stages, anti_aliasing }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::config::EffectToggles;

    fn position(plan: &PostPlan, stage: PostStage) -> Option<usize> {
        plan.active().position(|s| s == stage)
    }

    #[test]
    fn stage_order_is_fixed_for_every_subset() {
        for mask in 0u32..(1 << Effect::ALL.len()) {
            let mut config = PostProcessConfig {
                enabled: EffectToggles::none(),
                ..Default::default()
            };
            for (bit, effect) in Effect::ALL.iter().enumerate() {
                config.enabled.set(*effect, mask & (1 << bit) != 0);
            }
            let plan = plan(&config, true);
            let order: Vec<PostStage> = plan.stages.iter().map(|s| s.stage).collect();
            assert_eq!(order, PIPELINE_ORDER.to_vec());

            let active: Vec<PostStage> = plan.active().collect();
            let mut expected = PIPELINE_ORDER.iter().filter(|s| active.contains(s));
            assert!(active.iter().all(|s| Some(s) == expected.next()));
        }
    }

    #[test]
    fn toggling_ssr_does_not_move_bloom_relative_to_tone_mapping() {
        let mut config = PostProcessConfig::default();
        for ssr in [true, false] {
            config.enabled.ssr = ssr;
            let plan = plan(&config, false);
            let bloom = position(&plan, PostStage::Bloom);
            let tone = position(&plan, PostStage::ColorGradingToneMapping);
            assert!(bloom < tone);
        }
    }

    #[test]
    fn temporal_aa_needs_velocity() {
        let mut config = PostProcessConfig::default();
        config.enabled.taa = true;
        config.enabled.fxaa = false;
        assert_eq!(plan(&config, true).anti_aliasing, Some(AntiAliasing::Temporal));
        assert_eq!(plan(&config, false).anti_aliasing, Some(AntiAliasing::Fast));
        config.enabled.taa = false;
        assert_eq!(plan(&config, true).anti_aliasing, None);
        assert!(!plan(&config, true).is_enabled(PostStage::AntiAliasing));
    }

    #[test]
    fn motion_blur_is_skipped_without_velocity() {
        let mut config = PostProcessConfig::default();
        config.enabled.motion_blur = true;
        assert!(plan(&config, true).is_enabled(PostStage::MotionBlur));
        assert!(!plan(&config, false).is_enabled(PostStage::MotionBlur));
    }
}
