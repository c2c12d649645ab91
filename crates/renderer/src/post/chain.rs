//! CPU post-process chain. Each stage reads the current target and writes the
//! other one; disabled stages leave the current target untouched.

use super::bloom::apply_bloom;
use super::config::{Effect, PostProcessConfig};
use super::effects;
use super::pingpong::PingPong;
use super::ssao::{self, SsaoInputs, SsaoParams};
use super::stage::{plan, AntiAliasing, PostPlan, PostStage};
use super::tonemap::{color_grade, tone_map};
use crate::camera::CameraMatrices;
use crate::image::HdrImage;
use glam::{Vec3, Vec4Swizzles};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// G-buffer attachments the post stages read.
#[derive(Clone, Copy)]
pub struct GBufferView<'a> {
    /// xyz world position, w coverage.
    pub position: &'a HdrImage,
    /// xyz world normal, w roughness.
    pub normal: &'a HdrImage,
}

#[derive(Debug, Clone, Copy)]
pub struct PostFrame {
    pub camera: CameraMatrices,
    pub frame_index: u64,
}

pub struct PostProcessChain {
    kernel: Vec<Vec3>,
    noise: Vec<Vec3>,
    history: Option<HdrImage>,
    last_plan: Option<PostPlan>,
}

impl PostProcessChain {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let kernel = ssao::generate_kernel(&mut rng, ssao::MAX_KERNEL_SIZE);
        let noise = ssao::generate_noise(&mut rng);
        Self {
            kernel,
            noise,
            history: None,
            last_plan: None,
        }
    }

    pub fn kernel(&self) -> &[Vec3] {
        &self.kernel
    }

    pub fn noise(&self) -> &[Vec3] {
        &self.noise
    }

    /// Drop temporal history, e.g. after a resize.
    pub fn reset_history(&mut self) {
        self.history = None;
    }

    pub fn last_plan(&self) -> Option<&PostPlan> {
        self.last_plan.as_ref()
    }

    /// Run every enabled stage in the fixed order over `input`.
    pub fn apply_effects(
        &mut self,
        input: &HdrImage,
        gbuffer: GBufferView<'_>,
        frame: &PostFrame,
        config: &PostProcessConfig,
    ) -> HdrImage {
        let velocity = effects::velocity_buffer(gbuffer.position, &frame.camera);
        let plan = plan(config, velocity.is_some());
        let p = &config.params;
        let mut targets = PingPong::new(input.clone(), HdrImage::new(input.width(), input.height()));

        for stage in plan.active() {
            let (current, next) = targets.split();
            *next = match stage {
                PostStage::Ssao => {
                    let inputs = SsaoInputs {
                        position: gbuffer.position,
                        normal: gbuffer.normal,
                        camera: &frame.camera,
                        kernel: &self.kernel,
                        noise: &self.noise,
                    };
                    let params = SsaoParams {
                        radius: p.ssao_radius,
                        bias: p.ssao_bias,
                        power: p.ssao_power,
                        samples: p.ssao_samples as usize,
                    };
                    let ao = ssao::blur_occlusion(&ssao::compute_occlusion(&inputs, &params));
                    ssao::apply_occlusion(current, &ao)
                }
                PostStage::Ssr => effects::screen_space_reflections(
                    current,
                    gbuffer.position,
                    gbuffer.normal,
                    &frame.camera,
                    &effects::SsrParams {
                        intensity: p.ssr_intensity,
                        max_steps: p.ssr_max_steps,
                        thickness: p.ssr_thickness,
                        step: p.ssr_step,
                    },
                ),
                PostStage::Bloom => apply_bloom(
                    current,
                    p.bloom_threshold,
                    p.bloom_knee,
                    p.bloom_radius,
                    p.bloom_intensity,
                ),
                PostStage::DepthOfField => effects::depth_of_field(
                    current,
                    gbuffer.position,
                    frame.camera.position,
                    p.dof_focus_distance,
                    p.dof_aperture,
                ),
                PostStage::MotionBlur => match &velocity {
                    Some(v) => effects::motion_blur(current, v, p.motion_blur_intensity),
                    None => current.clone(),
                },
                PostStage::LensFlares => effects::lens_flares(current, p.lens_flare_threshold, p.lens_flare_intensity),
                PostStage::ColorGradingToneMapping => {
                    let grading = config.is_enabled(Effect::ColorGrading);
                    if config.is_enabled(Effect::ToneMapping) {
                        current.map(|_, _, c| tone_map(c.xyz(), p, grading).extend(c.w))
                    } else {
                        current.map(|_, _, c| color_grade(c.xyz(), p).extend(c.w))
                    }
                }
                PostStage::FilmGrain => effects::film_grain(current, p.film_grain_intensity, frame.frame_index),
                PostStage::Vignette => effects::vignette(current, p.vignette_intensity, p.vignette_softness),
                PostStage::ChromaticAberration => {
                    effects::chromatic_aberration(current, p.chromatic_aberration_intensity)
                }
                PostStage::Sharpen => effects::sharpen(current, p.sharpen_strength),
                PostStage::AntiAliasing => match (plan.anti_aliasing, &self.history, &velocity) {
                    (Some(AntiAliasing::Temporal), Some(history), Some(v)) if history.size() == current.size() => {
                        effects::temporal_aa(current, history, v)
                    }
                    _ => effects::fxaa(current),
                },
            };
            targets.swap();
        }

        let output = targets.into_read();
        if config.is_enabled(Effect::Taa) {
            self.history = Some(output.clone());
        } else {
            self.history = None;
        }
        self.last_plan = Some(plan);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::Camera;
    use crate::post::config::EffectToggles;
    use glam::Vec4;

    struct Fixture {
        input: HdrImage,
        position: HdrImage,
        normal: HdrImage,
        frame: PostFrame,
    }

    fn fixture() -> Fixture {
        let camera = Camera::looking_at(Vec3::new(0.0, 3.0, 6.0), Vec3::ZERO);
        let input = HdrImage::from_fn(12, 10, |x, y| {
            if x == 6 && y == 5 {
                Vec4::new(40.0, 30.0, 20.0, 1.0)
            } else {
                Vec4::new(0.2 + x as f32 * 0.05, 0.3, 0.1 + y as f32 * 0.02, 1.0)
            }
        });
        let position = HdrImage::from_fn(12, 10, |x, y| {
            Vec4::new(x as f32 * 0.2 - 1.2, 0.0, y as f32 * 0.2 - 1.0, 1.0)
        });
        let normal = HdrImage::filled(12, 10, Vec4::new(0.0, 1.0, 0.0, 0.3));
        Fixture {
            input,
            position,
            normal,
            frame: PostFrame {
                camera: CameraMatrices::from_view(&camera, None),
                frame_index: 5,
            },
        }
    }

    fn run(chain: &mut PostProcessChain, f: &Fixture, config: &PostProcessConfig) -> HdrImage {
        let gbuffer = GBufferView {
            position: &f.position,
            normal: &f.normal,
        };
        chain.apply_effects(&f.input, gbuffer, &f.frame, config)
    }

    #[test]
    fn disabled_bloom_ignores_bloom_parameters() {
        let f = fixture();
        let mut config = PostProcessConfig::default();
        config.enabled.bloom = false;
        let baseline = run(&mut PostProcessChain::new(3), &f, &config);

        config.params.bloom_threshold = 50.0;
        config.params.bloom_intensity = 9.0;
        config.params.bloom_radius = 7.5;
        config.params.bloom_knee = 0.9;
        let changed = run(&mut PostProcessChain::new(3), &f, &config);
        assert_eq!(baseline, changed);
    }

    #[test]
    fn enabled_bloom_reacts_to_intensity() {
        let f = fixture();
        let mut config = PostProcessConfig {
            enabled: EffectToggles::none(),
            ..Default::default()
        };
        config.enabled.bloom = true;
        let low = run(&mut PostProcessChain::new(3), &f, &config);
        config.params.bloom_intensity = 2.0;
        let high = run(&mut PostProcessChain::new(3), &f, &config);
        assert_ne!(low, high);
    }

    #[test]
    fn everything_disabled_is_identity() {
        let f = fixture();
        let config = PostProcessConfig {
            enabled: EffectToggles::none(),
            ..Default::default()
        };
        let mut chain = PostProcessChain::new(1);
        assert_eq!(run(&mut chain, &f, &config), f.input);
        assert_eq!(chain.last_plan().map(|p| p.active().count()), Some(0));
    }

    #[test]
    fn default_chain_outputs_display_range() {
        let f = fixture();
        let out = run(&mut PostProcessChain::new(1), &f, &PostProcessConfig::default());
        for p in out.pixels() {
            assert!(p.xyz().min_element() >= 0.0 && p.xyz().max_element() <= 1.0, "{p}");
        }
    }

    #[test]
    fn temporal_history_is_kept_only_with_taa() {
        let f = fixture();
        let mut chain = PostProcessChain::new(1);
        let mut config = PostProcessConfig::default();
        run(&mut chain, &f, &config);
        assert!(chain.history.is_none());
        config.enabled.taa = true;
        run(&mut chain, &f, &config);
        assert!(chain.history.is_some());
        chain.reset_history();
        assert!(chain.history.is_none());
    }
}
