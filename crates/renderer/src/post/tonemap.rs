//! HDR to display mapping: colour grading, exposure, the two operators and gamma.

use super::config::{PostProcessParams, ToneMapOperator};
use crate::color::luminance;
use glam::{Mat3, Vec3};

/// Log-space pivot for contrast.
const MIDDLE_GREY: f32 = 0.18;

// Column-major (glam) transposes of the row-major fitted ACES matrices.
const ACES_INPUT: Mat3 = Mat3::from_cols_array(&[
    0.59719, 0.07600, 0.02840, //
    0.35458, 0.90834, 0.13383, //
    0.04823, 0.01566, 0.83777,
]);
const ACES_OUTPUT: Mat3 = Mat3::from_cols_array(&[
    1.60475, -0.10208, -0.00327, //
    -0.53108, 1.10813, -0.07276, //
    -0.07367, -0.00605, 1.07602,
]);

fn rrt_and_odt_fit(v: Vec3) -> Vec3 {
    let a = v * (v + 0.0245786) - 0.000090537;
    let b = v * (v * 0.983729 + 0.4329510) + 0.238081;
    a / b
}

/// `1 - exp(-x * exposure)` per channel.
pub fn reinhard(color: Vec3, exposure: f32) -> Vec3 {
    let x = color.max(Vec3::ZERO) * exposure;
    (Vec3::ONE - Vec3::new((-x.x).exp(), (-x.y).exp(), (-x.z).exp())).clamp(Vec3::ZERO, Vec3::ONE)
}

/// Fitted ACES filmic curve, clamped to [0, 1].
pub fn aces_fitted(color: Vec3, exposure: f32) -> Vec3 {
    let x = color.max(Vec3::ZERO) * exposure;
    let v = rrt_and_odt_fit(ACES_INPUT * x);
    (ACES_OUTPUT * v).clamp(Vec3::ZERO, Vec3::ONE)
}

pub fn gamma_correct(color: Vec3, gamma: f32) -> Vec3 {
    let inv = 1.0 / gamma.max(f32::EPSILON);
    Vec3::new(color.x.powf(inv), color.y.powf(inv), color.z.powf(inv))
}

fn contrast_channel(c: f32, contrast: f32) -> f32 {
    if c <= 0.0 {
        0.0
    } else {
        MIDDLE_GREY * (c / MIDDLE_GREY).powf(contrast)
    }
}

/// Grading in linear HDR, before exposure.
pub fn color_grade(color: Vec3, params: &PostProcessParams) -> Vec3 {
    let mut c = color.max(Vec3::ZERO) * params.brightness;
    let balance = Vec3::new(
        1.0 + 0.25 * params.temperature,
        1.0 - 0.25 * params.tint,
        1.0 - 0.25 * params.temperature,
    );
    c *= balance;
    c = Vec3::new(
        contrast_channel(c.x, params.contrast),
        contrast_channel(c.y, params.contrast),
        contrast_channel(c.z, params.contrast),
    );
    let luma = Vec3::splat(luminance(c));
    luma.lerp(c, params.saturation).max(Vec3::ZERO)
}

/// Full display mapping for one pixel. Output channels are in [0, 1].
pub fn tone_map(color: Vec3, params: &PostProcessParams, grading: bool) -> Vec3 {
    let graded = if grading { color_grade(color, params) } else { color };
    let mapped = match params.tone_map_operator {
        ToneMapOperator::Reinhard => reinhard(graded, params.exposure),
        ToneMapOperator::Aces => aces_fitted(graded, params.exposure),
    };
    gamma_correct(mapped, params.gamma).clamp(Vec3::ZERO, Vec3::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(op: ToneMapOperator, exposure: f32) -> PostProcessParams {
        PostProcessParams {
            tone_map_operator: op,
            exposure,
            ..Default::default()
        }
    }

    #[test]
    fn black_maps_to_black_for_both_operators() {
        for op in [ToneMapOperator::Reinhard, ToneMapOperator::Aces] {
            assert_eq!(tone_map(Vec3::ZERO, &params(op, 1.0), true), Vec3::ZERO);
        }
        assert_eq!(reinhard(Vec3::ZERO, 3.0), Vec3::ZERO);
        assert_eq!(aces_fitted(Vec3::ZERO, 3.0), Vec3::ZERO);
    }

    #[test]
    fn output_stays_in_unit_range() {
        for op in [ToneMapOperator::Reinhard, ToneMapOperator::Aces] {
            for v in [0.01, 0.5, 1.0, 10.0, 1e4, 1e9] {
                let c = tone_map(Vec3::new(v, v * 0.3, v * 2.0), &params(op, 4.0), true);
                assert!(c.min_element() >= 0.0 && c.max_element() <= 1.0, "{op:?} {v} -> {c}");
            }
        }
    }

    #[test]
    fn luminance_is_monotonic_in_exposure() {
        let inputs = [Vec3::splat(0.18), Vec3::splat(2.0), Vec3::new(0.8, 0.6, 0.4)];
        for op in [ToneMapOperator::Reinhard, ToneMapOperator::Aces] {
            for input in inputs {
                let mut last = 0.0;
                for step in 1..=64 {
                    let exposure = step as f32 * 0.25;
                    let l = luminance(tone_map(input, &params(op, exposure), false));
                    assert!(l + 1e-6 >= last, "{op:?} {input} at {exposure}: {l} < {last}");
                    last = l;
                }
            }
        }
    }

    #[test]
    fn reinhard_approaches_but_never_exceeds_one() {
        let c = reinhard(Vec3::splat(50.0), 1.0);
        assert!(c.x <= 1.0 && c.x > 0.999);
    }

    #[test]
    fn neutral_grading_is_identity() {
        let p = PostProcessParams::default();
        let c = Vec3::new(0.7, 0.2, 1.5);
        assert!(color_grade(c, &p).abs_diff_eq(c, 1e-5));
    }

    #[test]
    fn zero_saturation_produces_grey() {
        let p = PostProcessParams {
            saturation: 0.0,
            ..Default::default()
        };
        let c = color_grade(Vec3::new(1.0, 0.2, 0.1), &p);
        assert!((c.x - c.y).abs() < 1e-6 && (c.y - c.z).abs() < 1e-6);
    }
}
