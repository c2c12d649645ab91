//! Debug views selectable at presentation time.

use glam::{Vec3, Vec4, Vec4Swizzles};
use serde::{Deserialize, Serialize};

/// Distance scale for the depth view.
const DEPTH_FALLOFF: f32 = 0.05;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum DebugView {
    #[default]
    Final,
    Position,
    Normal,
    Albedo,
    Emission,
    Depth,
}

impl DebugView {
    pub const ALL: [DebugView; 6] = [
        DebugView::Final,
        DebugView::Position,
        DebugView::Normal,
        DebugView::Albedo,
        DebugView::Emission,
        DebugView::Depth,
    ];

    /// Value of `CameraUniform::params.w` read by `debug.wgsl`.
    pub fn code(self) -> u32 {
        match self {
            DebugView::Final => 0,
            DebugView::Position => 1,
            DebugView::Normal => 2,
            DebugView::Albedo => 3,
            DebugView::Emission => 4,
            DebugView::Depth => 5,
        }
    }

    pub fn next(self) -> Self {
        let index = Self::ALL.iter().position(|&v| v == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }
}

/// G-buffer texels for one presented pixel.
#[derive(Debug, Clone, Copy)]
pub struct DebugTexels {
    pub position: Vec4,
    pub normal: Vec4,
    pub albedo_metallic: Vec4,
    pub emission_ao: Vec4,
}

/// Display colour in [0, 1] for `view`.
pub fn debug_color(view: DebugView, final_color: Vec4, texels: &DebugTexels, camera_position: Vec3) -> Vec3 {
    let covered = texels.position.w >= 0.5;
    let c = match view {
        DebugView::Final => final_color.xyz(),
        DebugView::Position => texels.position.xyz().abs() * 0.1 * texels.position.w,
        DebugView::Normal if covered => texels.normal.xyz() * 0.5 + 0.5,
        DebugView::Normal => Vec3::ZERO,
        DebugView::Albedo => texels.albedo_metallic.xyz(),
        DebugView::Emission => {
            let e = texels.emission_ao.xyz().max(Vec3::ZERO);
            e / (Vec3::ONE + e)
        }
        DebugView::Depth if covered => {
            let distance = (texels.position.xyz() - camera_position).length();
            Vec3::splat(1.0 - (-distance * DEPTH_FALLOFF).exp())
        }
        DebugView::Depth => Vec3::ONE,
    };
    c.clamp(Vec3::ZERO, Vec3::ONE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texels() -> DebugTexels {
        DebugTexels {
            position: Vec4::new(0.0, 0.0, -10.0, 1.0),
            normal: Vec4::new(0.0, 1.0, 0.0, 0.5),
            albedo_metallic: Vec4::new(0.8, 0.2, 0.1, 0.0),
            emission_ao: Vec4::new(3.0, 0.0, 0.0, 1.0),
        }
    }

    #[test]
    fn views_cycle_through_all_variants() {
        let mut view = DebugView::Final;
        for _ in 0..DebugView::ALL.len() {
            view = view.next();
        }
        assert_eq!(view, DebugView::Final);
    }

    #[test]
    fn normal_view_maps_up_to_green() {
        let c = debug_color(DebugView::Normal, Vec4::ZERO, &texels(), Vec3::ZERO);
        assert_eq!(c, Vec3::new(0.5, 1.0, 0.5));
    }

    #[test]
    fn depth_view_grows_with_distance_and_is_white_when_uncovered() {
        let near = debug_color(DebugView::Depth, Vec4::ZERO, &texels(), Vec3::new(0.0, 0.0, -9.0));
        let far = debug_color(DebugView::Depth, Vec4::ZERO, &texels(), Vec3::new(0.0, 0.0, 20.0));
        assert!(near.x < far.x);
        let mut empty = texels();
        empty.position = Vec4::ZERO;
        assert_eq!(debug_color(DebugView::Depth, Vec4::ZERO, &empty, Vec3::ZERO), Vec3::ONE);
    }

    #[test]
    fn final_view_is_clamped() {
        let c = debug_color(DebugView::Final, Vec4::new(2.0, -1.0, 0.5, 1.0), &texels(), Vec3::ZERO);
        assert_eq!(c, Vec3::new(1.0, 0.0, 0.5));
    }
}
