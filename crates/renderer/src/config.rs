//! Renderer settings. Serializable so front ends can keep them in a RON file.

use crate::debug::DebugView;
use crate::post::PostProcessConfig;
use glam::Vec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    pub width: u32,
    pub height: u32,
    /// Shadow slots; lights past this count render unshadowed.
    pub shadow_pool_size: u32,
    /// Edge length of every shadow atlas layer.
    pub shadow_resolution: u32,
    /// Multiplier from photometric units (lux, lumens) to shader radiance.
    pub intensity_scale: f32,
    /// Flat ambient used when no image-based lighting is set.
    pub ambient_color: Vec3,
    /// Append the atmosphere sun as a directional light each frame.
    pub atmosphere_sun: bool,
    pub sun_casts_shadows: bool,
    pub weather_seed: u64,
    /// Seed for the SSAO kernel and rotation noise.
    pub post_seed: u64,
    pub debug_view: DebugView,
    /// Skip objects whose world bounds miss the camera frustum.
    pub frustum_culling: bool,
    pub post: PostProcessConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            shadow_pool_size: 4,
            shadow_resolution: 2048,
            intensity_scale: 0.001,
            ambient_color: Vec3::splat(0.03),
            atmosphere_sun: true,
            sun_casts_shadows: false,
            weather_seed: 0x5eed,
            post_seed: 17,
            debug_view: DebugView::Final,
            frustum_culling: true,
            post: PostProcessConfig::default(),
        }
    }
}

impl RendererConfig {
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post::Effect;

    #[test]
    fn defaults_match_documented_values() {
        let config = RendererConfig::default();
        assert_eq!(config.intensity_scale, 0.001);
        assert_eq!(config.ambient_color, Vec3::splat(0.03));
        assert!(config.post.is_enabled(Effect::Bloom));
        assert!(!config.post.is_enabled(Effect::Taa));
    }
}
