//! PBR material description.
//!
//! Materials are immutable once handed to the renderer and are shared between
//! objects through `Arc<Material>`. The deferred G-buffer carries albedo,
//! metallic, roughness, occlusion and emission; the extended channels
//! (subsurface, clearcoat, sheen, anisotropy, transmission) are part of the
//! record so scenes can author them, but the deferred lighting pass does not
//! evaluate them.

use crate::resources::TextureHandle;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlphaMode {
    Opaque,
    /// Fragments with alpha below the cutoff are discarded.
    Mask,
    /// Written to the G-buffer with the mask test; there is no sorted transparent pass.
    Blend,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialType {
    Standard,
    Subsurface,
    Clearcoat,
    Cloth,
    Glass,
    Emissive,
}

/// Optional texture per channel. `None` falls back to the default resources.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TextureSlots {
    pub albedo: Option<TextureHandle>,
    /// Tangent-space normal map.
    pub normal: Option<TextureHandle>,
    pub metallic: Option<TextureHandle>,
    pub roughness: Option<TextureHandle>,
    pub ao: Option<TextureHandle>,
    pub emission: Option<TextureHandle>,
    pub height: Option<TextureHandle>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Subsurface {
    pub weight: f32,
    pub color: Vec3,
    pub radius: Vec3,
    pub ior: f32,
}

impl Default for Subsurface {
    fn default() -> Self {
        Self {
            weight: 0.0,
            color: Vec3::ONE,
            radius: Vec3::ONE,
            ior: 1.4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Clearcoat {
    pub weight: f32,
    pub roughness: f32,
}

impl Default for Clearcoat {
    fn default() -> Self {
        Self {
            weight: 0.0,
            roughness: 0.03,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sheen {
    pub weight: f32,
    pub tint: f32,
    pub roughness: f32,
}

impl Default for Sheen {
    fn default() -> Self {
        Self {
            weight: 0.0,
            tint: 0.5,
            roughness: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Anisotropy {
    pub strength: f32,
    pub rotation: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transmission {
    pub weight: f32,
    pub ior: f32,
    pub thickness: f32,
}

impl Default for Transmission {
    fn default() -> Self {
        Self {
            weight: 0.0,
            ior: 1.45,
            thickness: 0.0,
        }
    }
}

/// UV tiling and offset applied before every texture lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvTransform {
    pub scale: Vec2,
    pub offset: Vec2,
}

impl Default for UvTransform {
    fn default() -> Self {
        Self {
            scale: Vec2::ONE,
            offset: Vec2::ZERO,
        }
    }
}

impl UvTransform {
    pub fn apply(&self, uv: Vec2) -> Vec2 {
        uv * self.scale + self.offset
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    /// Identifier used in diagnostics.
    pub name: String,
    pub albedo: Vec3,
    pub alpha: f32,
    pub metallic: f32,
    pub roughness: f32,
    pub ao: f32,
    pub emission: Vec3,
    pub emission_strength: f32,
    pub textures: TextureSlots,
    pub subsurface: Subsurface,
    pub clearcoat: Clearcoat,
    pub sheen: Sheen,
    pub anisotropy: Anisotropy,
    pub transmission: Transmission,
    pub alpha_mode: AlphaMode,
    pub alpha_cutoff: f32,
    pub uv: UvTransform,
    pub two_sided: bool,
    pub material_type: MaterialType,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::from("default"),
            albedo: Vec3::splat(0.8),
            alpha: 1.0,
            metallic: 0.0,
            roughness: 0.5,
            ao: 1.0,
            emission: Vec3::ZERO,
            emission_strength: 1.0,
            textures: TextureSlots::default(),
            subsurface: Subsurface::default(),
            clearcoat: Clearcoat::default(),
            sheen: Sheen::default(),
            anisotropy: Anisotropy::default(),
            transmission: Transmission::default(),
            alpha_mode: AlphaMode::Opaque,
            alpha_cutoff: 0.5,
            uv: UvTransform::default(),
            two_sided: false,
            material_type: MaterialType::Standard,
        }
    }
}

impl Material {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_albedo(mut self, albedo: Vec3) -> Self {
        self.albedo = albedo;
        self
    }

    pub fn with_metallic_roughness(mut self, metallic: f32, roughness: f32) -> Self {
        self.metallic = metallic.clamp(0.0, 1.0);
        self.roughness = roughness.clamp(0.0, 1.0);
        self
    }

    pub fn with_emission(mut self, emission: Vec3, strength: f32) -> Self {
        self.emission = emission;
        self.emission_strength = strength;
        self
    }

    pub fn with_alpha(mut self, alpha: f32, mode: AlphaMode) -> Self {
        self.alpha = alpha;
        self.alpha_mode = mode;
        self
    }

    pub fn with_textures(mut self, textures: TextureSlots) -> Self {
        self.textures = textures;
        self
    }

    /// Emitted radiance written into the G-buffer.
    pub fn emissive_radiance(&self) -> Vec3 {
        self.emission * self.emission_strength
    }

    /// Whether a fragment with the given final alpha survives the alpha test.
    pub fn keeps_fragment(&self, alpha: f32) -> bool {
        match self.alpha_mode {
            AlphaMode::Opaque => true,
            AlphaMode::Mask | AlphaMode::Blend => alpha >= self.alpha_cutoff,
        }
    }

    pub fn into_shared(self) -> Arc<Material> {
        Arc::new(self)
    }
}

/// Fallbacks created once at initialization and never mutated.
#[derive(Debug, Clone)]
pub struct DefaultResources {
    pub material: Arc<Material>,
    /// 1x1 white; stands in for every absent colour or scalar map.
    pub white: TextureHandle,
    /// 1x1 (0.5, 0.5, 1.0) tangent-space normal.
    pub flat_normal: TextureHandle,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_material_matches_documented_values() {
        let m = Material::default();
        assert_eq!(m.albedo, Vec3::splat(0.8));
        assert_eq!(m.roughness, 0.5);
        assert_eq!(m.alpha_mode, AlphaMode::Opaque);
        assert_eq!(m.transmission.ior, 1.45);
    }

    #[test]
    fn mask_discards_below_cutoff_and_opaque_keeps_everything() {
        let masked = Material::default().with_alpha(1.0, AlphaMode::Mask);
        assert!(!masked.keeps_fragment(0.2));
        assert!(masked.keeps_fragment(0.7));
        assert!(Material::default().keeps_fragment(0.0));
    }

    #[test]
    fn uv_transform_tiles_then_offsets() {
        let t = UvTransform {
            scale: Vec2::splat(2.0),
            offset: Vec2::new(0.5, 0.0),
        };
        assert_eq!(t.apply(Vec2::new(0.25, 0.5)), Vec2::new(1.0, 1.0));
    }
}
