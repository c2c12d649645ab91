//! Embedded WGSL sources keyed by pass name.
//!
//! `common.wgsl` is prepended to every pass so the shared camera block,
//! fullscreen vertex shader and helpers exist once. Sizes of every uniform
//! block are checked against their WGSL declarations before any pipeline is
//! built.

use crate::error::{RenderError, RenderResult};
use crate::uniforms::{
    validate_block, AtmosphereUniform, BlurUniform, CameraUniform, GpuLight, LightingUniform, ObjectUniform,
    PostUniform, ShadowPassUniform, SsaoKernelUniform, UniformBlock,
};
use std::collections::BTreeMap;

const COMMON: &str = include_str!("shaders/common.wgsl");

/// Every pass the pipeline compiles, in pipeline order.
pub const SHADER_KEYS: [&str; 9] = [
    "geometry",
    "shadow",
    "lighting",
    "skybox",
    "ssao",
    "bloom",
    "tone_mapping",
    "post_effects",
    "debug",
];

fn embedded(key: &str) -> Option<&'static str> {
    Some(match key {
        "geometry" => include_str!("shaders/geometry.wgsl"),
        "shadow" => include_str!("shaders/shadow.wgsl"),
        "lighting" => include_str!("shaders/lighting.wgsl"),
        "skybox" => include_str!("shaders/skybox.wgsl"),
        "ssao" => include_str!("shaders/ssao.wgsl"),
        "bloom" => include_str!("shaders/bloom.wgsl"),
        "tone_mapping" => include_str!("shaders/tone_mapping.wgsl"),
        "post_effects" => include_str!("shaders/post_effects.wgsl"),
        "debug" => include_str!("shaders/debug.wgsl"),
        _ => return None,
    })
}

/// Pass sources ready for compilation.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    sources: BTreeMap<&'static str, String>,
}

impl Default for ShaderLibrary {
    fn default() -> Self {
        Self::embedded()
    }
}

impl ShaderLibrary {
    pub fn embedded() -> Self {
        let sources = SHADER_KEYS
            .iter()
            .filter_map(|&key| embedded(key).map(|body| (key, format!("{COMMON}\n{body}"))))
            .collect();
        Self { sources }
    }

    /// Replace one pass body. Unknown keys are an initialization error.
    pub fn with_source(mut self, key: &str, body: &str) -> RenderResult<Self> {
        let Some(&key) = SHADER_KEYS.iter().find(|&&k| k == key) else {
            return Err(RenderError::initialization(key, "no such shader stage"));
        };
        self.sources.insert(key, format!("{COMMON}\n{body}"));
        Ok(self)
    }

    /// Full source for a pass, including the shared prelude.
    pub fn source(&self, key: &str) -> RenderResult<&str> {
        self.sources
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| RenderError::initialization(key, "shader source is missing"))
    }

    pub fn keys(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.sources.keys().copied()
    }

    /// Check every uniform block against each pass that declares it.
    pub fn validate(&self) -> RenderResult<()> {
        for key in SHADER_KEYS {
            let source = self.source(key)?;
            if !source.contains("@fragment") && !source.contains("@vertex") {
                return Err(RenderError::initialization(key, "no entry points"));
            }
        }
        self.check::<CameraUniform>()?;
        self.check::<ObjectUniform>()?;
        self.check::<ShadowPassUniform>()?;
        self.check::<GpuLight>()?;
        self.check::<LightingUniform>()?;
        self.check::<AtmosphereUniform>()?;
        self.check::<PostUniform>()?;
        self.check::<BlurUniform>()?;
        self.check::<SsaoKernelUniform>()?;
        Ok(())
    }

    fn check<T: UniformBlock>(&self) -> RenderResult<()> {
        for &stage in T::SHADERS {
            validate_block::<T>(stage, self.source(stage)?)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_library_has_every_stage_and_validates() {
        let library = ShaderLibrary::embedded();
        assert_eq!(library.keys().count(), SHADER_KEYS.len());
        library.validate().expect("embedded shaders match host uniform blocks");
    }

    #[test]
    fn every_source_carries_the_shared_prelude() {
        let library = ShaderLibrary::embedded();
        for key in SHADER_KEYS {
            assert!(library.source(key).unwrap().contains("fn vs_fullscreen"), "{key}");
        }
    }

    #[test]
    fn mismatched_block_names_the_stage() {
        let broken = "struct PostUniform {\n    tone: vec4<f32>,\n}\n@fragment fn fs_tonemap() {}";
        let library = ShaderLibrary::embedded().with_source("tone_mapping", broken).unwrap();
        match library.validate() {
            Err(RenderError::Initialization { stage, reason }) => {
                assert_eq!(stage, "tone_mapping");
                assert!(reason.contains("PostUniform"));
            }
            other => panic!("expected initialization error, got {other:?}"),
        }
    }

    #[test]
    fn unknown_stage_is_rejected() {
        assert!(ShaderLibrary::embedded().with_source("raytrace", "").is_err());
    }
}
