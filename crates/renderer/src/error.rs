//! Error types for the rendering pipeline.
//!
//! Only fatal and caller-facing failures live here. Missing optional data
//! (IBL maps, normal maps, material textures) is never an error: the passes
//! log a warning and fall back to the default resources.

use thiserror::Error;

pub type RenderResult<T> = Result<T, RenderError>;

#[derive(Debug, Error)]
pub enum RenderError {
    /// Shader compilation or framebuffer completeness failed during startup.
    #[error("initialization failed in {stage} stage: {reason}")]
    Initialization { stage: String, reason: String },

    /// A post-process configuration call was rejected; prior state is unchanged.
    #[error(transparent)]
    Configuration(#[from] ConfigError),

    /// Recreating size-dependent resources failed; the previous set is still active.
    #[error("resize to {width}x{height} failed, keeping previous framebuffers: {reason}")]
    Resize {
        width: u32,
        height: u32,
        reason: String,
    },

    /// A texture or buffer could not be allocated.
    #[error("failed to allocate {label}: {reason}")]
    Allocation { label: String, reason: String },

    /// A fatal resource error aborted the frame before presentation.
    #[error("frame aborted in {stage} stage: {reason}")]
    FrameAborted { stage: String, reason: String },

    /// The presentation surface was lost or timed out.
    #[error("surface error: {0}")]
    Surface(String),
}

impl RenderError {
    pub fn initialization(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Initialization {
            stage: stage.into(),
            reason: reason.into(),
        }
    }

    pub fn allocation(label: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Allocation {
            label: label.into(),
            reason: reason.into(),
        }
    }

    pub fn frame_aborted(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FrameAborted {
            stage: stage.into(),
            reason: reason.into(),
        }
    }
}

/// Rejections from `set_post_process_option` and effect toggles.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown post-process effect '{0}'")]
    UnknownEffect(String),

    #[error("effect '{effect}' has no parameter '{param}'")]
    UnknownParameter { effect: String, param: String },

    #[error("{effect}.{param} = {value} is outside [{min}, {max}]")]
    OutOfRange {
        effect: String,
        param: String,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("{effect}.{param} expects {expected}")]
    WrongValueType {
        effect: String,
        param: String,
        expected: &'static str,
    },
}
