//! HDR deferred renderer: G-buffer, shadow atlas, PBR lighting, atmosphere and a
//! fixed-order post-process chain, driven by [`RenderPassOrchestrator`].

pub mod atmosphere;
pub mod backend;
pub mod brdf;
pub mod camera;
pub mod color;
pub mod config;
pub mod debug;
pub mod diagnostics;
pub mod error;
pub mod framebuffer;
pub mod image;
pub mod light;
pub mod lighting;
pub mod material;
pub mod mesh;
pub mod orchestrator;
pub mod post;
pub mod resources;
pub mod scene;
pub mod shaders;
pub mod shadow;
pub mod stats;
pub mod uniforms;
pub mod vertex;

pub use atmosphere::{Atmosphere, AtmosphereState};
pub use backend::{GpuBackend, RenderBackend, SoftwareBackend, SoftwareLimits};
pub use camera::*;
pub use config::RendererConfig;
pub use debug::DebugView;
pub use error::{ConfigError, RenderError, RenderResult};
pub use light::*;
pub use lighting::{AmbientCube, ImageBasedLighting};
pub use material::*;
pub use mesh::*;
pub use orchestrator::RenderPassOrchestrator;
pub use post::{Effect, OptionValue, PostProcessConfig, ToneMapOperator};
pub use resources::{ColorSpace, MeshHandle, TextureData, TextureHandle};
pub use scene::*;
pub use stats::FrameStats;
pub use vertex::*;
