//! Pass-level rendering backends.
//!
//! The orchestrator decides what is drawn, in which order and with which
//! shadow slots; a backend only knows how to execute one pass. Two backends
//! exist: [`gpu::GpuBackend`] on wgpu and [`software::SoftwareBackend`], a CPU
//! reference that runs the same passes on images.

pub mod gpu;
pub mod raster;
pub mod software;

use crate::atmosphere::AtmosphereState;
use crate::camera::CameraMatrices;
use crate::debug::DebugView;
use crate::error::RenderResult;
use crate::framebuffer::FramebufferSet;
use crate::light::Light;
use crate::lighting::LightingEnvironment;
use crate::material::{DefaultResources, Material};
use crate::mesh::MeshData;
use crate::post::{PostPlan, PostProcessConfig};
use crate::resources::{MeshHandle, TextureData, TextureDesc, TextureHandle};
use crate::shaders::ShaderLibrary;
use crate::shadow::ShadowAllocation;
use glam::Mat4;
use std::sync::Arc;

pub use gpu::GpuBackend;
pub use software::{SoftwareBackend, SoftwareLimits};

/// Read-only inputs shared by every pass of one frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext<'a> {
    pub camera: CameraMatrices,
    pub size: (u32, u32),
    pub frame_index: u64,
    pub atmosphere: &'a AtmosphereState,
    pub environment: &'a LightingEnvironment,
    pub lights: &'a [Light],
    pub shadows: &'a ShadowAllocation,
    pub post: &'a PostProcessConfig,
    pub plan: &'a PostPlan,
    pub defaults: &'a DefaultResources,
    pub debug_view: DebugView,
}

/// One mesh draw with its resolved material.
#[derive(Debug, Clone)]
pub struct DrawItem {
    /// Index of the object in the scene, for diagnostics.
    pub object: usize,
    pub mesh: MeshHandle,
    pub material: Arc<Material>,
    pub model: Mat4,
}

pub trait RenderBackend {
    fn name(&self) -> &'static str;

    /// Validate and build every pass. Failures name the stage.
    fn compile_shaders(&mut self, library: &ShaderLibrary) -> RenderResult<()>;

    fn create_texture(&mut self, desc: &TextureDesc) -> RenderResult<TextureHandle>;

    /// Unknown handles are ignored.
    fn destroy_texture(&mut self, handle: TextureHandle);

    /// Declared shape of a live texture.
    fn texture_desc(&self, handle: TextureHandle) -> Option<TextureDesc>;

    /// Textures currently alive, including uploads.
    fn live_texture_count(&self) -> usize;

    fn upload_mesh(&mut self, mesh: &MeshData) -> RenderResult<MeshHandle>;

    fn upload_texture(&mut self, data: &TextureData) -> RenderResult<TextureHandle>;

    /// Resize the presentation output.
    fn configure_output(&mut self, width: u32, height: u32) -> RenderResult<()>;

    /// Drop temporal state that no longer matches the targets.
    fn reset_history(&mut self);

    /// Stage per-frame uniforms.
    fn prepare_frame(&mut self, frame: &FrameContext<'_>) -> RenderResult<()>;

    fn geometry_pass(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet, draws: &[DrawItem])
        -> RenderResult<()>;

    /// Render depth for every assigned layer of the atlas.
    fn shadow_pass(&mut self, frame: &FrameContext<'_>, atlas: TextureHandle, casters: &[DrawItem]) -> RenderResult<()>;

    fn lighting_pass(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet, atlas: TextureHandle)
        -> RenderResult<()>;

    /// Sky behind uncovered pixels of the HDR target.
    fn skybox_pass(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet) -> RenderResult<()>;

    /// Run the post chain; returns the target holding the display-ready image.
    fn post_process(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet) -> RenderResult<TextureHandle>;

    fn present(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet, image: TextureHandle) -> RenderResult<()>;
}
