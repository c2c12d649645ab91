//! Interactive viewer for the deferred renderer, with a headless PNG mode.

mod config;
mod demo;

use anyhow::{Context, Result};
use config::ViewerConfig;
use engine_core::FrameClock;
use renderer::{
    Effect, GpuBackend, RenderBackend, RenderError, RenderPassOrchestrator, Scene, SoftwareBackend,
    SoftwareLimits,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use winit::{
    application::ApplicationHandler,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

struct ViewerState {
    renderer: RenderPassOrchestrator<GpuBackend>,
    scene: Scene,
    clock: FrameClock,
    orbit: f32,
    orbit_speed: f32,
    ibl: bool,
}

impl ViewerState {
    async fn new(window: Arc<Window>, config: &ViewerConfig) -> Result<Self> {
        let size = window.inner_size();
        let renderer_config = config.renderer.clone().with_size(size.width.max(1), size.height.max(1));
        let backend = GpuBackend::new(window, renderer_config.post_seed).await?;
        let mut renderer = RenderPassOrchestrator::new(backend, renderer_config)?;
        renderer.atmosphere_mut().set_time_of_day(config.time_of_day);
        renderer.atmosphere_mut().set_time_scale(config.time_scale);
        let scene = demo::build_scene(&mut renderer)?;

        Ok(Self {
            renderer,
            scene,
            clock: FrameClock::new(),
            orbit: 0.0,
            orbit_speed: config.orbit_speed,
            ibl: false,
        })
    }

    /// Returns false when the viewer should exit.
    fn handle_window_event(&mut self, event: WindowEvent) -> bool {
        match event {
            WindowEvent::CloseRequested => return false,
            WindowEvent::Resized(size) => {
                if size.width > 0 && size.height > 0 {
                    if let Err(e) = self.renderer.resize(size.width, size.height) {
                        log::error!("{e}");
                    }
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(code),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => return self.handle_key(code),
            WindowEvent::RedrawRequested => {
                if !self.redraw() {
                    return false;
                }
                self.renderer.backend().window().request_redraw();
            }
            _ => {}
        }
        true
    }

    fn handle_key(&mut self, code: KeyCode) -> bool {
        let toggle = |renderer: &mut RenderPassOrchestrator<GpuBackend>, effect: &str, key: Effect| {
            let enabled = !renderer.post_config().is_enabled(key);
            match renderer.set_effect_enabled(effect, enabled) {
                Ok(()) => log::info!("{effect}: {}", if enabled { "on" } else { "off" }),
                Err(e) => log::warn!("{e}"),
            }
        };
        match code {
            KeyCode::Escape => return false,
            KeyCode::F1 => {
                let view = self.renderer.debug_view().next();
                self.renderer.set_debug_view(view);
                log::info!("Debug view: {view:?}");
            }
            KeyCode::KeyB => toggle(&mut self.renderer, "bloom", Effect::Bloom),
            KeyCode::KeyO => toggle(&mut self.renderer, "ssao", Effect::Ssao),
            KeyCode::KeyT => toggle(&mut self.renderer, "taa", Effect::Taa),
            KeyCode::KeyI => {
                self.ibl = !self.ibl;
                self.renderer.set_image_based_lighting(self.ibl.then(demo::outdoor_ibl));
            }
            KeyCode::ArrowRight | KeyCode::ArrowLeft => {
                let step = if code == KeyCode::ArrowRight { 1.0 } else { -1.0 };
                let hour = self.renderer.atmosphere().state().time_of_day + step;
                self.renderer.atmosphere_mut().set_time_of_day(hour);
                log::info!("Time of day: {:.1}h", self.renderer.atmosphere().state().time_of_day);
            }
            KeyCode::KeyF => {
                let stats = self.renderer.get_stats();
                log::info!(
                    "{:.0} fps | {:.2} ms | {} draws | {} tris | {} lights | {} shadow maps | {} culled",
                    self.clock.fps(),
                    stats.frame_time_ms,
                    stats.draw_calls,
                    stats.triangles,
                    stats.lights_processed,
                    stats.shadow_maps_rendered,
                    stats.culled_objects
                );
            }
            _ => {}
        }
        true
    }

    fn redraw(&mut self) -> bool {
        let dt = self.clock.tick().as_secs_f32();
        self.orbit += dt * self.orbit_speed;
        self.renderer.update_atmosphere(dt);

        let (width, height) = self.renderer.framebuffers().size();
        let camera = demo::orbit_camera(self.orbit, width, height);
        match self.renderer.render_scene(&self.scene, &camera) {
            Ok(()) => true,
            Err(RenderError::Surface(reason)) => {
                log::debug!("Skipped frame: {reason}");
                true
            }
            Err(e) => {
                log::error!("Frame failed: {e}");
                false
            }
        }
    }
}

/// Application handler for winit.
struct App {
    config: ViewerConfig,
    state: Option<ViewerState>,
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }
        let window_attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.renderer.width,
                self.config.renderer.height,
            ));
        let window = match event_loop.create_window(window_attrs) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                log::error!("Failed to create window: {}", e);
                event_loop.exit();
                return;
            }
        };

        match pollster::block_on(ViewerState::new(window.clone(), &self.config)) {
            Ok(state) => {
                self.state = Some(state);
                window.request_redraw();
            }
            Err(e) => {
                log::error!("Failed to initialize renderer: {:#}", e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if !state.handle_window_event(event) {
                event_loop.exit();
            }
        }
    }
}

/// Render a few frames on the CPU and write the last one as a PNG.
fn run_headless(config: &ViewerConfig, output: &Path) -> Result<()> {
    let backend = SoftwareBackend::new(SoftwareLimits::default(), config.renderer.post_seed);
    let mut renderer = RenderPassOrchestrator::new(backend, config.renderer.clone())?;
    renderer.atmosphere_mut().set_time_of_day(config.time_of_day);
    let scene = demo::build_scene(&mut renderer)?;

    let (width, height) = (config.renderer.width, config.renderer.height);
    let camera = demo::orbit_camera(0.4, width, height);
    for _ in 0..config.headless_frames.max(1) {
        renderer.update_atmosphere(1.0 / 60.0);
        renderer.render_scene(&scene, &camera)?;
    }

    let stats = renderer.get_stats();
    log::info!(
        "Rendered {} frames on the {} backend; last took {:.1} ms ({} draws, {} triangles)",
        stats.frame_index + 1,
        renderer.backend().name(),
        stats.frame_time_ms,
        stats.draw_calls,
        stats.triangles
    );

    let pixels = renderer
        .backend()
        .last_frame_rgba8()
        .context("software backend presented no frame")?;
    let image = image::RgbaImage::from_raw(width, height, pixels).context("frame size mismatch")?;
    image
        .save(output)
        .with_context(|| format!("writing {}", output.display()))?;
    log::info!("Wrote {}", output.display());
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = ViewerConfig::load();
    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("--headless") => {
            let output = args.next().map(PathBuf::from).unwrap_or_else(|| config.headless_output.clone());
            return run_headless(&config, &output);
        }
        Some("--write-config") => {
            config.save();
            return Ok(());
        }
        Some(other) => anyhow::bail!("unknown argument {other:?}; expected --headless [out.png] or --write-config"),
        None => {}
    }

    println!("Controls: F1 debug view | B bloom | O ssao | T taa | I image-based lighting");
    println!("          Left/Right time of day | F frame stats | Esc quit");
    log::info!("Starting viewer at {}x{}", config.renderer.width, config.renderer.height);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);
    let mut app = App { config, state: None };
    event_loop.run_app(&mut app)?;
    Ok(())
}
