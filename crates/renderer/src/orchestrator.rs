//! Frame driver: submission, culling, shadow slots and the fixed pass order.

use crate::atmosphere::Atmosphere;
use crate::backend::{DrawItem, FrameContext, RenderBackend};
use crate::camera::CameraMatrices;
use crate::config::RendererConfig;
use crate::debug::DebugView;
use crate::diagnostics::WarnOnce;
use crate::error::{RenderError, RenderResult};
use crate::framebuffer::FramebufferSet;
use crate::light::{Light, LightType};
use crate::lighting::{Ambient, ImageBasedLighting, LightingEnvironment};
use crate::material::{DefaultResources, Material};
use crate::mesh::MeshData;
use crate::post::{plan, OptionValue, PostProcessConfig};
use crate::resources::{ColorSpace, MeshHandle, TextureData, TextureHandle};
use crate::scene::{CameraView, SceneView};
use crate::shaders::ShaderLibrary;
use crate::shadow::ShadowMapPool;
use crate::stats::{FrameStats, FrameTimer};
use engine_core::{Aabb, Frustum};
use glam::{Mat4, Vec3};
use std::collections::HashMap;

/// Illuminance of the atmosphere sun at unit intensity.
const SUN_ILLUMINANCE_LUX: f32 = 1000.0;

/// What the orchestrator remembers about an uploaded mesh.
#[derive(Debug, Clone, Copy)]
struct MeshInfo {
    triangles: u32,
    bounds: Aabb,
}

/// Owns the backend and every frame-persistent resource.
pub struct RenderPassOrchestrator<B: RenderBackend> {
    backend: B,
    config: RendererConfig,
    defaults: DefaultResources,
    framebuffers: FramebufferSet,
    shadow_pool: ShadowMapPool,
    shadow_atlas: TextureHandle,
    atmosphere: Atmosphere,
    /// Seconds queued by `update_atmosphere`, applied once by the next frame.
    pending_atmosphere_dt: f32,
    ibl: Option<ImageBasedLighting>,
    meshes: HashMap<MeshHandle, MeshInfo>,
    previous_view_projection: Option<Mat4>,
    frame_index: u64,
    stats: FrameStats,
    warnings: WarnOnce,
}

impl<B: RenderBackend> RenderPassOrchestrator<B> {
    /// Compile the embedded shaders and create every startup resource.
    pub fn new(backend: B, config: RendererConfig) -> RenderResult<Self> {
        Self::with_shaders(backend, config, &ShaderLibrary::embedded())
    }

    pub fn with_shaders(mut backend: B, config: RendererConfig, shaders: &ShaderLibrary) -> RenderResult<Self> {
        backend.compile_shaders(shaders)?;

        let white = backend
            .upload_texture(&TextureData::solid("default_white", [255; 4], ColorSpace::Linear))
            .map_err(|e| RenderError::initialization("defaults", e.to_string()))?;
        let flat_normal = backend
            .upload_texture(&TextureData::solid("default_flat_normal", [128, 128, 255, 255], ColorSpace::Linear))
            .map_err(|e| RenderError::initialization("defaults", e.to_string()))?;
        let defaults = DefaultResources {
            material: Material::new("default").into_shared(),
            white,
            flat_normal,
        };

        let shadow_pool = ShadowMapPool::new(config.shadow_pool_size, config.shadow_resolution);
        let shadow_atlas = backend
            .create_texture(&shadow_pool.atlas_desc())
            .map_err(|e| RenderError::initialization("shadow", e.to_string()))?;

        let framebuffers = FramebufferSet::create(&mut backend, config.width, config.height)
            .and_then(|set| set.validate(&backend).map(|_| set))
            .map_err(|e| RenderError::initialization("framebuffer", e.to_string()))?;
        backend
            .configure_output(config.width, config.height)
            .map_err(|e| RenderError::initialization("output", e.to_string()))?;

        log::info!(
            "Renderer ready on {} backend: {}x{}, {} shadow slots at {}px",
            backend.name(),
            config.width,
            config.height,
            shadow_pool.capacity(),
            shadow_pool.resolution()
        );

        Ok(Self {
            atmosphere: Atmosphere::new(config.weather_seed),
            pending_atmosphere_dt: 0.0,
            backend,
            defaults,
            framebuffers,
            shadow_pool,
            shadow_atlas,
            ibl: None,
            meshes: HashMap::new(),
            previous_view_projection: None,
            frame_index: 0,
            stats: FrameStats::default(),
            warnings: WarnOnce::default(),
            config,
        })
    }

    /// Upload geometry and remember its bounds for culling.
    pub fn upload_mesh(&mut self, mesh: &MeshData) -> RenderResult<MeshHandle> {
        let handle = self.backend.upload_mesh(mesh)?;
        self.meshes.insert(
            handle,
            MeshInfo {
                triangles: mesh.triangle_count(),
                bounds: mesh.bounds,
            },
        );
        Ok(handle)
    }

    pub fn upload_texture(&mut self, data: &TextureData) -> RenderResult<TextureHandle> {
        self.backend.upload_texture(data)
    }

    /// Queue `dt` seconds of time-of-day and weather simulation.
    ///
    /// The next `render_scene` applies everything queued in a single
    /// atmosphere update before lighting. Frames rendered without a queued
    /// step keep the current state.
    pub fn update_atmosphere(&mut self, dt: f32) {
        self.pending_atmosphere_dt += dt.max(0.0);
    }

    pub fn atmosphere(&self) -> &Atmosphere {
        &self.atmosphere
    }

    pub fn atmosphere_mut(&mut self) -> &mut Atmosphere {
        &mut self.atmosphere
    }

    /// Replace the flat ambient with image-based lighting, or go back to flat with `None`.
    pub fn set_image_based_lighting(&mut self, ibl: Option<ImageBasedLighting>) {
        self.ibl = ibl;
    }

    pub fn set_debug_view(&mut self, view: DebugView) {
        self.config.debug_view = view;
    }

    pub fn debug_view(&self) -> DebugView {
        self.config.debug_view
    }

    /// Validate and apply one post-process parameter. Rejected values leave the config unchanged.
    pub fn set_post_process_option(
        &mut self,
        effect: &str,
        param: &str,
        value: impl Into<OptionValue>,
    ) -> RenderResult<()> {
        self.config.post.set_option(effect, param, value.into())?;
        Ok(())
    }

    pub fn set_effect_enabled(&mut self, effect: &str, enabled: bool) -> RenderResult<()> {
        self.config.post.set_effect_enabled(effect, enabled)?;
        Ok(())
    }

    pub fn post_config(&self) -> &PostProcessConfig {
        &self.config.post
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Counters of the last completed frame.
    pub fn get_stats(&self) -> FrameStats {
        self.stats
    }

    pub fn framebuffers(&self) -> &FramebufferSet {
        &self.framebuffers
    }

    pub fn defaults(&self) -> &DefaultResources {
        &self.defaults
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Recreate every size-dependent target.
    ///
    /// The new set is built before the old one is released, so a failure
    /// leaves the previous framebuffers active and nothing half-allocated.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        let fail = |reason: String| RenderError::Resize { width, height, reason };
        if width == 0 || height == 0 {
            return Err(fail("zero-sized framebuffer".into()));
        }

        let set = FramebufferSet::create(&mut self.backend, width, height).map_err(|e| fail(e.to_string()))?;
        if let Err(e) = self.backend.configure_output(width, height) {
            set.release(&mut self.backend);
            let (old_w, old_h) = self.framebuffers.size();
            // The old targets stay valid even if the output cannot be restored.
            if let Err(restore) = self.backend.configure_output(old_w, old_h) {
                log::warn!("Could not restore the {old_w}x{old_h} output after a failed resize: {restore}");
            }
            return Err(fail(e.to_string()));
        }

        let old = std::mem::replace(&mut self.framebuffers, set);
        old.release(&mut self.backend);
        self.config.width = width;
        self.config.height = height;
        self.previous_view_projection = None;
        self.backend.reset_history();
        log::info!("Resized framebuffers to {width}x{height}");
        Ok(())
    }

    /// Render one frame: atmosphere step, geometry, shadows, lighting, sky, post chain, present.
    pub fn render_scene(&mut self, scene: &dyn SceneView, camera: &dyn CameraView) -> RenderResult<()> {
        let mut timer = FrameTimer::start(self.frame_index);
        self.atmosphere.update(std::mem::take(&mut self.pending_atmosphere_dt));
        let camera = CameraMatrices::from_view(camera, self.previous_view_projection);
        let frustum = Frustum::from_view_projection(&camera.view_projection);

        let mut draws = Vec::new();
        let mut casters = Vec::new();
        let mut visible_bounds = Aabb::EMPTY;
        let mut caster_bounds = Aabb::EMPTY;
        for (index, object) in scene.objects().enumerate() {
            let Some(mesh) = object.mesh().filter(|_| object.is_visible()) else {
                timer.stats.skipped_objects += 1;
                continue;
            };
            let Some(info) = self.meshes.get(&mesh) else {
                self.warnings.warn(
                    "geometry",
                    &format!("object {index}"),
                    format_args!("{mesh:?} was never uploaded; skipping"),
                );
                timer.stats.skipped_objects += 1;
                continue;
            };

            let model = object.world_transform();
            let bounds = info.bounds.transformed(&model);
            let item = DrawItem {
                object: index,
                mesh,
                material: object.material().cloned().unwrap_or_else(|| self.defaults.material.clone()),
                model,
            };
            if object.casts_shadows() {
                caster_bounds = caster_bounds.union(bounds);
                casters.push(item.clone());
            }
            if self.config.frustum_culling && !frustum.intersects_aabb(&bounds) {
                timer.stats.culled_objects += 1;
                continue;
            }
            visible_bounds = visible_bounds.union(bounds);
            timer.stats.draw_calls += 1;
            timer.stats.triangles += info.triangles as u64;
            draws.push(item);
        }

        let lights = self.frame_lights(scene.lights());
        timer.stats.lights_processed = lights.iter().filter(|l| l.enabled).count() as u32;

        let shadow_bounds = if visible_bounds.is_empty() { caster_bounds } else { visible_bounds };
        let shadows = self.shadow_pool.allocate(&lights, &shadow_bounds);
        if !shadows.unshadowed.is_empty() {
            log::debug!(
                "{} shadow-casting lights exceed the pool of {}; rendering them unshadowed",
                shadows.unshadowed.len(),
                self.shadow_pool.capacity()
            );
        }
        timer.stats.shadow_maps_rendered = shadows.assignments.len() as u32;
        timer.stats.shadow_draw_calls = (shadows.face_count() * casters.len()) as u32;

        let environment = LightingEnvironment {
            ambient: self
                .ibl
                .map(Ambient::ImageBased)
                .unwrap_or(Ambient::Flat(self.config.ambient_color)),
            sky_fill: sky_fill(&lights, self.config.intensity_scale),
            intensity_scale: self.config.intensity_scale,
        };
        let post_plan = plan(&self.config.post, camera.previous_view_projection.is_some());
        let frame = FrameContext {
            camera,
            size: self.framebuffers.size(),
            frame_index: self.frame_index,
            atmosphere: self.atmosphere.state(),
            environment: &environment,
            lights: &lights,
            shadows: &shadows,
            post: &self.config.post,
            plan: &post_plan,
            defaults: &self.defaults,
            debug_view: self.config.debug_view,
        };

        let backend = &mut self.backend;
        let targets = &self.framebuffers;
        backend.prepare_frame(&frame)?;
        backend.geometry_pass(&frame, targets, &draws)?;
        backend.shadow_pass(&frame, self.shadow_atlas, &casters)?;
        backend.lighting_pass(&frame, targets, self.shadow_atlas)?;
        backend.skybox_pass(&frame, targets)?;
        let image = backend.post_process(&frame, targets)?;
        backend.present(&frame, targets, image)?;

        self.previous_view_projection = Some(camera.view_projection);
        self.frame_index += 1;
        self.stats = timer.finish();
        Ok(())
    }

    /// Scene lights plus the atmosphere sun, with missing-profile warnings.
    fn frame_lights(&mut self, scene_lights: &[Light]) -> Vec<Light> {
        let mut lights = scene_lights.to_vec();
        for light in &lights {
            if light.light_type == LightType::Ies && light.ies_profile.is_none() {
                self.warnings.warn(
                    "lighting",
                    &light.name,
                    "IES light has no candela profile; treating it as an isotropic point light",
                );
            }
        }
        if self.config.atmosphere_sun {
            let sun = &self.atmosphere.state().sun;
            if sun.intensity > 0.0 {
                lights.push(
                    Light::directional(-sun.direction, sun.color, sun.intensity * SUN_ILLUMINANCE_LUX)
                        .named("sun")
                        .with_shadows(self.config.sun_casts_shadows),
                );
            }
        }
        lights
    }
}

/// Summed colour of the enabled sky lights, already scaled to radiance.
fn sky_fill(lights: &[Light], intensity_scale: f32) -> Vec3 {
    lights
        .iter()
        .filter(|l| l.enabled && l.light_type == LightType::Sky)
        .map(|l| l.color * l.intensity * intensity_scale)
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{SoftwareBackend, SoftwareLimits};
    use crate::camera::Camera;
    use crate::color::luminance;
    use crate::framebuffer::Attachment;
    use crate::post::Effect;
    use crate::scene::{Scene, SceneObject};
    use engine_core::Transform;
    use glam::{Quat, Vec4Swizzles};
    use std::f32::consts::FRAC_PI_4;

    const SIZE: u32 = 32;

    fn config() -> RendererConfig {
        RendererConfig {
            shadow_pool_size: 2,
            shadow_resolution: 64,
            atmosphere_sun: false,
            ..RendererConfig::default()
        }
        .with_size(SIZE, SIZE)
    }

    fn orchestrator(config: RendererConfig) -> RenderPassOrchestrator<SoftwareBackend> {
        RenderPassOrchestrator::new(SoftwareBackend::new(SoftwareLimits::default(), 3), config).unwrap()
    }

    fn camera() -> Camera {
        let mut camera = Camera::looking_at(Vec3::new(0.0, 3.0, 3.0), Vec3::ZERO);
        camera.set_aspect(SIZE, SIZE);
        camera
    }

    /// A gray quad tilted to face a 45-degree sun, seen head-on.
    fn lit_quad_scene(r: &mut RenderPassOrchestrator<SoftwareBackend>, shadows: bool) -> Scene {
        let mesh = r.upload_mesh(&MeshData::quad(2.0)).unwrap();
        let material = Material::new("gray")
            .with_albedo(Vec3::splat(0.8))
            .with_metallic_roughness(0.0, 0.5)
            .into_shared();
        let mut scene = Scene::new();
        scene.add_object(
            SceneObject::new("quad", mesh, material)
                .with_transform(Transform::from_position_rotation(Vec3::ZERO, Quat::from_rotation_x(-FRAC_PI_4))),
        );
        scene.add_light(
            Light::directional(Vec3::new(0.0, -1.0, -1.0), Vec3::ONE, 1000.0).with_shadows(shadows),
        );
        scene
    }

    fn center_pixel(r: &RenderPassOrchestrator<SoftwareBackend>) -> Vec3 {
        r.backend().last_frame().unwrap().get(SIZE / 2, SIZE / 2).xyz()
    }

    #[test]
    fn lit_quad_lands_between_black_and_white() {
        let mut r = orchestrator(config());
        let scene = lit_quad_scene(&mut r, true);
        r.render_scene(&scene, &camera()).unwrap();
        let lum = luminance(center_pixel(&r));
        assert!(lum > 0.0 && lum < 1.0, "{lum}");

        let stats = r.get_stats();
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.triangles, 2);
        assert_eq!(stats.lights_processed, 1);
        assert_eq!(stats.shadow_maps_rendered, 1);
    }

    #[test]
    fn quad_does_not_shadow_itself() {
        let mut shadowed = orchestrator(config());
        let scene = lit_quad_scene(&mut shadowed, true);
        shadowed.render_scene(&scene, &camera()).unwrap();

        let mut unshadowed = orchestrator(config());
        let scene = lit_quad_scene(&mut unshadowed, false);
        unshadowed.render_scene(&scene, &camera()).unwrap();

        let (a, b) = (center_pixel(&shadowed), center_pixel(&unshadowed));
        assert!((a - b).abs().max_element() < 1e-4, "{a} vs {b}");
    }

    #[test]
    fn resize_to_same_size_twice_does_not_leak() {
        let mut r = orchestrator(config());
        let live = r.backend().live_texture_count();
        r.resize(48, 40).unwrap();
        let first: Vec<_> = Attachment::ALL
            .iter()
            .map(|&a| r.backend().texture_desc(r.framebuffers().get(a)))
            .collect();
        r.resize(48, 40).unwrap();
        let second: Vec<_> = Attachment::ALL
            .iter()
            .map(|&a| r.backend().texture_desc(r.framebuffers().get(a)))
            .collect();
        assert_eq!(first, second);
        assert_eq!(r.backend().live_texture_count(), live);
        assert_eq!(r.framebuffers().size(), (48, 40));
    }

    #[test]
    fn failed_resize_keeps_previous_framebuffers() {
        let mut r = orchestrator(config());
        let live = r.backend().live_texture_count();
        let used = r.backend().used_bytes();
        r.backend_mut().set_limits(SoftwareLimits {
            memory_budget_bytes: used + 1024,
            ..SoftwareLimits::default()
        });

        let err = r.resize(256, 256).unwrap_err();
        assert!(matches!(err, RenderError::Resize { width: 256, height: 256, .. }));
        assert_eq!(r.framebuffers().size(), (SIZE, SIZE));
        assert_eq!(r.backend().live_texture_count(), live);
        assert_eq!(r.backend().used_bytes(), used);
        r.framebuffers().validate(r.backend()).unwrap();

        let scene = lit_quad_scene(&mut r, true);
        r.render_scene(&scene, &camera()).unwrap();
    }

    #[test]
    fn output_failure_rolls_back_the_new_targets() {
        let mut r = orchestrator(config());
        let live = r.backend().live_texture_count();
        let used = r.backend().used_bytes();
        r.backend_mut().set_limits(SoftwareLimits {
            max_output_dimension: SIZE,
            ..SoftwareLimits::default()
        });

        let err = r.resize(SIZE * 2, SIZE).unwrap_err();
        assert!(matches!(err, RenderError::Resize { .. }));
        assert_eq!(r.framebuffers().size(), (SIZE, SIZE));
        assert_eq!(r.backend().output_size(), (SIZE, SIZE));
        assert_eq!(r.backend().live_texture_count(), live);
        assert_eq!(r.backend().used_bytes(), used);
        r.framebuffers().validate(r.backend()).unwrap();
        assert_eq!((r.config().width, r.config().height), (SIZE, SIZE));
    }

    #[test]
    fn queued_atmosphere_time_applies_once_per_frame() {
        let mut r = orchestrator(config());
        r.atmosphere_mut().set_time_of_day(10.0);
        r.atmosphere_mut().set_time_scale(1.0);
        r.update_atmosphere(1800.0);
        r.update_atmosphere(1800.0);
        assert_eq!(r.atmosphere().state().time_of_day, 10.0);

        let scene = Scene::new();
        r.render_scene(&scene, &camera()).unwrap();
        assert!((r.atmosphere().state().time_of_day - 11.0).abs() < 1e-4);
        r.render_scene(&scene, &camera()).unwrap();
        assert!((r.atmosphere().state().time_of_day - 11.0).abs() < 1e-4);
    }

    #[test]
    fn zero_sized_resize_is_rejected() {
        let mut r = orchestrator(config());
        assert!(matches!(r.resize(0, 10), Err(RenderError::Resize { .. })));
        assert_eq!(r.framebuffers().size(), (SIZE, SIZE));
    }

    #[test]
    fn disabled_bloom_ignores_its_parameters() {
        let render = |intensity: f32, threshold: f32| {
            let mut r = orchestrator(config());
            r.set_effect_enabled("bloom", false).unwrap();
            r.set_post_process_option("bloom", "intensity", intensity).unwrap();
            r.set_post_process_option("bloom", "threshold", threshold).unwrap();
            let scene = lit_quad_scene(&mut r, true);
            r.render_scene(&scene, &camera()).unwrap();
            r.backend().last_frame().unwrap().clone()
        };
        assert_eq!(render(0.0, 1.0), render(5.0, 50.0));
    }

    #[test]
    fn rejected_options_leave_config_untouched() {
        let mut r = orchestrator(config());
        let before = r.post_config().clone();
        assert!(matches!(
            r.set_post_process_option("bloom", "intensity", 99.0),
            Err(RenderError::Configuration(_))
        ));
        assert!(r.set_post_process_option("warp_drive", "speed", 1.0).is_err());
        assert!(r.set_effect_enabled("warp_drive", true).is_err());
        assert_eq!(r.post_config(), &before);
        r.set_effect_enabled("taa", true).unwrap();
        assert!(r.post_config().is_enabled(Effect::Taa));
    }

    #[test]
    fn objects_behind_the_camera_are_culled_but_still_cast() {
        let mut r = orchestrator(config());
        let mut scene = lit_quad_scene(&mut r, true);
        let mesh = r.upload_mesh(&MeshData::cube()).unwrap();
        let material = Material::new("behind").into_shared();
        scene.add_object(
            SceneObject::new("behind", mesh, material).with_transform(Transform::from_position(Vec3::new(0.0, 6.0, 6.0))),
        );
        r.render_scene(&scene, &camera()).unwrap();
        let stats = r.get_stats();
        assert_eq!(stats.culled_objects, 1);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.shadow_draw_calls, 2);
    }

    #[test]
    fn invisible_and_meshless_objects_are_skipped() {
        let mut r = orchestrator(config());
        let mut scene = lit_quad_scene(&mut r, true);
        scene.objects[0].visible = false;
        scene.add_object(SceneObject {
            mesh: None,
            ..scene.objects[0].clone()
        });
        r.render_scene(&scene, &camera()).unwrap();
        let stats = r.get_stats();
        assert_eq!(stats.skipped_objects, 2);
        assert_eq!(stats.draw_calls, 0);
        assert_eq!(stats.triangles, 0);
    }

    #[test]
    fn lights_past_the_pool_render_unshadowed() {
        let mut r = orchestrator(config());
        let mut scene = lit_quad_scene(&mut r, true);
        for i in 0..3 {
            scene.add_light(Light::point(Vec3::new(i as f32, 2.0, 2.0), Vec3::ONE, 800.0).with_shadows(true));
        }
        r.render_scene(&scene, &camera()).unwrap();
        let stats = r.get_stats();
        assert_eq!(stats.lights_processed, 4);
        assert_eq!(stats.shadow_maps_rendered, 2);
    }

    #[test]
    fn frame_index_advances_and_sun_is_appended() {
        let mut r = orchestrator(RendererConfig {
            atmosphere_sun: true,
            ..config()
        });
        r.atmosphere_mut().set_time_of_day(12.0);
        let scene = Scene::new();
        r.render_scene(&scene, &camera()).unwrap();
        r.render_scene(&scene, &camera()).unwrap();
        let stats = r.get_stats();
        assert_eq!(stats.frame_index, 1);
        assert_eq!(stats.lights_processed, 1);
    }

    #[test]
    fn sky_lights_fill_ambient() {
        let lights = [Light::sky(Vec3::ONE, 500.0), Light::point(Vec3::ZERO, Vec3::ONE, 100.0)];
        assert_eq!(sky_fill(&lights, 0.001), Vec3::splat(0.5));
    }

    #[test]
    fn broken_shader_aborts_startup_naming_the_stage() {
        let shaders = ShaderLibrary::embedded().with_source("lighting", "fn broken(").unwrap();
        let result = RenderPassOrchestrator::with_shaders(
            SoftwareBackend::new(SoftwareLimits::default(), 3),
            config(),
            &shaders,
        );
        match result {
            Err(RenderError::Initialization { stage, .. }) => assert_eq!(stage, "lighting"),
            Err(other) => panic!("unexpected error {other}"),
            Ok(_) => panic!("startup should fail"),
        }
    }
}
