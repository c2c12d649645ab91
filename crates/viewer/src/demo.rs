//! Built-in showcase scene: a material grid on a ground plane under mixed lights.

use engine_core::Transform;
use glam::{Quat, Vec2, Vec3};
use renderer::{
    AmbientCube, Camera, ColorSpace, ImageBasedLighting, Light, Material, MeshData, RenderBackend,
    RenderPassOrchestrator, RenderResult, Scene, SceneObject, TextureData, TextureSlots, UvTransform,
};

const GRID: usize = 5;
const SPACING: f32 = 1.6;

/// Upload the demo meshes and assemble the scene.
pub fn build_scene<B: RenderBackend>(renderer: &mut RenderPassOrchestrator<B>) -> RenderResult<Scene> {
    let sphere = renderer.upload_mesh(&MeshData::sphere(0.6, 32, 16))?;
    let cube = renderer.upload_mesh(&MeshData::cube())?;
    let ground = renderer.upload_mesh(&MeshData::plane(24.0))?;

    let checker = renderer.upload_texture(&checker_texture(64, 8))?;

    let mut scene = Scene::new();
    let mut ground_material = Material::new("ground")
        .with_albedo(Vec3::new(0.45, 0.43, 0.4))
        .with_metallic_roughness(0.0, 0.9)
        .with_textures(TextureSlots {
            albedo: Some(checker),
            ..TextureSlots::default()
        });
    ground_material.uv = UvTransform {
        scale: Vec2::splat(6.0),
        offset: Vec2::ZERO,
    };
    let ground_material = ground_material.into_shared();
    scene.add_object(SceneObject::new("ground", ground, ground_material));

    // Metallic increases along x, roughness along z.
    let offset = (GRID as f32 - 1.0) * SPACING * 0.5;
    for row in 0..GRID {
        for col in 0..GRID {
            let metallic = col as f32 / (GRID - 1) as f32;
            let roughness = (row as f32 / (GRID - 1) as f32).max(0.05);
            let material = Material::new(format!("sphere_{row}_{col}"))
                .with_albedo(Vec3::new(0.9, 0.25, 0.2))
                .with_metallic_roughness(metallic, roughness)
                .into_shared();
            let position = Vec3::new(col as f32 * SPACING - offset, 0.6, row as f32 * SPACING - offset);
            scene.add_object(
                SceneObject::new(format!("sphere_{row}_{col}"), sphere, material)
                    .with_transform(Transform::from_position(position)),
            );
        }
    }

    let glowing = Material::new("emitter")
        .with_albedo(Vec3::splat(0.1))
        .with_emission(Vec3::new(1.0, 0.6, 0.2), 6.0)
        .into_shared();
    scene.add_object(
        SceneObject::new("emitter", cube, glowing).with_transform(
            Transform::from_position_rotation(Vec3::new(-6.0, 0.75, -2.0), Quat::from_rotation_y(0.6)).with_scale(1.5),
        ),
    );

    scene.add_light(
        Light::point(Vec3::new(3.0, 3.0, 3.0), Vec3::ONE, 60_000.0)
            .named("warm_point")
            .with_temperature(3200.0)
            .with_range(15.0),
    );
    scene.add_light(
        Light::spot(Vec3::new(-4.0, 6.0, 4.0), Vec3::new(0.6, -1.0, -0.6), Vec3::ONE, 120_000.0)
            .named("key_spot")
            .with_spot_angles(20.0, 30.0)
            .with_range(20.0),
    );
    scene.add_light(Light::sky(Vec3::new(0.5, 0.6, 0.8), 40.0).named("sky_fill"));

    Ok(scene)
}

/// Two-tone sRGB checkerboard with `cells` squares per side.
fn checker_texture(size: u32, cells: u32) -> TextureData {
    let cell = (size / cells.max(1)).max(1);
    let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
    for y in 0..size {
        for x in 0..size {
            let light = ((x / cell) + (y / cell)) % 2 == 0;
            let v = if light { 235 } else { 140 };
            pixels.extend_from_slice(&[v, v, v, 255]);
        }
    }
    TextureData {
        label: String::from("ground_checker"),
        width: size,
        height: size,
        pixels,
        color_space: ColorSpace::Srgb,
    }
}

/// Soft outdoor ambient used when the demo enables image-based lighting.
pub fn outdoor_ibl() -> ImageBasedLighting {
    ImageBasedLighting {
        irradiance: AmbientCube::gradient(Vec3::new(0.12, 0.16, 0.22), Vec3::splat(0.1), Vec3::splat(0.04)),
        specular: AmbientCube::gradient(Vec3::new(0.3, 0.4, 0.55), Vec3::splat(0.2), Vec3::splat(0.05)),
        intensity: 1.0,
    }
}

/// Camera orbiting the grid at `angle` radians.
pub fn orbit_camera(angle: f32, width: u32, height: u32) -> Camera {
    let eye = Vec3::new(angle.sin() * 11.0, 5.5, angle.cos() * 11.0);
    let mut camera = Camera::looking_at(eye, Vec3::new(0.0, 0.5, 0.0));
    camera.set_aspect(width, height);
    camera
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::{RendererConfig, SoftwareBackend, SoftwareLimits};

    #[test]
    fn demo_scene_renders_on_the_software_backend() {
        let config = RendererConfig {
            shadow_resolution: 64,
            ..RendererConfig::default()
        }
        .with_size(48, 32);
        let mut renderer =
            RenderPassOrchestrator::new(SoftwareBackend::new(SoftwareLimits::default(), 1), config).unwrap();
        let scene = build_scene(&mut renderer).unwrap();
        renderer.set_image_based_lighting(Some(outdoor_ibl()));
        renderer.render_scene(&scene, &orbit_camera(0.3, 48, 32)).unwrap();

        let stats = renderer.get_stats();
        assert_eq!(stats.draw_calls + stats.culled_objects, scene.objects.len() as u32);
        assert!(stats.triangles > 0);
        assert!(renderer.backend().last_frame_rgba8().is_some());
    }

    #[test]
    fn checker_alternates_cells() {
        let texture = checker_texture(8, 4);
        assert!(texture.is_well_formed());
        let texel = |x: usize, y: usize| texture.pixels[(y * 8 + x) * 4];
        assert_ne!(texel(0, 0), texel(2, 0));
        assert_eq!(texel(0, 0), texel(2, 2));
    }
}
