//! CPU reference backend.
//!
//! Runs every pass on [`HdrImage`]s with the same formulas the WGSL passes use,
//! so headless runs and tests exercise the full deferred pipeline without a
//! device. Texture memory is accounted against [`SoftwareLimits`] so allocation
//! failures can be reproduced deterministically.

use super::raster::{rasterize_triangle, ClipVertex};
use super::{DrawItem, FrameContext, RenderBackend};
use crate::color::srgb_to_linear;
use crate::debug::{debug_color, DebugTexels};
use crate::diagnostics::WarnOnce;
use crate::error::{RenderError, RenderResult};
use crate::framebuffer::{Attachment, FramebufferSet};
use crate::image::HdrImage;
use crate::lighting::{shade, PcfShadows, ShadedLight, SurfaceSample};
use crate::material::Material;
use crate::mesh::MeshData;
use crate::post::{GBufferView, PostFrame, PostProcessChain};
use crate::resources::{ColorSpace, MeshHandle, TargetFormat, TextureData, TextureDesc, TextureHandle};
use crate::shaders::ShaderLibrary;
use crate::shadow::DepthLookup;
use engine_core::transform::normal_matrix;
use glam::{Mat3, Vec2, Vec3, Vec4, Vec4Swizzles};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoftwareLimits {
    pub max_texture_dimension: u32,
    /// Total bytes all live textures may occupy.
    pub memory_budget_bytes: u64,
    /// Largest presentable output, like a surface's maximum extent.
    pub max_output_dimension: u32,
}

impl Default for SoftwareLimits {
    fn default() -> Self {
        Self {
            max_texture_dimension: 8192,
            memory_budget_bytes: 2 << 30,
            max_output_dimension: 8192,
        }
    }
}

/// Layered depth storage. Layers are allocated on first write and read as 1.0 until then.
#[derive(Debug, Clone)]
struct DepthLayers {
    width: u32,
    height: u32,
    layers: Vec<Option<Vec<f32>>>,
}

impl DepthLayers {
    fn new(width: u32, height: u32, layers: u32) -> Self {
        Self {
            width,
            height,
            layers: vec![None; layers as usize],
        }
    }
}

impl DepthLookup for DepthLayers {
    fn resolution(&self) -> u32 {
        self.width
    }

    fn depth_at(&self, layer: u32, x: i32, y: i32) -> f32 {
        let Some(Some(texels)) = self.layers.get(layer as usize) else {
            return 1.0;
        };
        let x = x.clamp(0, self.width as i32 - 1) as usize;
        let y = y.clamp(0, self.height as i32 - 1) as usize;
        texels[y * self.width as usize + x]
    }
}

#[derive(Debug, Clone)]
enum Texels {
    Color(HdrImage),
    Depth(DepthLayers),
}

#[derive(Debug, Clone)]
struct SoftTexture {
    desc: TextureDesc,
    texels: Texels,
}

/// Material maps resolved for one draw.
struct MaterialMaps<'a> {
    albedo: &'a HdrImage,
    normal: &'a HdrImage,
    metallic: &'a HdrImage,
    roughness: &'a HdrImage,
    ao: &'a HdrImage,
    emission: &'a HdrImage,
}

/// Bilinear fetch with repeat addressing.
fn sample_repeat(image: &HdrImage, uv: Vec2) -> Vec4 {
    image.sample_bilinear(uv - uv.floor())
}

fn decode_texture(data: &TextureData) -> HdrImage {
    let decode = |c: u8| match data.color_space {
        ColorSpace::Srgb => srgb_to_linear(c as f32 / 255.0),
        ColorSpace::Linear => c as f32 / 255.0,
    };
    HdrImage::from_fn(data.width, data.height, |x, y| {
        let i = (y as usize * data.width as usize + x as usize) * 4;
        let px = &data.pixels[i..i + 4];
        Vec4::new(decode(px[0]), decode(px[1]), decode(px[2]), px[3] as f32 / 255.0)
    })
}

fn color_of<'a>(
    textures: &'a HashMap<TextureHandle, SoftTexture>,
    stage: &str,
    handle: TextureHandle,
) -> RenderResult<&'a HdrImage> {
    match textures.get(&handle).map(|t| &t.texels) {
        Some(Texels::Color(image)) => Ok(image),
        Some(Texels::Depth(_)) => Err(RenderError::frame_aborted(stage, format!("{handle} is a depth texture"))),
        None => Err(RenderError::frame_aborted(stage, format!("{handle} does not exist"))),
    }
}

/// Tangent and bitangent of a triangle from its positions and UVs.
fn triangle_tangents(v: &[ClipVertex; 3]) -> Option<(Vec3, Vec3)> {
    let (e1, e2) = (v[1].world - v[0].world, v[2].world - v[0].world);
    let (d1, d2) = (v[1].uv - v[0].uv, v[2].uv - v[0].uv);
    let det = d1.x * d2.y - d2.x * d1.y;
    if det.abs() <= 1e-12 {
        return None;
    }
    let t = (e1 * d2.y - e2 * d1.y) / det;
    let b = (e2 * d1.x - e1 * d2.x) / det;
    Some((t, b))
}

fn perturb_normal(n: Vec3, tangents: (Vec3, Vec3), sampled: Vec3) -> Vec3 {
    let t = (tangents.0 - n * n.dot(tangents.0)).normalize_or_zero();
    let b = (tangents.1 - n * n.dot(tangents.1) - t * t.dot(tangents.1)).normalize_or_zero();
    let tbn = Mat3::from_cols(t, b, n);
    (tbn * (sampled * 2.0 - Vec3::ONE)).try_normalize().unwrap_or(n)
}

pub struct SoftwareBackend {
    limits: SoftwareLimits,
    textures: HashMap<TextureHandle, SoftTexture>,
    meshes: HashMap<MeshHandle, MeshData>,
    next_texture: u32,
    next_mesh: u32,
    used_bytes: u64,
    compiled: bool,
    chain: PostProcessChain,
    output_size: (u32, u32),
    last_frame: Option<HdrImage>,
    white: HdrImage,
    warnings: WarnOnce,
}

impl SoftwareBackend {
    pub fn new(limits: SoftwareLimits, post_seed: u64) -> Self {
        Self {
            limits,
            textures: HashMap::new(),
            meshes: HashMap::new(),
            next_texture: 1,
            next_mesh: 1,
            used_bytes: 0,
            compiled: false,
            chain: PostProcessChain::new(post_seed),
            output_size: (0, 0),
            last_frame: None,
            white: HdrImage::filled(1, 1, Vec4::ONE),
            warnings: WarnOnce::default(),
        }
    }

    /// Bytes currently held by live textures.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn limits(&self) -> SoftwareLimits {
        self.limits
    }

    /// Tighten or relax the budget; existing textures are kept.
    pub fn set_limits(&mut self, limits: SoftwareLimits) {
        self.limits = limits;
    }

    pub fn output_size(&self) -> (u32, u32) {
        self.output_size
    }

    /// The last presented frame, display-referred in [0, 1].
    pub fn last_frame(&self) -> Option<&HdrImage> {
        self.last_frame.as_ref()
    }

    /// The last presented frame as tightly packed RGBA8.
    pub fn last_frame_rgba8(&self) -> Option<Vec<u8>> {
        let frame = self.last_frame.as_ref()?;
        Some(
            frame
                .pixels()
                .iter()
                .flat_map(|c| c.to_array().map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8))
                .collect(),
        )
    }

    /// Read back a colour target, e.g. a G-buffer attachment.
    pub fn read_color(&self, handle: TextureHandle) -> Option<&HdrImage> {
        match &self.textures.get(&handle)?.texels {
            Texels::Color(image) => Some(image),
            Texels::Depth(_) => None,
        }
    }

    fn allocate(&mut self, desc: TextureDesc, texels: Texels) -> RenderResult<TextureHandle> {
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(RenderError::allocation(&desc.label, "zero-sized texture"));
        }
        let max = self.limits.max_texture_dimension;
        if desc.width > max || desc.height > max {
            return Err(RenderError::allocation(
                &desc.label,
                format!("{}x{} exceeds the {max} texel limit", desc.width, desc.height),
            ));
        }
        let bytes = desc.byte_size();
        if self.used_bytes + bytes > self.limits.memory_budget_bytes {
            return Err(RenderError::allocation(
                &desc.label,
                format!(
                    "out of memory: {bytes} bytes requested, {} of {} in use",
                    self.used_bytes, self.limits.memory_budget_bytes
                ),
            ));
        }
        let handle = TextureHandle::from_raw(self.next_texture);
        self.next_texture += 1;
        self.used_bytes += bytes;
        self.textures.insert(handle, SoftTexture { desc, texels });
        Ok(handle)
    }

    fn color(&self, stage: &str, handle: TextureHandle) -> RenderResult<&HdrImage> {
        color_of(&self.textures, stage, handle)
    }

    fn replace_texels(&mut self, stage: &str, handle: TextureHandle, texels: Texels) -> RenderResult<()> {
        let texture = self
            .textures
            .get_mut(&handle)
            .ok_or_else(|| RenderError::frame_aborted(stage, format!("{handle} does not exist")))?;
        texture.texels = texels;
        Ok(())
    }

    fn take_depth(&mut self, stage: &str, handle: TextureHandle) -> RenderResult<DepthLayers> {
        let texture = self
            .textures
            .get_mut(&handle)
            .ok_or_else(|| RenderError::frame_aborted(stage, format!("{handle} does not exist")))?;
        match &mut texture.texels {
            Texels::Depth(layers) => Ok(std::mem::replace(layers, DepthLayers::new(0, 0, 0))),
            Texels::Color(_) => Err(RenderError::frame_aborted(stage, format!("{handle} is not a depth texture"))),
        }
    }

    fn ensure_compiled(&self, stage: &str) -> RenderResult<()> {
        if self.compiled {
            Ok(())
        } else {
            Err(RenderError::frame_aborted(stage, "shaders were never compiled"))
        }
    }

    fn material_maps<'a>(
        textures: &'a HashMap<TextureHandle, SoftTexture>,
        warnings: &mut WarnOnce,
        white: &'a HdrImage,
        frame: &FrameContext<'_>,
        material: &Material,
    ) -> MaterialMaps<'a> {
        let lookup = |handle: TextureHandle| match textures.get(&handle).map(|t| &t.texels) {
            Some(Texels::Color(image)) => Some(image),
            _ => None,
        };
        let defaults = frame.defaults;
        let mut resolve = |slot: &'static str, handle: Option<TextureHandle>, fallback: TextureHandle| {
            if let Some(handle) = handle {
                if let Some(image) = lookup(handle) {
                    return image;
                }
                warnings.warn(
                    "geometry",
                    &format!("{}/{slot}", material.name),
                    format_args!("{handle} is not loaded; using the default map"),
                );
            }
            lookup(fallback).unwrap_or(white)
        };
        let slots = &material.textures;
        MaterialMaps {
            albedo: resolve("albedo", slots.albedo, defaults.white),
            normal: resolve("normal", slots.normal, defaults.flat_normal),
            metallic: resolve("metallic", slots.metallic, defaults.white),
            roughness: resolve("roughness", slots.roughness, defaults.white),
            ao: resolve("ao", slots.ao, defaults.white),
            emission: resolve("emission", slots.emission, defaults.white),
        }
    }
}

impl RenderBackend for SoftwareBackend {
    fn name(&self) -> &'static str {
        "software"
    }

    fn compile_shaders(&mut self, library: &ShaderLibrary) -> RenderResult<()> {
        library.validate()?;
        self.compiled = true;
        log::debug!("software backend validated {} shader stages", library.keys().count());
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> RenderResult<TextureHandle> {
        let texels = if desc.format.is_depth() {
            Texels::Depth(DepthLayers::new(desc.width, desc.height, desc.layers))
        } else {
            Texels::Color(HdrImage::new(desc.width, desc.height))
        };
        self.allocate(desc.clone(), texels)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if let Some(texture) = self.textures.remove(&handle) {
            self.used_bytes -= texture.desc.byte_size();
        }
    }

    fn texture_desc(&self, handle: TextureHandle) -> Option<TextureDesc> {
        self.textures.get(&handle).map(|t| t.desc.clone())
    }

    fn live_texture_count(&self) -> usize {
        self.textures.len()
    }

    fn upload_mesh(&mut self, mesh: &MeshData) -> RenderResult<MeshHandle> {
        if !mesh.is_well_formed() {
            return Err(RenderError::allocation(
                "mesh",
                format!(
                    "{} vertices with {} indices is not an indexed triangle list",
                    mesh.vertices.len(),
                    mesh.indices.len()
                ),
            ));
        }
        let handle = MeshHandle::from_raw(self.next_mesh);
        self.next_mesh += 1;
        self.meshes.insert(handle, mesh.clone());
        Ok(handle)
    }

    fn upload_texture(&mut self, data: &TextureData) -> RenderResult<TextureHandle> {
        if !data.is_well_formed() {
            return Err(RenderError::allocation(&data.label, "pixel data does not match its size"));
        }
        let desc = TextureDesc::target(&data.label, data.width, data.height, TargetFormat::Rgba8Unorm);
        self.allocate(desc, Texels::Color(decode_texture(data)))
    }

    fn configure_output(&mut self, width: u32, height: u32) -> RenderResult<()> {
        let max = self.limits.max_output_dimension;
        if width > max || height > max {
            return Err(RenderError::allocation(
                "output",
                format!("{width}x{height} exceeds the {max} pixel output limit"),
            ));
        }
        self.output_size = (width, height);
        self.last_frame = None;
        Ok(())
    }

    fn reset_history(&mut self) {
        self.chain.reset_history();
    }

    fn prepare_frame(&mut self, frame: &FrameContext<'_>) -> RenderResult<()> {
        self.ensure_compiled("prepare")?;
        if frame.size != self.output_size {
            log::debug!("software output is {:?}, frame is {:?}", self.output_size, frame.size);
        }
        Ok(())
    }

    fn geometry_pass(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet, draws: &[DrawItem]) -> RenderResult<()> {
        self.ensure_compiled("geometry")?;
        let (width, height) = targets.size();
        let mut position = HdrImage::new(width, height);
        let mut normal = HdrImage::new(width, height);
        let mut albedo_metallic = HdrImage::new(width, height);
        let mut emission_ao = HdrImage::new(width, height);
        let mut depth = vec![1.0f32; width as usize * height as usize];
        let view_projection = frame.camera.view_projection;

        for draw in draws {
            let Some(mesh) = self.meshes.get(&draw.mesh) else {
                self.warnings
                    .warn("geometry", &format!("object {}", draw.object), "mesh is not uploaded; skipping");
                continue;
            };
            let material = draw.material.as_ref();
            let maps = Self::material_maps(&self.textures, &mut self.warnings, &self.white, frame, material);
            let has_normal_map = material.textures.normal.is_some();
            let normal_to_world = normal_matrix(&draw.model);

            for tri in mesh.indices.chunks_exact(3) {
                let corners = [0, 1, 2].map(|k| {
                    let v = &mesh.vertices[tri[k] as usize];
                    let world = draw.model * Vec3::from(v.position).extend(1.0);
                    ClipVertex {
                        clip: view_projection * world,
                        world: world.xyz(),
                        normal: normal_to_world * Vec3::from(v.normal),
                        uv: material.uv.apply(Vec2::from(v.tex_coords)),
                        color: Vec4::from(v.color),
                    }
                });
                let tangents = if has_normal_map { triangle_tangents(&corners) } else { None };

                rasterize_triangle(&corners, width, height, |f| {
                    let a = &f.attributes;
                    let albedo = material.albedo.extend(material.alpha) * sample_repeat(maps.albedo, a.uv) * a.color;
                    if !material.keeps_fragment(albedo.w) {
                        return;
                    }
                    if !f.front_facing && !material.two_sided {
                        return;
                    }
                    let i = f.y as usize * width as usize + f.x as usize;
                    if f.depth >= depth[i] {
                        return;
                    }
                    depth[i] = f.depth;

                    let mut n = a.normal.try_normalize().unwrap_or(Vec3::Y);
                    if let Some(tangents) = tangents {
                        n = perturb_normal(n, tangents, sample_repeat(maps.normal, a.uv).xyz());
                    }
                    if !f.front_facing {
                        n = -n;
                    }
                    let metallic = material.metallic * sample_repeat(maps.metallic, a.uv).x;
                    let roughness = material.roughness * sample_repeat(maps.roughness, a.uv).x;
                    let ao = material.ao * sample_repeat(maps.ao, a.uv).x;
                    let emission = material.emissive_radiance() * sample_repeat(maps.emission, a.uv).xyz();

                    position.set(f.x, f.y, a.world.extend(1.0));
                    normal.set(f.x, f.y, n.extend(roughness.clamp(0.04, 1.0)));
                    albedo_metallic.set(
                        f.x,
                        f.y,
                        albedo.xyz().clamp(Vec3::ZERO, Vec3::ONE).extend(metallic.clamp(0.0, 1.0)),
                    );
                    emission_ao.set(f.x, f.y, emission.extend(ao));
                });
            }
        }

        let mut depth_layers = DepthLayers::new(width, height, 1);
        depth_layers.layers[0] = Some(depth);
        self.replace_texels("geometry", targets.get(Attachment::Position), Texels::Color(position))?;
        self.replace_texels("geometry", targets.get(Attachment::Normal), Texels::Color(normal))?;
        self.replace_texels("geometry", targets.get(Attachment::AlbedoMetallic), Texels::Color(albedo_metallic))?;
        self.replace_texels("geometry", targets.get(Attachment::EmissionAo), Texels::Color(emission_ao))?;
        self.replace_texels("geometry", targets.get(Attachment::Depth), Texels::Depth(depth_layers))
    }

    fn shadow_pass(&mut self, frame: &FrameContext<'_>, atlas: TextureHandle, casters: &[DrawItem]) -> RenderResult<()> {
        self.ensure_compiled("shadow")?;
        let mut layers = self.take_depth("shadow", atlas)?;
        let resolution = layers.width;
        let mut result = Ok(());

        'assignments: for assignment in &frame.shadows.assignments {
            for (face, light_view_proj) in assignment.projection.matrices().iter().enumerate() {
                let layer = assignment.slot as usize * 6 + face;
                if layer >= layers.layers.len() {
                    result = Err(RenderError::frame_aborted(
                        "shadow",
                        format!("slot {} face {face} is outside the atlas", assignment.slot),
                    ));
                    break 'assignments;
                }
                let mut texels = vec![1.0f32; resolution as usize * resolution as usize];
                for caster in casters {
                    let Some(mesh) = self.meshes.get(&caster.mesh) else {
                        continue;
                    };
                    let to_clip = *light_view_proj * caster.model;
                    for tri in mesh.indices.chunks_exact(3) {
                        let corners = [0, 1, 2].map(|k| {
                            let p = Vec3::from(mesh.vertices[tri[k] as usize].position);
                            ClipVertex::at(to_clip * p.extend(1.0))
                        });
                        rasterize_triangle(&corners, resolution, resolution, |f| {
                            let i = f.y as usize * resolution as usize + f.x as usize;
                            if f.depth < texels[i] {
                                texels[i] = f.depth;
                            }
                        });
                    }
                }
                layers.layers[layer] = Some(texels);
            }
        }

        self.replace_texels("shadow", atlas, Texels::Depth(layers))?;
        result
    }

    fn lighting_pass(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet, atlas: TextureHandle) -> RenderResult<()> {
        self.ensure_compiled("lighting")?;
        let position = self.color("lighting", targets.get(Attachment::Position))?;
        let normal = self.color("lighting", targets.get(Attachment::Normal))?;
        let albedo_metallic = self.color("lighting", targets.get(Attachment::AlbedoMetallic))?;
        let emission_ao = self.color("lighting", targets.get(Attachment::EmissionAo))?;
        let shadow_map = match self.textures.get(&atlas).map(|t| &t.texels) {
            Some(Texels::Depth(layers)) => layers,
            _ => return Err(RenderError::frame_aborted("lighting", format!("shadow atlas {atlas} is missing"))),
        };

        let lights: Vec<ShadedLight<'_>> = frame
            .lights
            .iter()
            .enumerate()
            .map(|(index, light)| ShadedLight {
                light,
                shadow: frame.shadows.for_light(index),
            })
            .collect();
        let shadows = PcfShadows { map: shadow_map };
        let eye = frame.camera.position;

        let hdr = position.map(|x, y, p| {
            if p.w < 0.5 {
                return Vec4::ZERO;
            }
            let n = normal.get(x, y);
            let am = albedo_metallic.get(x, y);
            let ea = emission_ao.get(x, y);
            let surface = SurfaceSample {
                position: p.xyz(),
                normal: n.xyz().try_normalize().unwrap_or(Vec3::Y),
                albedo: am.xyz(),
                metallic: am.w,
                roughness: n.w,
                ao: ea.w,
                emission: ea.xyz(),
            };
            let lit = shade(&surface, eye, &lights, &shadows, frame.environment);
            frame.atmosphere.apply_fog(lit, surface.position, eye).extend(1.0)
        });
        self.replace_texels("lighting", targets.get(Attachment::Hdr), Texels::Color(hdr))
    }

    fn skybox_pass(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet) -> RenderResult<()> {
        self.ensure_compiled("skybox")?;
        let position = self.color("skybox", targets.get(Attachment::Position))?;
        let hdr = self.color("skybox", targets.get(Attachment::Hdr))?;
        let inverse = frame.camera.inverse_view_projection;
        let eye = frame.camera.position;
        let with_sky = hdr.map(|x, y, c| {
            if position.get(x, y).w >= 0.5 {
                return c;
            }
            let uv = hdr.uv(x, y);
            let far = inverse * Vec4::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 1.0, 1.0);
            let world = far.xyz() / far.w;
            frame.atmosphere.sky_radiance(world - eye).extend(1.0)
        });
        self.replace_texels("skybox", targets.get(Attachment::Hdr), Texels::Color(with_sky))
    }

    fn post_process(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet) -> RenderResult<TextureHandle> {
        self.ensure_compiled("post")?;
        let hdr = color_of(&self.textures, "post", targets.get(Attachment::Hdr))?;
        let gbuffer = GBufferView {
            position: color_of(&self.textures, "post", targets.get(Attachment::Position))?,
            normal: color_of(&self.textures, "post", targets.get(Attachment::Normal))?,
        };
        let post_frame = PostFrame {
            camera: frame.camera,
            frame_index: frame.frame_index,
        };
        let output = self.chain.apply_effects(hdr, gbuffer, &post_frame, frame.post);
        let target = targets.get(Attachment::PostA);
        self.replace_texels("post", target, Texels::Color(output))?;
        Ok(target)
    }

    fn present(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet, image: TextureHandle) -> RenderResult<()> {
        let final_image = self.color("present", image)?;
        let position = self.color("present", targets.get(Attachment::Position))?;
        let normal = self.color("present", targets.get(Attachment::Normal))?;
        let albedo_metallic = self.color("present", targets.get(Attachment::AlbedoMetallic))?;
        let emission_ao = self.color("present", targets.get(Attachment::EmissionAo))?;
        let eye = frame.camera.position;
        let shown = final_image.map(|x, y, c| {
            let texels = DebugTexels {
                position: position.get(x, y),
                normal: normal.get(x, y),
                albedo_metallic: albedo_metallic.get(x, y),
                emission_ao: emission_ao.get(x, y),
            };
            debug_color(frame.debug_view, c, &texels, eye).extend(1.0)
        });
        self.last_frame = Some(shown);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend(budget: u64) -> SoftwareBackend {
        SoftwareBackend::new(
            SoftwareLimits {
                max_texture_dimension: 4096,
                memory_budget_bytes: budget,
                ..SoftwareLimits::default()
            },
            1,
        )
    }

    #[test]
    fn budget_is_enforced_and_released() {
        let mut backend = backend(1024);
        let desc = TextureDesc::target("a", 8, 8, TargetFormat::Rgba16Float);
        let a = backend.create_texture(&desc).unwrap();
        assert_eq!(backend.used_bytes(), 512);
        let b = backend.create_texture(&desc).unwrap();
        assert!(matches!(backend.create_texture(&desc), Err(RenderError::Allocation { .. })));
        backend.destroy_texture(a);
        backend.destroy_texture(b);
        assert_eq!(backend.used_bytes(), 0);
        assert_eq!(backend.live_texture_count(), 0);
    }

    #[test]
    fn oversized_textures_are_rejected() {
        let mut backend = backend(u64::MAX);
        let desc = TextureDesc::target("huge", 5000, 4, TargetFormat::Rgba8Unorm);
        assert!(backend.create_texture(&desc).is_err());
    }

    #[test]
    fn oversized_output_keeps_the_previous_size() {
        let mut backend = backend(u64::MAX);
        backend.configure_output(64, 48).unwrap();
        let max = backend.limits().max_output_dimension;
        assert!(backend.configure_output(max + 1, 48).is_err());
        assert_eq!(backend.output_size(), (64, 48));
    }

    #[test]
    fn srgb_uploads_are_linearized() {
        let mut backend = backend(u64::MAX);
        let srgb = backend
            .upload_texture(&TextureData::solid("s", [128, 128, 128, 255], ColorSpace::Srgb))
            .unwrap();
        let linear = backend
            .upload_texture(&TextureData::solid("l", [128, 128, 128, 255], ColorSpace::Linear))
            .unwrap();
        let s = backend.read_color(srgb).unwrap().get(0, 0).x;
        let l = backend.read_color(linear).unwrap().get(0, 0).x;
        assert!((l - 128.0 / 255.0).abs() < 1e-6);
        assert!(s < l && s > 0.2);
    }

    #[test]
    fn malformed_meshes_are_rejected() {
        let mut backend = backend(u64::MAX);
        let mut mesh = MeshData::quad(1.0);
        mesh.indices.push(99);
        assert!(backend.upload_mesh(&mesh).is_err());
        assert!(backend.upload_mesh(&MeshData::quad(1.0)).is_ok());
    }

    #[test]
    fn unwritten_depth_layers_read_far() {
        let layers = DepthLayers::new(4, 4, 6);
        assert_eq!(layers.depth_at(3, 1, 1), 1.0);
        assert_eq!(layers.depth_at(40, 1, 1), 1.0);
    }

    #[test]
    fn passes_require_compiled_shaders() {
        let mut backend = backend(u64::MAX);
        let targets = FramebufferSet::create(&mut backend, 4, 4).unwrap();
        let camera = crate::camera::Camera::looking_at(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO);
        let matrices = crate::camera::CameraMatrices::from_view(&camera, None);
        let atmosphere = crate::atmosphere::Atmosphere::new(1);
        let state = atmosphere.state().clone();
        let environment = crate::lighting::LightingEnvironment {
            ambient: crate::lighting::Ambient::Flat(Vec3::splat(0.03)),
            sky_fill: Vec3::ZERO,
            intensity_scale: 0.001,
        };
        let shadows = crate::shadow::ShadowAllocation::default();
        let post = crate::post::PostProcessConfig::default();
        let plan = crate::post::plan(&post, false);
        let defaults = crate::material::DefaultResources {
            material: Material::default().into_shared(),
            white: TextureHandle::from_raw(0),
            flat_normal: TextureHandle::from_raw(0),
        };
        let frame = FrameContext {
            camera: matrices,
            size: (4, 4),
            frame_index: 0,
            atmosphere: &state,
            environment: &environment,
            lights: &[],
            shadows: &shadows,
            post: &post,
            plan: &plan,
            defaults: &defaults,
            debug_view: crate::debug::DebugView::Final,
        };
        assert!(matches!(
            backend.geometry_pass(&frame, &targets, &[]),
            Err(RenderError::FrameAborted { .. })
        ));
        backend.compile_shaders(&ShaderLibrary::embedded()).unwrap();
        backend.geometry_pass(&frame, &targets, &[]).unwrap();
        let position = backend.read_color(targets.get(Attachment::Position)).unwrap();
        assert!(position.pixels().iter().all(|p| p.w == 0.0));
    }
}
