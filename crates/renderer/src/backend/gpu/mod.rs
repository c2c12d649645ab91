//! wgpu backend: G-buffer, shadow atlas, deferred lighting and the post chain on the GPU.

mod buffers;
pub mod pipelines;

use self::buffers::{dynamic_offset, DynamicUniforms, StorageBuffer};
use self::pipelines::{create_pipelines, EffectEntry, Layouts, Pipelines};
use super::{DrawItem, FrameContext, RenderBackend};
use crate::brdf::build_brdf_lut;
use crate::diagnostics::WarnOnce;
use crate::error::{RenderError, RenderResult};
use crate::framebuffer::{Attachment, FramebufferSet};
use crate::material::Material;
use crate::mesh::MeshData;
use crate::post::ssao::{generate_kernel, generate_noise, MAX_KERNEL_SIZE, NOISE_DIM};
use crate::post::{AntiAliasing, Effect, PostStage};
use crate::resources::{ColorSpace, MeshHandle, TargetFormat, TextureData, TextureDesc, TextureHandle};
use crate::shaders::ShaderLibrary;
use crate::uniforms::{
    BlurUniform, CameraUniform, GpuLight, LightingUniform, ObjectUniform, PostUniform, ShadowPassUniform,
    SsaoKernelUniform,
};
use bytemuck::Zeroable;
use glam::Mat4;
use half::f16;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::Arc;
use wgpu::util::DeviceExt;
use winit::window::Window;

const BRDF_LUT_SIZE: u32 = 32;

struct GpuTexture {
    desc: TextureDesc,
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct GpuMesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

/// Temporal AA history, sized to the framebuffer.
struct History {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    size: (u32, u32),
    valid: bool,
}

fn f16_bytes(values: impl IntoIterator<Item = f32>) -> Vec<u8> {
    values.into_iter().flat_map(|v| f16::from_f32(v).to_le_bytes()).collect()
}

fn uniform_buffer<T: bytemuck::Pod>(device: &wgpu::Device, label: &str, value: &T) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some(label),
        contents: bytemuck::bytes_of(value),
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
    })
}

fn clear_pass<'e>(
    encoder: &'e mut wgpu::CommandEncoder,
    label: &str,
    view: &wgpu::TextureView,
) -> wgpu::RenderPass<'e> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}

/// One fullscreen triangle into `target`.
fn fullscreen(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    pipeline: &wgpu::RenderPipeline,
    target: &wgpu::TextureView,
    groups: &[&wgpu::BindGroup],
) {
    let mut pass = clear_pass(encoder, label, target);
    pass.set_pipeline(pipeline);
    for (index, group) in groups.iter().enumerate() {
        pass.set_bind_group(index as u32, *group, &[]);
    }
    pass.draw(0..3, 0..1);
    drop(pass);
}

pub struct GpuBackend {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
    window: Arc<Window>,

    layouts: Layouts,
    pipelines: Option<Pipelines>,

    textures: HashMap<TextureHandle, GpuTexture>,
    meshes: HashMap<MeshHandle, GpuMesh>,
    next_texture: u32,
    next_mesh: u32,
    material_groups: HashMap<[TextureHandle; 6], wgpu::BindGroup>,
    warnings: WarnOnce,

    linear_sampler: wgpu::Sampler,
    material_sampler: wgpu::Sampler,

    camera_buffer: wgpu::Buffer,
    lighting_buffer: wgpu::Buffer,
    atmosphere_buffer: wgpu::Buffer,
    post_buffer: wgpu::Buffer,
    blur_uniform_h: wgpu::Buffer,
    blur_uniform_v: wgpu::Buffer,
    dof_blur_h: wgpu::Buffer,
    dof_blur_v: wgpu::Buffer,
    camera_bind_group: wgpu::BindGroup,
    sky_bind_group: wgpu::BindGroup,
    post_frame_bind_group: wgpu::BindGroup,

    lights: StorageBuffer,
    shadow_matrices: StorageBuffer,
    objects: DynamicUniforms<ObjectUniform>,
    casters: DynamicUniforms<ObjectUniform>,
    shadow_layers: DynamicUniforms<ShadowPassUniform>,

    brdf_lut_view: wgpu::TextureView,
    noise_view: wgpu::TextureView,
    history: Option<History>,
}

impl GpuBackend {
    /// Create the device and surface for `window`. Shaders are compiled separately.
    pub async fn new(window: Arc<Window>, post_seed: u64) -> RenderResult<Self> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(window.clone())
            .map_err(|e| RenderError::initialization("surface", e.to_string()))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| RenderError::initialization("adapter", "no suitable GPU adapter"))?;

        log::info!("Using GPU: {:?} ({:?})", adapter.get_info().name, adapter.get_info().backend);

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("Renderer Device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                    memory_hints: Default::default(),
                },
                None,
            )
            .await
            .map_err(|e| RenderError::initialization("device", e.to_string()))?;

        // Tone mapping applies gamma itself, so a linear surface avoids a second encode.
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| !f.is_srgb())
            .or_else(|| surface_caps.formats.first())
            .copied()
            .ok_or_else(|| RenderError::initialization("surface", "no supported surface formats"))?;
        let present_mode = surface_caps
            .present_modes
            .iter()
            .find(|m| matches!(m, wgpu::PresentMode::Mailbox))
            .copied()
            .unwrap_or(wgpu::PresentMode::AutoVsync);
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode,
            alpha_mode: surface_caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 1,
        };
        surface.configure(&device, &config);

        let layouts = Layouts::new(&device);

        let linear_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Linear Clamp Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        let material_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let camera_buffer = uniform_buffer(&device, "Camera Buffer", &CameraUniform::zeroed());
        let lighting_buffer = uniform_buffer(&device, "Lighting Buffer", &LightingUniform::zeroed());
        let atmosphere_buffer = uniform_buffer(&device, "Atmosphere Buffer", &crate::uniforms::AtmosphereUniform::default());
        let post_buffer = uniform_buffer(&device, "Post Buffer", &PostUniform::zeroed());
        let blur_uniform_h = uniform_buffer(&device, "Bloom Blur H", &BlurUniform::horizontal(1.0));
        let blur_uniform_v = uniform_buffer(&device, "Bloom Blur V", &BlurUniform::vertical(1.0));
        let dof_blur_h = uniform_buffer(&device, "DOF Blur H", &BlurUniform::horizontal(1.0));
        let dof_blur_v = uniform_buffer(&device, "DOF Blur V", &BlurUniform::vertical(1.0));

        // Kernel first, then rotation noise, from the same stream as the CPU chain.
        let mut rng = StdRng::seed_from_u64(post_seed);
        let kernel = generate_kernel(&mut rng, MAX_KERNEL_SIZE);
        let noise = generate_noise(&mut rng);
        let kernel_buffer = uniform_buffer(&device, "SSAO Kernel Buffer", &SsaoKernelUniform::new(&kernel));
        let noise_texture = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("SSAO Noise"),
                size: wgpu::Extent3d {
                    width: NOISE_DIM,
                    height: NOISE_DIM,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba16Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &f16_bytes(noise.iter().flat_map(|n| [n.x, n.y, n.z, 0.0])),
        );
        let noise_view = noise_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let brdf_lut = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("BRDF LUT"),
                size: wgpu::Extent3d {
                    width: BRDF_LUT_SIZE,
                    height: BRDF_LUT_SIZE,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rg16Float,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &f16_bytes(build_brdf_lut(BRDF_LUT_SIZE).into_iter().flatten()),
        );
        let brdf_lut_view = brdf_lut.create_view(&wgpu::TextureViewDescriptor::default());

        let camera_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Camera Bind Group"),
            layout: &layouts.camera,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: camera_buffer.as_entire_binding(),
            }],
        });
        let sky_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Sky Bind Group"),
            layout: &layouts.sky,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: camera_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: atmosphere_buffer.as_entire_binding() },
            ],
        });
        let post_frame_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Post Frame Bind Group"),
            layout: &layouts.post_frame,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: camera_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: post_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: kernel_buffer.as_entire_binding() },
            ],
        });

        let light_size = std::mem::size_of::<GpuLight>() as u64;
        let lights = StorageBuffer::new(&device, "Light Storage", light_size * 16);
        let shadow_matrices = StorageBuffer::new(&device, "Shadow Matrix Storage", 64 * 6);
        let objects = DynamicUniforms::new(&device, &layouts.object, "Object Uniforms", 64);
        let casters = DynamicUniforms::new(&device, &layouts.object, "Shadow Caster Uniforms", 64);
        let shadow_layers = DynamicUniforms::new(&device, &layouts.shadow_pass, "Shadow Layer Uniforms", 24);

        Ok(Self {
            surface,
            device,
            queue,
            config,
            window,
            layouts,
            pipelines: None,
            textures: HashMap::new(),
            meshes: HashMap::new(),
            next_texture: 1,
            next_mesh: 1,
            material_groups: HashMap::new(),
            warnings: WarnOnce::default(),
            linear_sampler,
            material_sampler,
            camera_buffer,
            lighting_buffer,
            atmosphere_buffer,
            post_buffer,
            blur_uniform_h,
            blur_uniform_v,
            dof_blur_h,
            dof_blur_v,
            camera_bind_group,
            sky_bind_group,
            post_frame_bind_group,
            lights,
            shadow_matrices,
            objects,
            casters,
            shadow_layers,
            brdf_lut_view,
            noise_view,
            history: None,
        })
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    fn pipelines(&self, stage: &str) -> RenderResult<&Pipelines> {
        self.pipelines
            .as_ref()
            .ok_or_else(|| RenderError::frame_aborted(stage, "shaders were never compiled"))
    }

    fn texture(&self, stage: &str, handle: TextureHandle) -> RenderResult<&GpuTexture> {
        self.textures
            .get(&handle)
            .ok_or_else(|| RenderError::frame_aborted(stage, format!("{handle} does not exist")))
    }

    fn view(&self, stage: &str, handle: TextureHandle) -> RenderResult<&wgpu::TextureView> {
        self.texture(stage, handle).map(|t| &t.view)
    }

    fn insert_texture(&mut self, desc: TextureDesc, texture: wgpu::Texture, view: wgpu::TextureView) -> TextureHandle {
        let handle = TextureHandle::from_raw(self.next_texture);
        self.next_texture += 1;
        self.textures.insert(handle, GpuTexture { desc, texture, view });
        handle
    }

    /// Resolve a material's six maps to live textures, falling back to the defaults.
    fn material_key(&mut self, frame: &FrameContext<'_>, material: &Material) -> [TextureHandle; 6] {
        let defaults = frame.defaults;
        let slots = &material.textures;
        let requested = [
            ("albedo", slots.albedo, defaults.white),
            ("normal", slots.normal, defaults.flat_normal),
            ("metallic", slots.metallic, defaults.white),
            ("roughness", slots.roughness, defaults.white),
            ("ao", slots.ao, defaults.white),
            ("emission", slots.emission, defaults.white),
        ];
        requested.map(|(slot, handle, fallback)| match handle {
            Some(handle) if self.textures.contains_key(&handle) => handle,
            Some(handle) => {
                self.warnings.warn(
                    "geometry",
                    &format!("{}/{slot}", material.name),
                    format_args!("{handle} is not loaded; using the default map"),
                );
                fallback
            }
            None => fallback,
        })
    }

    fn ensure_material_group(&mut self, key: [TextureHandle; 6]) -> RenderResult<()> {
        if self.material_groups.contains_key(&key) {
            return Ok(());
        }
        let views = key
            .iter()
            .map(|&handle| self.view("geometry", handle))
            .collect::<RenderResult<Vec<_>>>()?;
        let mut entries: Vec<wgpu::BindGroupEntry<'_>> = views
            .iter()
            .enumerate()
            .map(|(binding, view)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(view),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: 6,
            resource: wgpu::BindingResource::Sampler(&self.material_sampler),
        });
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Material Bind Group"),
            layout: &self.layouts.material,
            entries: &entries,
        });
        self.material_groups.insert(key, group);
        Ok(())
    }

    fn ensure_history(&mut self, size: (u32, u32)) {
        if self.history.as_ref().is_some_and(|h| h.size == size) {
            return;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("TAA History"),
            size: wgpu::Extent3d {
                width: size.0,
                height: size.1,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: pipelines::HDR_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.history = Some(History {
            texture,
            view,
            size,
            valid: false,
        });
    }

    fn post_source_group(&self, view: &wgpu::TextureView) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Post Source Bind Group"),
            layout: &self.layouts.post_source,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.linear_sampler) },
            ],
        })
    }

    fn post_gbuffer_group(&self, targets: &FramebufferSet, aux: &wgpu::TextureView) -> RenderResult<wgpu::BindGroup> {
        let position = self.view("post", targets.get(Attachment::Position))?;
        let normal = self.view("post", targets.get(Attachment::Normal))?;
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Post G-Buffer Bind Group"),
            layout: &self.layouts.post_gbuffer,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(position) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::TextureView(normal) },
                wgpu::BindGroupEntry { binding: 2, resource: wgpu::BindingResource::TextureView(aux) },
            ],
        }))
    }

    fn bloom_source_group(&self, view: &wgpu::TextureView, blur: &wgpu::Buffer) -> wgpu::BindGroup {
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Bloom Source Bind Group"),
            layout: &self.layouts.bloom_source,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: wgpu::BindingResource::TextureView(view) },
                wgpu::BindGroupEntry { binding: 1, resource: wgpu::BindingResource::Sampler(&self.linear_sampler) },
                wgpu::BindGroupEntry { binding: 2, resource: blur.as_entire_binding() },
            ],
        })
    }

    /// Separable blur of `source` through the blur pair; the result lands in BlurA.
    fn encode_blur(
        &self,
        encoder: &mut wgpu::CommandEncoder,
        pipelines: &Pipelines,
        targets: &FramebufferSet,
        source: &wgpu::TextureView,
        iterations: u32,
        (h, v): (&wgpu::Buffer, &wgpu::Buffer),
    ) -> RenderResult<()> {
        let blur_a = self.view("post", targets.get(Attachment::BlurA))?;
        let blur_b = self.view("post", targets.get(Attachment::BlurB))?;
        for i in 0..iterations {
            let input = if i == 0 { source } else { blur_a };
            let group_h = self.bloom_source_group(input, h);
            fullscreen(encoder, "Blur H Pass", &pipelines.blur, blur_b, &[&self.post_frame_bind_group, &group_h]);
            let group_v = self.bloom_source_group(blur_b, v);
            fullscreen(encoder, "Blur V Pass", &pipelines.blur, blur_a, &[&self.post_frame_bind_group, &group_v]);
        }
        Ok(())
    }
}

impl RenderBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn compile_shaders(&mut self, library: &ShaderLibrary) -> RenderResult<()> {
        library.validate()?;
        let pipelines = create_pipelines(&self.device, &self.layouts, library, self.config.format)?;
        log::info!("Compiled {} shader stages", library.keys().count());
        self.pipelines = Some(pipelines);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> RenderResult<TextureHandle> {
        let limits = self.device.limits();
        if desc.width == 0 || desc.height == 0 || desc.layers == 0 {
            return Err(RenderError::allocation(&desc.label, "zero-sized texture"));
        }
        if desc.width > limits.max_texture_dimension_2d || desc.height > limits.max_texture_dimension_2d {
            return Err(RenderError::allocation(
                &desc.label,
                format!("{}x{} exceeds the device limit of {}", desc.width, desc.height, limits.max_texture_dimension_2d),
            ));
        }
        if desc.layers > limits.max_texture_array_layers {
            return Err(RenderError::allocation(
                &desc.label,
                format!("{} layers exceed the device limit of {}", desc.layers, limits.max_texture_array_layers),
            ));
        }

        let usage = if desc.format.is_depth() {
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        } else {
            wgpu::TextureUsages::RENDER_ATTACHMENT
                | wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::COPY_DST
        };
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(&desc.label),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.layers,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: desc.format.to_wgpu(),
            usage,
            view_formats: &[],
        });
        let validation = pollster::block_on(self.device.pop_error_scope());
        let out_of_memory = pollster::block_on(self.device.pop_error_scope());
        if let Some(err) = validation.or(out_of_memory) {
            texture.destroy();
            return Err(RenderError::allocation(&desc.label, err.to_string()));
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some(&desc.label),
            dimension: Some(desc.view_dimension()),
            ..Default::default()
        });
        Ok(self.insert_texture(desc.clone(), texture, view))
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if let Some(gpu) = self.textures.remove(&handle) {
            gpu.texture.destroy();
            self.material_groups.retain(|key, _| !key.contains(&handle));
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
        let vertex_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Vertex Buffer"),
            contents: bytemuck::cast_slice(&mesh.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Index Buffer"),
            contents: bytemuck::cast_slice(&mesh.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        let handle = MeshHandle::from_raw(self.next_mesh);
        self.next_mesh += 1;
        self.meshes.insert(
            handle,
            GpuMesh {
                vertex_buffer,
                index_buffer,
                index_count: mesh.indices.len() as u32,
            },
        );
        Ok(handle)
    }

    fn upload_texture(&mut self, data: &TextureData) -> RenderResult<TextureHandle> {
        if !data.is_well_formed() {
            return Err(RenderError::allocation(&data.label, "pixel data does not match its size"));
        }
        let format = match data.color_space {
            ColorSpace::Srgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            ColorSpace::Linear => wgpu::TextureFormat::Rgba8Unorm,
        };
        let texture = self.device.create_texture_with_data(
            &self.queue,
            &wgpu::TextureDescriptor {
                label: Some(&data.label),
                size: wgpu::Extent3d {
                    width: data.width,
                    height: data.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &data.pixels,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let desc = TextureDesc::target(&data.label, data.width, data.height, TargetFormat::Rgba8Unorm);
        Ok(self.insert_texture(desc, texture, view))
    }

    fn configure_output(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if width == 0 || height == 0 {
            return Err(RenderError::Surface(format!("cannot configure a {width}x{height} surface")));
        }
        self.config.width = width;
        self.config.height = height;
        self.surface.configure(&self.device, &self.config);
        Ok(())
    }

    fn reset_history(&mut self) {
        if let Some(history) = &mut self.history {
            history.valid = false;
        }
    }

    fn prepare_frame(&mut self, frame: &FrameContext<'_>) -> RenderResult<()> {
        self.pipelines("prepare")?;
        let camera = CameraUniform::new(&frame.camera, frame.size, frame.frame_index, frame.debug_view.code());
        self.queue.write_buffer(&self.camera_buffer, 0, bytemuck::bytes_of(&camera));
        self.queue
            .write_buffer(&self.atmosphere_buffer, 0, bytemuck::bytes_of(&frame.atmosphere.uniform()));

        let has_velocity = frame.camera.previous_view_projection.is_some();
        let post = PostUniform::new(frame.post, frame.size, frame.frame_index, has_velocity);
        self.queue.write_buffer(&self.post_buffer, 0, bytemuck::bytes_of(&post));

        let p = &frame.post.params;
        let bloom_spread = 1.0 + p.bloom_radius;
        self.queue
            .write_buffer(&self.blur_uniform_h, 0, bytemuck::bytes_of(&BlurUniform::horizontal(bloom_spread)));
        self.queue
            .write_buffer(&self.blur_uniform_v, 0, bytemuck::bytes_of(&BlurUniform::vertical(bloom_spread)));
        let dof_spread = 1.0 + p.dof_aperture;
        self.queue
            .write_buffer(&self.dof_blur_h, 0, bytemuck::bytes_of(&BlurUniform::horizontal(dof_spread)));
        self.queue
            .write_buffer(&self.dof_blur_v, 0, bytemuck::bytes_of(&BlurUniform::vertical(dof_spread)));
        Ok(())
    }

    fn geometry_pass(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet, draws: &[DrawItem]) -> RenderResult<()> {
        self.pipelines("geometry")?;

        let mut uniforms = Vec::with_capacity(draws.len());
        let mut keys = Vec::with_capacity(draws.len());
        for draw in draws {
            let key = self.material_key(frame, &draw.material);
            self.ensure_material_group(key)?;
            // The flat normal stands in for a missing map, so only a real map perturbs.
            let has_normal_map = key[1] != frame.defaults.flat_normal;
            uniforms.push(ObjectUniform::new(draw.model, &draw.material, has_normal_map));
            keys.push(key);
        }
        self.objects.write(&self.device, &self.queue, &self.layouts.object, &uniforms);

        let pipelines = self.pipelines("geometry")?;
        let views = [
            Attachment::Position,
            Attachment::Normal,
            Attachment::AlbedoMetallic,
            Attachment::EmissionAo,
        ]
        .map(|a| self.view("geometry", targets.get(a)));
        let depth = self.view("geometry", targets.get(Attachment::Depth))?;
        let mut color_attachments = Vec::with_capacity(4);
        for view in views {
            color_attachments.push(Some(wgpu::RenderPassColorAttachment {
                view: view?,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                    store: wgpu::StoreOp::Store,
                },
            }));
        }

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Geometry Encoder"),
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Geometry Pass"),
            color_attachments: &color_attachments,
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(1.0),
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipelines.geometry);
        pass.set_bind_group(0, &self.camera_bind_group, &[]);
        for (i, (draw, key)) in draws.iter().zip(&keys).enumerate() {
            let (Some(mesh), Some(material_group)) = (self.meshes.get(&draw.mesh), self.material_groups.get(key)) else {
                continue;
            };
            pass.set_bind_group(1, self.objects.bind_group(), &[dynamic_offset(i)]);
            pass.set_bind_group(2, material_group, &[]);
            pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        }
        drop(pass);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn shadow_pass(&mut self, frame: &FrameContext<'_>, atlas: TextureHandle, casters: &[DrawItem]) -> RenderResult<()> {
        self.pipelines("shadow")?;
        let layer_count = self.texture("shadow", atlas)?.desc.layers;

        let mut layers = Vec::new();
        for assignment in &frame.shadows.assignments {
            for (face, matrix) in assignment.projection.matrices().iter().enumerate() {
                let layer = assignment.slot * 6 + face as u32;
                if layer >= layer_count {
                    return Err(RenderError::frame_aborted(
                        "shadow",
                        format!("slot {} face {face} is outside the atlas", assignment.slot),
                    ));
                }
                layers.push((
                    layer,
                    ShadowPassUniform {
                        light_view_proj: matrix.to_cols_array_2d(),
                    },
                ));
            }
        }
        if layers.is_empty() {
            return Ok(());
        }
        let layer_uniforms: Vec<ShadowPassUniform> = layers.iter().map(|(_, u)| *u).collect();
        self.shadow_layers
            .write(&self.device, &self.queue, &self.layouts.shadow_pass, &layer_uniforms);
        let caster_uniforms: Vec<ObjectUniform> = casters
            .iter()
            .map(|c| ObjectUniform::new(c.model, &c.material, false))
            .collect();
        self.casters.write(&self.device, &self.queue, &self.layouts.object, &caster_uniforms);

        let pipelines = self.pipelines("shadow")?;
        let atlas_texture = &self.texture("shadow", atlas)?.texture;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Shadow Encoder"),
        });
        for (index, (layer, _)) in layers.iter().enumerate() {
            let view = atlas_texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("Shadow Layer"),
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_array_layer: *layer,
                array_layer_count: Some(1),
                ..Default::default()
            });
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Shadow Pass"),
                color_attachments: &[],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&pipelines.shadow);
            pass.set_bind_group(0, self.shadow_layers.bind_group(), &[dynamic_offset(index)]);
            for (i, caster) in casters.iter().enumerate() {
                let Some(mesh) = self.meshes.get(&caster.mesh) else {
                    continue;
                };
                pass.set_bind_group(1, self.casters.bind_group(), &[dynamic_offset(i)]);
                pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
                pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                pass.draw_indexed(0..mesh.index_count, 0, 0..1);
            }
            drop(pass);
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn lighting_pass(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet, atlas: TextureHandle) -> RenderResult<()> {
        self.pipelines("lighting")?;
        let atlas_desc = self.texture("lighting", atlas)?.desc.clone();

        let gpu_lights: Vec<GpuLight> = frame
            .lights
            .iter()
            .enumerate()
            .map(|(i, light)| GpuLight::new(light, frame.shadows.for_light(i).map(|a| a.slot)))
            .collect();
        self.lights
            .write(&self.device, &self.queue, bytemuck::cast_slice(&gpu_lights));

        let mut matrices = vec![Mat4::IDENTITY.to_cols_array_2d(); atlas_desc.layers as usize];
        for assignment in &frame.shadows.assignments {
            for (face, m) in assignment.projection.matrices().iter().enumerate() {
                if let Some(slot) = matrices.get_mut(assignment.slot as usize * 6 + face) {
                    *slot = m.to_cols_array_2d();
                }
            }
        }
        self.shadow_matrices
            .write(&self.device, &self.queue, bytemuck::cast_slice(&matrices));

        let lighting = LightingUniform::new(gpu_lights.len(), frame.environment, atlas_desc.width);
        self.queue.write_buffer(&self.lighting_buffer, 0, bytemuck::bytes_of(&lighting));

        let pipelines = self.pipelines("lighting")?;
        let frame_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Lighting Frame Bind Group"),
            layout: &self.layouts.lighting_frame,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: self.camera_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 1, resource: self.lighting_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 2, resource: self.atmosphere_buffer.as_entire_binding() },
                wgpu::BindGroupEntry { binding: 3, resource: self.lights.binding() },
                wgpu::BindGroupEntry { binding: 4, resource: self.shadow_matrices.binding() },
            ],
        });
        let inputs_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Lighting Inputs Bind Group"),
            layout: &self.layouts.lighting_inputs,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(self.view("lighting", targets.get(Attachment::Position))?),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(self.view("lighting", targets.get(Attachment::Normal))?),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(
                        self.view("lighting", targets.get(Attachment::AlbedoMetallic))?,
                    ),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(self.view("lighting", targets.get(Attachment::EmissionAo))?),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(self.view("lighting", atlas)?),
                },
                wgpu::BindGroupEntry { binding: 5, resource: wgpu::BindingResource::TextureView(&self.brdf_lut_view) },
                wgpu::BindGroupEntry { binding: 6, resource: wgpu::BindingResource::Sampler(&self.linear_sampler) },
            ],
        });

        let hdr = self.view("lighting", targets.get(Attachment::Hdr))?;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Lighting Encoder"),
        });
        fullscreen(&mut encoder, "Lighting Pass", &pipelines.lighting, hdr, &[&frame_group, &inputs_group]);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn skybox_pass(&mut self, _frame: &FrameContext<'_>, targets: &FramebufferSet) -> RenderResult<()> {
        let pipelines = self.pipelines("skybox")?;
        let hdr = self.view("skybox", targets.get(Attachment::Hdr))?;
        let depth = self.view("skybox", targets.get(Attachment::Depth))?;
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Skybox Encoder"),
        });
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Skybox Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: hdr,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        pass.set_pipeline(&pipelines.skybox);
        pass.set_bind_group(0, &self.sky_bind_group, &[]);
        pass.draw(0..3, 0..1);
        drop(pass);
        self.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    fn post_process(&mut self, frame: &FrameContext<'_>, targets: &FramebufferSet) -> RenderResult<TextureHandle> {
        self.pipelines("post")?;
        let size = targets.size();
        let keep_history = frame.post.is_enabled(Effect::Taa);
        if keep_history {
            self.ensure_history(size);
        }

        let pipelines = self.pipelines("post")?;
        let p = &frame.post.params;
        let post_frame = &self.post_frame_bind_group;
        let history_valid = self.history.as_ref().is_some_and(|h| h.valid);
        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Post Encoder"),
        });

        let mut current = targets.get(Attachment::Hdr);
        let mut write_a = true;
        for stage in frame.plan.active() {
            let next = targets.get(if write_a { Attachment::PostA } else { Attachment::PostB });
            let source_view = self.view("post", current)?;
            let next_view = self.view("post", next)?;
            let source = self.post_source_group(source_view);
            match stage {
                PostStage::Ssao => {
                    let blur_a = self.view("post", targets.get(Attachment::BlurA))?;
                    let with_noise = self.post_gbuffer_group(targets, &self.noise_view)?;
                    fullscreen(&mut encoder, "SSAO Pass", &pipelines.ssao, blur_a, &[post_frame, &source, &with_noise]);
                    let with_ao = self.post_gbuffer_group(targets, blur_a)?;
                    fullscreen(
                        &mut encoder,
                        "SSAO Apply Pass",
                        &pipelines.ssao_apply,
                        next_view,
                        &[post_frame, &source, &with_ao],
                    );
                }
                PostStage::Bloom => {
                    let blur_a = self.view("post", targets.get(Attachment::BlurA))?;
                    let bright = self.bloom_source_group(source_view, &self.blur_uniform_h);
                    fullscreen(&mut encoder, "Bright Pass", &pipelines.bright, blur_a, &[post_frame, &bright]);
                    let iterations = crate::post::bloom::blur_iterations(p.bloom_radius);
                    self.encode_blur(
                        &mut encoder,
                        pipelines,
                        targets,
                        blur_a,
                        iterations,
                        (&self.blur_uniform_h, &self.blur_uniform_v),
                    )?;
                    let composite_source = self.bloom_source_group(source_view, &self.blur_uniform_h);
                    let glow = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                        label: Some("Bloom Texture Bind Group"),
                        layout: &self.layouts.bloom_texture,
                        entries: &[wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(blur_a),
                        }],
                    });
                    fullscreen(
                        &mut encoder,
                        "Bloom Composite Pass",
                        &pipelines.bloom_composite,
                        next_view,
                        &[post_frame, &composite_source, &glow],
                    );
                }
                PostStage::DepthOfField => {
                    let blur_a = self.view("post", targets.get(Attachment::BlurA))?;
                    self.encode_blur(&mut encoder, pipelines, targets, source_view, 2, (&self.dof_blur_h, &self.dof_blur_v))?;
                    let with_blur = self.post_gbuffer_group(targets, blur_a)?;
                    fullscreen(
                        &mut encoder,
                        "DOF Pass",
                        pipelines.effect(EffectEntry::DepthOfField),
                        next_view,
                        &[post_frame, &source, &with_blur],
                    );
                }
                PostStage::ColorGradingToneMapping => {
                    fullscreen(&mut encoder, "Tone Mapping Pass", &pipelines.tonemap, next_view, &[post_frame, &source]);
                }
                PostStage::AntiAliasing => {
                    let temporal = frame.plan.anti_aliasing == Some(AntiAliasing::Temporal) && history_valid;
                    let (entry, aux) = match (&self.history, temporal) {
                        (Some(history), true) => (EffectEntry::Taa, &history.view),
                        _ => (EffectEntry::Fxaa, &self.noise_view),
                    };
                    let gbuffer = self.post_gbuffer_group(targets, aux)?;
                    fullscreen(
                        &mut encoder,
                        entry.entry_point(),
                        pipelines.effect(entry),
                        next_view,
                        &[post_frame, &source, &gbuffer],
                    );
                }
                other => {
                    let entry = match other {
                        PostStage::Ssr => EffectEntry::Ssr,
                        PostStage::MotionBlur => EffectEntry::MotionBlur,
                        PostStage::LensFlares => EffectEntry::LensFlares,
                        PostStage::FilmGrain => EffectEntry::FilmGrain,
                        PostStage::Vignette => EffectEntry::Vignette,
                        PostStage::ChromaticAberration => EffectEntry::Chromatic,
                        _ => EffectEntry::Sharpen,
                    };
                    let gbuffer = self.post_gbuffer_group(targets, &self.noise_view)?;
                    fullscreen(
                        &mut encoder,
                        other.name(),
                        pipelines.effect(entry),
                        next_view,
                        &[post_frame, &source, &gbuffer],
                    );
                }
            }
            current = next;
            write_a = !write_a;
        }

        let mut history_written = false;
        if let (true, Some(history)) = (keep_history, &self.history) {
            encoder.copy_texture_to_texture(
                wgpu::ImageCopyTexture {
                    texture: &self.texture("post", current)?.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyTexture {
                    texture: &history.texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: size.0,
                    height: size.1,
                    depth_or_array_layers: 1,
                },
            );
            history_written = true;
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        if let Some(history) = &mut self.history {
            history.valid = history_written;
        }
        Ok(current)
    }

    fn present(&mut self, _frame: &FrameContext<'_>, targets: &FramebufferSet, image: TextureHandle) -> RenderResult<()> {
        let pipelines = self.pipelines("present")?;
        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                self.surface.configure(&self.device, &self.config);
                return Err(RenderError::Surface("surface lost; reconfigured".into()));
            }
            Err(err) => return Err(RenderError::Surface(err.to_string())),
        };
        let surface_view = output.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let final_group = self.post_source_group(self.view("present", image)?);
        let gbuffer = [
            Attachment::Position,
            Attachment::Normal,
            Attachment::AlbedoMetallic,
            Attachment::EmissionAo,
        ]
        .map(|a| self.view("present", targets.get(a)));
        let mut entries = Vec::with_capacity(4);
        for (binding, view) in gbuffer.into_iter().enumerate() {
            entries.push(wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: wgpu::BindingResource::TextureView(view?),
            });
        }
        let gbuffer_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Debug G-Buffer Bind Group"),
            layout: &self.layouts.debug_gbuffer,
            entries: &entries,
        });

        let mut encoder = self.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Present Encoder"),
        });
        fullscreen(
            &mut encoder,
            "Present Pass",
            &pipelines.debug,
            &surface_view,
            &[&self.camera_bind_group, &final_group, &gbuffer_group],
        );
        self.queue.submit(std::iter::once(encoder.finish()));
        output.present();
        Ok(())
    }
}
