//! Bind group layouts and render pipelines for every pass.

use crate::error::{RenderError, RenderResult};
use crate::framebuffer::Attachment;
use crate::shaders::ShaderLibrary;
use crate::uniforms::{
    AtmosphereUniform, BlurUniform, CameraUniform, LightingUniform, ObjectUniform, PostUniform, ShadowPassUniform,
    SsaoKernelUniform,
};
use crate::vertex::Vertex;
use std::num::NonZeroU64;

pub const HDR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba16Float;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

fn binding_size<T>() -> Option<NonZeroU64> {
    NonZeroU64::new(std::mem::size_of::<T>() as u64)
}

fn uniform_entry<T>(binding: u32, visibility: wgpu::ShaderStages, dynamic: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: dynamic,
            min_binding_size: binding_size::<T>(),
        },
        count: None,
    }
}

fn storage_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn texture_entry(binding: u32, filterable: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn sampler_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    }
}

const VERTEX_FRAGMENT: wgpu::ShaderStages = wgpu::ShaderStages::VERTEX_FRAGMENT;

/// Bind group layouts, created once with the device.
pub struct Layouts {
    /// Camera only: geometry g0 and debug g0.
    pub camera: wgpu::BindGroupLayout,
    /// Per-draw object block with a dynamic offset.
    pub object: wgpu::BindGroupLayout,
    /// Six material maps and their sampler.
    pub material: wgpu::BindGroupLayout,
    /// Per-layer light matrix with a dynamic offset.
    pub shadow_pass: wgpu::BindGroupLayout,
    pub lighting_frame: wgpu::BindGroupLayout,
    pub lighting_inputs: wgpu::BindGroupLayout,
    pub sky: wgpu::BindGroupLayout,
    /// Camera, post parameters and the SSAO kernel.
    pub post_frame: wgpu::BindGroupLayout,
    /// The image a post stage reads, and its sampler.
    pub post_source: wgpu::BindGroupLayout,
    /// G-buffer position and normal plus one auxiliary texture.
    pub post_gbuffer: wgpu::BindGroupLayout,
    pub bloom_source: wgpu::BindGroupLayout,
    pub bloom_texture: wgpu::BindGroupLayout,
    pub debug_gbuffer: wgpu::BindGroupLayout,
}

impl Layouts {
    pub fn new(device: &wgpu::Device) -> Self {
        let layout = |label: &str, entries: &[wgpu::BindGroupLayoutEntry]| {
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(label),
                entries,
            })
        };
        Self {
            camera: layout(
                "Camera Bind Group Layout",
                &[uniform_entry::<CameraUniform>(0, VERTEX_FRAGMENT, false)],
            ),
            object: layout(
                "Object Bind Group Layout",
                &[uniform_entry::<ObjectUniform>(0, VERTEX_FRAGMENT, true)],
            ),
            material: layout(
                "Material Bind Group Layout",
                &[
                    texture_entry(0, true),
                    texture_entry(1, true),
                    texture_entry(2, true),
                    texture_entry(3, true),
                    texture_entry(4, true),
                    texture_entry(5, true),
                    sampler_entry(6),
                ],
            ),
            shadow_pass: layout(
                "Shadow Pass Bind Group Layout",
                &[uniform_entry::<ShadowPassUniform>(0, wgpu::ShaderStages::VERTEX, true)],
            ),
            lighting_frame: layout(
                "Lighting Frame Bind Group Layout",
                &[
                    uniform_entry::<CameraUniform>(0, VERTEX_FRAGMENT, false),
                    uniform_entry::<LightingUniform>(1, wgpu::ShaderStages::FRAGMENT, false),
                    uniform_entry::<AtmosphereUniform>(2, wgpu::ShaderStages::FRAGMENT, false),
                    storage_entry(3),
                    storage_entry(4),
                ],
            ),
            lighting_inputs: layout(
                "Lighting Inputs Bind Group Layout",
                &[
                    texture_entry(0, false),
                    texture_entry(1, false),
                    texture_entry(2, false),
                    texture_entry(3, false),
                    wgpu::BindGroupLayoutEntry {
                        binding: 4,
                        visibility: wgpu::ShaderStages::FRAGMENT,
                        ty: wgpu::BindingType::Texture {
                            sample_type: wgpu::TextureSampleType::Depth,
                            view_dimension: wgpu::TextureViewDimension::D2Array,
                            multisampled: false,
                        },
                        count: None,
                    },
                    texture_entry(5, true),
                    sampler_entry(6),
                ],
            ),
            sky: layout(
                "Sky Bind Group Layout",
                &[
                    uniform_entry::<CameraUniform>(0, VERTEX_FRAGMENT, false),
                    uniform_entry::<AtmosphereUniform>(1, wgpu::ShaderStages::FRAGMENT, false),
                ],
            ),
            post_frame: layout(
                "Post Frame Bind Group Layout",
                &[
                    uniform_entry::<CameraUniform>(0, VERTEX_FRAGMENT, false),
                    uniform_entry::<PostUniform>(1, wgpu::ShaderStages::FRAGMENT, false),
                    uniform_entry::<SsaoKernelUniform>(2, wgpu::ShaderStages::FRAGMENT, false),
                ],
            ),
            post_source: layout("Post Source Bind Group Layout", &[texture_entry(0, true), sampler_entry(1)]),
            post_gbuffer: layout(
                "Post G-Buffer Bind Group Layout",
                &[texture_entry(0, false), texture_entry(1, false), texture_entry(2, true)],
            ),
            bloom_source: layout(
                "Bloom Source Bind Group Layout",
                &[
                    texture_entry(0, true),
                    sampler_entry(1),
                    uniform_entry::<BlurUniform>(2, wgpu::ShaderStages::FRAGMENT, false),
                ],
            ),
            bloom_texture: layout("Bloom Texture Bind Group Layout", &[texture_entry(0, true)]),
            debug_gbuffer: layout(
                "Debug G-Buffer Bind Group Layout",
                &[
                    texture_entry(0, false),
                    texture_entry(1, false),
                    texture_entry(2, false),
                    texture_entry(3, false),
                ],
            ),
        }
    }
}

/// Every post-effect entry point in `post_effects.wgsl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EffectEntry {
    Ssr,
    DepthOfField,
    MotionBlur,
    LensFlares,
    FilmGrain,
    Vignette,
    Chromatic,
    Sharpen,
    Fxaa,
    Taa,
}

impl EffectEntry {
    pub const ALL: [EffectEntry; 10] = [
        EffectEntry::Ssr,
        EffectEntry::DepthOfField,
        EffectEntry::MotionBlur,
        EffectEntry::LensFlares,
        EffectEntry::FilmGrain,
        EffectEntry::Vignette,
        EffectEntry::Chromatic,
        EffectEntry::Sharpen,
        EffectEntry::Fxaa,
        EffectEntry::Taa,
    ];

    pub fn entry_point(self) -> &'static str {
        match self {
            EffectEntry::Ssr => "fs_ssr",
            EffectEntry::DepthOfField => "fs_dof",
            EffectEntry::MotionBlur => "fs_motion_blur",
            EffectEntry::LensFlares => "fs_lens_flares",
            EffectEntry::FilmGrain => "fs_film_grain",
            EffectEntry::Vignette => "fs_vignette",
            EffectEntry::Chromatic => "fs_chromatic",
            EffectEntry::Sharpen => "fs_sharpen",
            EffectEntry::Fxaa => "fs_fxaa",
            EffectEntry::Taa => "fs_taa",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

pub struct Pipelines {
    pub geometry: wgpu::RenderPipeline,
    pub shadow: wgpu::RenderPipeline,
    pub lighting: wgpu::RenderPipeline,
    pub skybox: wgpu::RenderPipeline,
    pub ssao: wgpu::RenderPipeline,
    pub ssao_apply: wgpu::RenderPipeline,
    pub bright: wgpu::RenderPipeline,
    pub blur: wgpu::RenderPipeline,
    pub bloom_composite: wgpu::RenderPipeline,
    pub tonemap: wgpu::RenderPipeline,
    effects: Vec<wgpu::RenderPipeline>,
    pub debug: wgpu::RenderPipeline,
}

impl Pipelines {
    pub fn effect(&self, entry: EffectEntry) -> &wgpu::RenderPipeline {
        &self.effects[entry.index()]
    }
}

/// Compile one shader module inside a validation scope.
fn create_module(device: &wgpu::Device, library: &ShaderLibrary, key: &str) -> RenderResult<wgpu::ShaderModule> {
    let source = library.source(key)?;
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(key),
        source: wgpu::ShaderSource::Wgsl(source.into()),
    });
    match pollster::block_on(device.pop_error_scope()) {
        Some(err) => Err(RenderError::initialization(key, err.to_string())),
        None => Ok(module),
    }
}

fn pipeline_layout(device: &wgpu::Device, label: &str, groups: &[&wgpu::BindGroupLayout]) -> wgpu::PipelineLayout {
    device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: groups,
        push_constant_ranges: &[],
    })
}

fn color_target(format: wgpu::TextureFormat) -> Option<wgpu::ColorTargetState> {
    Some(wgpu::ColorTargetState {
        format,
        blend: None,
        write_mask: wgpu::ColorWrites::ALL,
    })
}

/// Fullscreen-triangle pipeline writing one colour target.
fn create_fullscreen_pipeline(
    device: &wgpu::Device,
    label: &str,
    layout: &wgpu::PipelineLayout,
    module: &wgpu::ShaderModule,
    fragment_entry: &str,
    format: wgpu::TextureFormat,
) -> wgpu::RenderPipeline {
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(label),
        layout: Some(layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_fullscreen"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some(fragment_entry),
            compilation_options: Default::default(),
            targets: &[color_target(format)],
        }),
        primitive: wgpu::PrimitiveState::default(),
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn create_geometry_pipeline(device: &wgpu::Device, layouts: &Layouts, module: &wgpu::ShaderModule) -> wgpu::RenderPipeline {
    let layout = pipeline_layout(
        device,
        "Geometry Pipeline Layout",
        &[&layouts.camera, &layouts.object, &layouts.material],
    );
    let targets = [
        Attachment::Position,
        Attachment::Normal,
        Attachment::AlbedoMetallic,
        Attachment::EmissionAo,
    ]
    .map(|a| color_target(a.format().to_wgpu()));
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Geometry Pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[Vertex::layout()],
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_main"),
            compilation_options: Default::default(),
            targets: &targets,
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            front_face: wgpu::FrontFace::Ccw,
            // Back faces are rejected in the shader unless the material is two-sided.
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn create_shadow_pipeline(device: &wgpu::Device, layouts: &Layouts, module: &wgpu::ShaderModule) -> wgpu::RenderPipeline {
    let layout = pipeline_layout(device, "Shadow Pipeline Layout", &[&layouts.shadow_pass, &layouts.object]);
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Shadow Pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_main"),
            compilation_options: Default::default(),
            buffers: &[Vertex::position_layout()],
        },
        fragment: None,
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            cull_mode: None,
            ..Default::default()
        },
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

fn create_skybox_pipeline(device: &wgpu::Device, layouts: &Layouts, module: &wgpu::ShaderModule) -> wgpu::RenderPipeline {
    let layout = pipeline_layout(device, "Skybox Pipeline Layout", &[&layouts.sky]);
    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("Skybox Pipeline"),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module,
            entry_point: Some("vs_sky"),
            compilation_options: Default::default(),
            buffers: &[],
        },
        fragment: Some(wgpu::FragmentState {
            module,
            entry_point: Some("fs_sky"),
            compilation_options: Default::default(),
            targets: &[color_target(HDR_FORMAT)],
        }),
        primitive: wgpu::PrimitiveState::default(),
        // Drawn at the far plane; only pixels the geometry pass left empty pass the test.
        depth_stencil: Some(wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: false,
            depth_compare: wgpu::CompareFunction::LessEqual,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        }),
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    })
}

/// Build every pipeline. Errors name the stage whose module or pipeline failed.
pub fn create_pipelines(
    device: &wgpu::Device,
    layouts: &Layouts,
    library: &ShaderLibrary,
    surface_format: wgpu::TextureFormat,
) -> RenderResult<Pipelines> {
    let geometry_module = create_module(device, library, "geometry")?;
    let shadow_module = create_module(device, library, "shadow")?;
    let lighting_module = create_module(device, library, "lighting")?;
    let skybox_module = create_module(device, library, "skybox")?;
    let ssao_module = create_module(device, library, "ssao")?;
    let bloom_module = create_module(device, library, "bloom")?;
    let tone_module = create_module(device, library, "tone_mapping")?;
    let effects_module = create_module(device, library, "post_effects")?;
    let debug_module = create_module(device, library, "debug")?;

    let lighting_layout = pipeline_layout(
        device,
        "Lighting Pipeline Layout",
        &[&layouts.lighting_frame, &layouts.lighting_inputs],
    );
    let post_layout = pipeline_layout(
        device,
        "Post Pipeline Layout",
        &[&layouts.post_frame, &layouts.post_source, &layouts.post_gbuffer],
    );
    let blur_layout = pipeline_layout(device, "Blur Pipeline Layout", &[&layouts.post_frame, &layouts.bloom_source]);
    let composite_layout = pipeline_layout(
        device,
        "Bloom Composite Pipeline Layout",
        &[&layouts.post_frame, &layouts.bloom_source, &layouts.bloom_texture],
    );
    let tone_layout = pipeline_layout(device, "Tone Mapping Pipeline Layout", &[&layouts.post_frame, &layouts.post_source]);
    let debug_layout = pipeline_layout(
        device,
        "Debug Pipeline Layout",
        &[&layouts.camera, &layouts.post_source, &layouts.debug_gbuffer],
    );

    let stage = |key: &'static str, build: &dyn Fn() -> wgpu::RenderPipeline| {
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = build();
        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => Err(RenderError::initialization(key, err.to_string())),
            None => Ok(pipeline),
        }
    };

    let effects = EffectEntry::ALL
        .iter()
        .map(|entry| {
            stage("post_effects", &|| {
                create_fullscreen_pipeline(
                    device,
                    entry.entry_point(),
                    &post_layout,
                    &effects_module,
                    entry.entry_point(),
                    HDR_FORMAT,
                )
            })
        })
        .collect::<RenderResult<Vec<_>>>()?;

    Ok(Pipelines {
        geometry: stage("geometry", &|| create_geometry_pipeline(device, layouts, &geometry_module))?,
        shadow: stage("shadow", &|| create_shadow_pipeline(device, layouts, &shadow_module))?,
        lighting: stage("lighting", &|| {
            create_fullscreen_pipeline(device, "Lighting Pipeline", &lighting_layout, &lighting_module, "fs_main", HDR_FORMAT)
        })?,
        skybox: stage("skybox", &|| create_skybox_pipeline(device, layouts, &skybox_module))?,
        ssao: stage("ssao", &|| {
            create_fullscreen_pipeline(device, "SSAO Pipeline", &post_layout, &ssao_module, "fs_ssao", HDR_FORMAT)
        })?,
        ssao_apply: stage("ssao", &|| {
            create_fullscreen_pipeline(device, "SSAO Apply Pipeline", &post_layout, &ssao_module, "fs_ssao_apply", HDR_FORMAT)
        })?,
        bright: stage("bloom", &|| {
            create_fullscreen_pipeline(device, "Bright Pipeline", &blur_layout, &bloom_module, "fs_bright", HDR_FORMAT)
        })?,
        blur: stage("bloom", &|| {
            create_fullscreen_pipeline(device, "Blur Pipeline", &blur_layout, &bloom_module, "fs_blur", HDR_FORMAT)
        })?,
        bloom_composite: stage("bloom", &|| {
            create_fullscreen_pipeline(
                device,
                "Bloom Composite Pipeline",
                &composite_layout,
                &bloom_module,
                "fs_composite",
                HDR_FORMAT,
            )
        })?,
        tonemap: stage("tone_mapping", &|| {
            create_fullscreen_pipeline(device, "Tone Mapping Pipeline", &tone_layout, &tone_module, "fs_tonemap", HDR_FORMAT)
        })?,
        effects,
        debug: stage("debug", &|| {
            create_fullscreen_pipeline(device, "Debug Pipeline", &debug_layout, &debug_module, "fs_debug", surface_format)
        })?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_effect_entry_exists_in_the_shader() {
        let library = ShaderLibrary::embedded();
        let source = library.source("post_effects").unwrap();
        for entry in EffectEntry::ALL {
            assert!(source.contains(&format!("fn {}(", entry.entry_point())), "{entry:?}");
        }
    }

    #[test]
    fn effect_indices_follow_declaration_order() {
        for (i, entry) in EffectEntry::ALL.iter().enumerate() {
            assert_eq!(entry.index(), i);
        }
    }
}
