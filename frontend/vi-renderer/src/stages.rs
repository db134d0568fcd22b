//! GPU pipeline stages.
//!
//! Every stage is a fullscreen triangle-strip draw with an identity vertex shader and a
//! stage-specific fragment shader. Pipelines and bind group layouts are created once at
//! device init; per-scanout state flows through uniform buffers and freshly created
//! textures.

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

pub(crate) const OUTPUT_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Parameters for the VRAM fetch stage. Layout must match `FetchParams` in fetch.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct FetchParams {
    pub rdram_word_offset: u32,
    pub rdram_word_len: u32,
    pub hidden_byte_offset: u32,
    pub hidden_word_len: u32,
    pub vi_width: u32,
    pub fmt_rgba32: u32,
    pub fetch_bug: u32,
    pub padding: u32,
}

/// Parameters shared by the AA and divot passes. Layout must match filter.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct FilterParams {
    pub max_x: i32,
    pub max_y: i32,
    pub aa_enabled: u32,
    pub dither_filter: u32,
}

/// Parameters for the scale stage. Layout must match `ScaleParams` in scale.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct ScaleParams {
    pub scale_factor: i32,
    pub frame_h_start: i32,
    pub scissor_x0: i32,
    pub scissor_x1: i32,
    pub scissor_y0: i32,
    pub scissor_y1: i32,
    pub max_x: i32,
    pub max_y: i32,
    pub gamma_enable: u32,
    pub gamma_dither: u32,
    pub resample: u32,
    pub padding: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct DownscaleParams {
    pub src_width: i32,
    pub src_height: i32,
    pub padding: [u32; 2],
}

/// Parameters for both deinterlace entry points. Layout must match deinterlace.wgsl.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub(crate) struct DeinterlaceParams {
    pub field: u32,
    pub blend_previous: u32,
    pub has_previous: u32,
    pub src_height: i32,
}

pub(crate) struct Stage {
    pub bind_group_layout: wgpu::BindGroupLayout,
    pub pipeline: wgpu::RenderPipeline,
}

pub(crate) struct StagePipelines {
    pub fetch: Stage,
    pub aa: Stage,
    pub divot: Stage,
    pub scale: Stage,
    pub downscale: Stage,
    pub deinterlace_weave: Stage,
    pub deinterlace_bob: Stage,
}

impl StagePipelines {
    pub(crate) fn create(device: &wgpu::Device) -> Self {
        let identity = device.create_shader_module(wgpu::include_wgsl!("identity.wgsl"));
        let fetch = device.create_shader_module(wgpu::include_wgsl!("fetch.wgsl"));
        let filter = device.create_shader_module(wgpu::include_wgsl!("filter.wgsl"));
        let scale = device.create_shader_module(wgpu::include_wgsl!("scale.wgsl"));
        let downscale = device.create_shader_module(wgpu::include_wgsl!("downscale.wgsl"));
        let deinterlace = device.create_shader_module(wgpu::include_wgsl!("deinterlace.wgsl"));

        let fetch = create_stage(
            device,
            "fetch",
            &identity,
            &fetch,
            None,
            &[
                storage_buffer_entry(0),
                storage_buffer_entry(1),
                uniform_buffer_entry(2),
            ],
        );
        let aa = create_stage(
            device,
            "aa",
            &identity,
            &filter,
            Some("fs_aa"),
            &[texture_entry(0), uniform_buffer_entry(1)],
        );
        let divot = create_stage(
            device,
            "divot",
            &identity,
            &filter,
            Some("fs_divot"),
            &[texture_entry(0), uniform_buffer_entry(1)],
        );
        let scale = create_stage(
            device,
            "scale",
            &identity,
            &scale,
            None,
            &[
                texture_entry(0),
                storage_buffer_entry(1),
                uniform_buffer_entry(2),
                storage_buffer_entry(3),
            ],
        );
        let downscale = create_stage(
            device,
            "downscale",
            &identity,
            &downscale,
            None,
            &[texture_entry(0), uniform_buffer_entry(1)],
        );
        let deinterlace_weave = create_stage(
            device,
            "deinterlace_weave",
            &identity,
            &deinterlace,
            Some("fs_weave"),
            &[texture_entry(0), texture_entry(1), uniform_buffer_entry(2)],
        );
        let deinterlace_bob = create_stage(
            device,
            "deinterlace_bob",
            &identity,
            &deinterlace,
            Some("fs_bob"),
            &[texture_entry(0), texture_entry(1), uniform_buffer_entry(2)],
        );

        Self { fetch, aa, divot, scale, downscale, deinterlace_weave, deinterlace_bob }
    }
}

fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_buffer_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
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

fn uniform_buffer_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

fn create_stage(
    device: &wgpu::Device,
    label: &str,
    vertex_module: &wgpu::ShaderModule,
    fragment_module: &wgpu::ShaderModule,
    fragment_entry: Option<&str>,
    layout_entries: &[wgpu::BindGroupLayoutEntry],
) -> Stage {
    let bind_group_layout =
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: format!("{label}_bind_group_layout").as_str().into(),
            entries: layout_entries,
        });

    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: format!("{label}_pipeline_layout").as_str().into(),
        bind_group_layouts: &[&bind_group_layout],
        push_constant_ranges: &[],
    });

    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: format!("{label}_pipeline").as_str().into(),
        layout: Some(&pipeline_layout),
        vertex: wgpu::VertexState {
            module: vertex_module,
            entry_point: None,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            buffers: &[],
        },
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleStrip,
            strip_index_format: None,
            front_face: wgpu::FrontFace::Ccw,
            cull_mode: None,
            unclipped_depth: false,
            polygon_mode: wgpu::PolygonMode::Fill,
            conservative: false,
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        fragment: Some(wgpu::FragmentState {
            module: fragment_module,
            entry_point: fragment_entry,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            targets: &[Some(wgpu::ColorTargetState {
                format: OUTPUT_FORMAT,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
        }),
        multiview: None,
        cache: None,
    });

    Stage { bind_group_layout, pipeline }
}

pub(crate) fn create_stage_texture(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    usage: wgpu::TextureUsages,
) -> wgpu::Texture {
    device.create_texture(&wgpu::TextureDescriptor {
        label: label.into(),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OUTPUT_FORMAT,
        usage,
        view_formats: &[],
    })
}

pub(crate) fn create_uniform_buffer<T: Pod>(
    device: &wgpu::Device,
    label: &str,
    params: &T,
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: label.into(),
        contents: bytemuck::cast_slice(std::slice::from_ref(params)),
        usage: wgpu::BufferUsages::UNIFORM,
    })
}

pub(crate) fn create_storage_buffer(
    device: &wgpu::Device,
    label: &str,
    contents: &[u8],
) -> wgpu::Buffer {
    device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: label.into(),
        contents,
        usage: wgpu::BufferUsages::STORAGE,
    })
}

/// Runs one stage: a single fullscreen draw into `target`.
pub(crate) fn run_stage(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    stage: &Stage,
    bind_group: &wgpu::BindGroup,
    target: &wgpu::TextureView,
) {
    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: label.into(),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });

    pass.set_pipeline(&stage.pipeline);
    pass.set_bind_group(0, bind_group, &[]);
    pass.draw(0..4, 0..1);
}
