//! Single-purpose GPU passes. Each kernel owns its pipeline, parameter
//! buffers and bind-group cache, and exposes an `encode` method that records
//! its pass into the frame's command encoder.

use std::collections::HashMap;

use wgpu::util::DeviceExt;

use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::texture::TextureObject;

pub(crate) mod aggregate;
pub(crate) mod bounds;
pub(crate) mod deposit;
pub(crate) mod fft;
pub(crate) mod gather;
pub(crate) mod gradient;
pub(crate) mod integrate;
pub(crate) mod near_field;
pub(crate) mod poisson;
pub(crate) mod reduce;
pub(crate) mod traverse;

/// Embedded WGSL sources; kernels concatenate the shared preludes with
/// their own body at pipeline-build time.
pub(crate) mod source {
    pub const PACKING: &str = include_str!("../shaders/packing.wgsl");
    pub const FULLSCREEN: &str = include_str!("../shaders/fullscreen.wgsl");
    pub const INTEGRATE_VELOCITY: &str = include_str!("../shaders/integrate_velocity.wgsl");
    pub const INTEGRATE_POSITION: &str = include_str!("../shaders/integrate_position.wgsl");
    pub const AGGREGATE: &str = include_str!("../shaders/aggregate.wgsl");
    pub const REDUCE: &str = include_str!("../shaders/reduce.wgsl");
    pub const TRAVERSE: &str = include_str!("../shaders/traverse.wgsl");
    pub const DEPOSIT: &str = include_str!("../shaders/deposit.wgsl");
    pub const FFT: &str = include_str!("../shaders/fft.wgsl");
    pub const POISSON: &str = include_str!("../shaders/poisson.wgsl");
    pub const GRADIENT: &str = include_str!("../shaders/gradient.wgsl");
    pub const GATHER: &str = include_str!("../shaders/gather.wgsl");
    pub const NEAR_FIELD: &str = include_str!("../shaders/near_field.wgsl");
    pub const BOUNDS: &str = include_str!("../shaders/bounds.wgsl");
}

/// Validates WGSL with naga before handing it to the device, so a bad
/// source surfaces as `ShaderCompileFailed` with the stage name and the
/// full diagnostic instead of an uncaptured device error.
pub(crate) fn compile_shader(
    context: &RenderContext,
    stage: &str,
    parts: &[&str],
) -> Result<wgpu::ShaderModule, ResourceError> {
    let joined = parts.join("\n");

    let module =
        naga::front::wgsl::parse_str(&joined).map_err(|e| ResourceError::ShaderCompileFailed {
            stage: stage.to_string(),
            log: e.emit_to_string(&joined),
        })?;
    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    validator
        .validate(&module)
        .map_err(|e| ResourceError::ShaderCompileFailed {
            stage: stage.to_string(),
            log: e.emit_to_string(&joined),
        })?;

    Ok(context
        .device
        .create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(stage),
            source: wgpu::ShaderSource::Wgsl(joined.into()),
        }))
}

pub(crate) fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub(crate) fn texture_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        count: None,
    }
}

/// Layout with a uniform buffer at binding 0 and `textures` sampled
/// textures after it; the shape every kernel here uses.
pub(crate) fn kernel_layout(
    context: &RenderContext,
    stage: &str,
    textures: u32,
) -> wgpu::BindGroupLayout {
    let mut entries = vec![uniform_entry(0)];
    for i in 0..textures {
        entries.push(texture_entry(i + 1));
    }
    context
        .device
        .create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(stage),
            entries: &entries,
        })
}

pub(crate) const ADDITIVE_BLEND: wgpu::BlendState = wgpu::BlendState {
    color: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
    alpha: wgpu::BlendComponent {
        src_factor: wgpu::BlendFactor::One,
        dst_factor: wgpu::BlendFactor::One,
        operation: wgpu::BlendOperation::Add,
    },
};

pub(crate) struct PipelineSpec<'a> {
    pub stage: &'a str,
    pub parts: &'a [&'a str],
    pub layout: &'a wgpu::BindGroupLayout,
    pub targets: &'a [Option<wgpu::ColorTargetState>],
    pub topology: wgpu::PrimitiveTopology,
}

/// Builds a render pipeline under a validation error scope; driver-side
/// rejection surfaces as `ProgramLinkFailed` with the stage name.
pub(crate) fn build_pipeline(
    context: &RenderContext,
    spec: PipelineSpec,
) -> Result<wgpu::RenderPipeline, ResourceError> {
    let module = compile_shader(context, spec.stage, spec.parts)?;
    let device = &context.device;

    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(spec.stage),
        bind_group_layouts: &[spec.layout],
        push_constant_ranges: &[],
    });

    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some(spec.stage),
        layout: Some(&layout),
        vertex: wgpu::VertexState {
            module: &module,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &module,
            entry_point: Some("fs_main"),
            targets: spec.targets,
            compilation_options: wgpu::PipelineCompilationOptions::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: spec.topology,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(ResourceError::ProgramLinkFailed {
            stage: spec.stage.to_string(),
            log: error.to_string(),
        });
    }
    Ok(pipeline)
}

pub(crate) fn uniform_buffer<T: bytemuck::Pod>(
    context: &RenderContext,
    label: &str,
    value: &T,
) -> wgpu::Buffer {
    context
        .device
        .create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::bytes_of(value),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        })
}

/// Bind groups keyed by (salt, bound texture ids). Kernels bind a handful of
/// stable textures, so the cache stays small and nothing is created on the
/// hot path after the first frame.
#[derive(Default)]
pub(crate) struct BindGroupCache {
    map: HashMap<Vec<u64>, wgpu::BindGroup>,
}

impl BindGroupCache {
    pub fn get(
        &mut self,
        context: &RenderContext,
        layout: &wgpu::BindGroupLayout,
        label: &str,
        salt: u64,
        uniforms: &wgpu::Buffer,
        textures: &[&TextureObject],
    ) -> &wgpu::BindGroup {
        let mut key = Vec::with_capacity(textures.len() + 1);
        key.push(salt);
        key.extend(textures.iter().map(|t| t.id().0));

        self.map.entry(key).or_insert_with(|| {
            let mut entries = vec![wgpu::BindGroupEntry {
                binding: 0,
                resource: uniforms.as_entire_binding(),
            }];
            for (i, texture) in textures.iter().enumerate() {
                entries.push(wgpu::BindGroupEntry {
                    binding: (i + 1) as u32,
                    resource: wgpu::BindingResource::TextureView(texture.view()),
                });
            }
            context
                .device
                .create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some(label),
                    layout,
                    entries: &entries,
                })
        })
    }
}

/// Begins a single-attachment render pass writing the whole target.
pub(crate) fn begin_pass<'a>(
    encoder: &'a mut wgpu::CommandEncoder,
    label: &str,
    target: &TextureObject,
    load: wgpu::LoadOp<wgpu::Color>,
    timestamp_writes: Option<wgpu::RenderPassTimestampWrites<'a>>,
) -> wgpu::RenderPass<'a> {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: target.view(),
            depth_slice: None,
            resolve_target: None,
            ops: wgpu::Operations {
                load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes,
        occlusion_query_set: None,
    })
}

pub(crate) const CLEAR_ZERO: wgpu::LoadOp<wgpu::Color> =
    wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT);
