use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::kernels::{
    self, BindGroupCache, PipelineSpec, begin_pass, kernel_layout, source, uniform_buffer,
};
use crate::options::{SimulationOptions, WorldBounds};
use crate::texture::TextureObject;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct TraverseParams {
    bounds_min: [f32; 3],
    theta_sq: f32,
    bounds_max: [f32; 3],
    softening_sq: f32,
    gravity: f32,
    particle_count: u32,
    tex_width: u32,
    levels: u32,
}

/// Evaluates Barnes-Hut forces by walking the octree pyramid per particle.
pub(crate) struct TraverseKernel {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    cache: BindGroupCache,
    theta_sq: f32,
    softening_sq: f32,
    gravity: f32,
    particle_count: u32,
    tex_width: u32,
    levels: u32,
}

impl TraverseKernel {
    pub fn new(
        context: &RenderContext,
        options: &SimulationOptions,
        bounds: &WorldBounds,
        levels: u32,
        particle_count: u32,
        tex_width: u32,
    ) -> Result<Self, ResourceError> {
        let layout = kernel_layout(context, "traverse", 1 + levels);
        let pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "traverse",
                parts: &[source::PACKING, source::FULLSCREEN, source::TRAVERSE],
                layout: &layout,
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba32Float,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        )?;

        let theta_sq = options.theta * options.theta;
        let softening_sq = options.softening * options.softening;
        let kernel = Self {
            pipeline,
            layout,
            params: uniform_buffer(
                context,
                "traverse params",
                &TraverseParams {
                    bounds_min: bounds.min.to_array(),
                    theta_sq,
                    bounds_max: bounds.max.to_array(),
                    softening_sq,
                    gravity: options.gravity,
                    particle_count,
                    tex_width,
                    levels,
                },
            ),
            cache: BindGroupCache::default(),
            theta_sq,
            softening_sq,
            gravity: options.gravity,
            particle_count,
            tex_width,
            levels,
        };
        Ok(kernel)
    }

    pub fn update_bounds(&self, context: &RenderContext, bounds: &WorldBounds) {
        let params = TraverseParams {
            bounds_min: bounds.min.to_array(),
            theta_sq: self.theta_sq,
            bounds_max: bounds.max.to_array(),
            softening_sq: self.softening_sq,
            gravity: self.gravity,
            particle_count: self.particle_count,
            tex_width: self.tex_width,
            levels: self.levels,
        };
        context
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&params));
    }

    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        positions: &TextureObject,
        levels: &[TextureObject],
        force: &TextureObject,
        timestamps: Option<wgpu::RenderPassTimestampWrites>,
    ) {
        let mut inputs: Vec<&TextureObject> = Vec::with_capacity(levels.len() + 1);
        inputs.push(positions);
        inputs.extend(levels.iter());

        let bind = self
            .cache
            .get(context, &self.layout, "traverse", 0, &self.params, &inputs);
        let mut pass = begin_pass(encoder, "traverse", force, kernels::CLEAR_ZERO, timestamps);
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind, &[]);
        pass.draw(0..4, 0..1);
    }
}
