use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::grid::GridLayout;
use crate::kernels::{
    self, ADDITIVE_BLEND, BindGroupCache, PipelineSpec, begin_pass, kernel_layout, source,
    uniform_buffer,
};
use crate::options::WorldBounds;
use crate::texture::TextureObject;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct AggregateParams {
    bounds_min: [f32; 3],
    grid: u32,
    bounds_max: [f32; 3],
    spr: u32,
    tex_width: u32,
    particle_count: u32,
    level_tex_size: u32,
    _pad: u32,
}

/// Scatters one point per particle into the octree leaf grid, accumulating
/// the mass-weighted monopole with additive blending. Without float
/// blending the pass falls back to plain writes (last particle per voxel
/// wins); the degradation is logged once, never raised.
pub(crate) struct AggregateKernel {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    cache: BindGroupCache,
    leaf: GridLayout,
    particle_count: u32,
    tex_width: u32,
}

impl AggregateKernel {
    pub fn new(
        context: &RenderContext,
        leaf: GridLayout,
        bounds: &WorldBounds,
        particle_count: u32,
        tex_width: u32,
    ) -> Result<Self, ResourceError> {
        let blend = if context.capabilities().float_blending {
            Some(ADDITIVE_BLEND)
        } else {
            log::warn!(
                "float32 blending unavailable; octree aggregation degrades to last-write scatter"
            );
            None
        };

        let layout = kernel_layout(context, "aggregate", 1);
        let pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "aggregate",
                parts: &[source::PACKING, source::AGGREGATE],
                layout: &layout,
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba32Float,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                topology: wgpu::PrimitiveTopology::PointList,
            },
        )?;

        let params = uniform_buffer(
            context,
            "aggregate params",
            &Self::params_for(leaf, bounds, particle_count, tex_width),
        );

        Ok(Self {
            pipeline,
            layout,
            params,
            cache: BindGroupCache::default(),
            leaf,
            particle_count,
            tex_width,
        })
    }

    fn params_for(
        leaf: GridLayout,
        bounds: &WorldBounds,
        particle_count: u32,
        tex_width: u32,
    ) -> AggregateParams {
        AggregateParams {
            bounds_min: bounds.min.to_array(),
            grid: leaf.grid_size,
            bounds_max: bounds.max.to_array(),
            spr: leaf.slices_per_row,
            tex_width,
            particle_count,
            level_tex_size: leaf.tex_size,
            _pad: 0,
        }
    }

    pub fn update_bounds(&self, context: &RenderContext, bounds: &WorldBounds) {
        let params = Self::params_for(self.leaf, bounds, self.particle_count, self.tex_width);
        context
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&params));
    }

    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        positions: &TextureObject,
        level0: &TextureObject,
        timestamps: Option<wgpu::RenderPassTimestampWrites>,
    ) {
        let bind = self.cache.get(
            context,
            &self.layout,
            "aggregate",
            0,
            &self.params,
            &[positions],
        );
        let mut pass = begin_pass(encoder, "aggregate", level0, kernels::CLEAR_ZERO, timestamps);
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind, &[]);
        pass.draw(0..self.particle_count, 0..1);
    }
}
