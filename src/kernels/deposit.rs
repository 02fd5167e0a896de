use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::grid::GridLayout;
use crate::kernels::{
    self, ADDITIVE_BLEND, BindGroupCache, PipelineSpec, begin_pass, kernel_layout, source,
    uniform_buffer,
};
use crate::options::{Assignment, WorldBounds};
use crate::texture::TextureObject;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct DepositParams {
    bounds_min: [f32; 3],
    grid: u32,
    bounds_max: [f32; 3],
    spr: u32,
    tex_width: u32,
    particle_count: u32,
    grid_tex_size: u32,
    scheme: u32,
}

/// Particle-mesh mass deposit. CIC runs as a single instance-amplified
/// draw: eight instances per particle, one per corner of the trilinear
/// cloud; NGP draws a single instance.
pub(crate) struct DepositKernel {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    cache: BindGroupCache,
    grid: GridLayout,
    assignment: Assignment,
    particle_count: u32,
    tex_width: u32,
}

impl DepositKernel {
    pub fn new(
        context: &RenderContext,
        grid: GridLayout,
        assignment: Assignment,
        bounds: &WorldBounds,
        particle_count: u32,
        tex_width: u32,
    ) -> Result<Self, ResourceError> {
        let blend = if context.capabilities().float_blending {
            Some(ADDITIVE_BLEND)
        } else {
            log::warn!(
                "float32 blending unavailable; mass deposit degrades to last-write scatter"
            );
            None
        };

        let layout = kernel_layout(context, "deposit", 1);
        let pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "deposit",
                parts: &[source::PACKING, source::DEPOSIT],
                layout: &layout,
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::R32Float,
                    blend,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                topology: wgpu::PrimitiveTopology::PointList,
            },
        )?;

        let params = uniform_buffer(
            context,
            "deposit params",
            &Self::params_for(grid, assignment, bounds, particle_count, tex_width),
        );

        Ok(Self {
            pipeline,
            layout,
            params,
            cache: BindGroupCache::default(),
            grid,
            assignment,
            particle_count,
            tex_width,
        })
    }

    fn params_for(
        grid: GridLayout,
        assignment: Assignment,
        bounds: &WorldBounds,
        particle_count: u32,
        tex_width: u32,
    ) -> DepositParams {
        DepositParams {
            bounds_min: bounds.min.to_array(),
            grid: grid.grid_size,
            bounds_max: bounds.max.to_array(),
            spr: grid.slices_per_row,
            tex_width,
            particle_count,
            grid_tex_size: grid.tex_size,
            scheme: match assignment {
                Assignment::Ngp => 0,
                Assignment::Cic => 1,
            },
        }
    }

    pub fn update_bounds(&self, context: &RenderContext, bounds: &WorldBounds) {
        let params = Self::params_for(
            self.grid,
            self.assignment,
            bounds,
            self.particle_count,
            self.tex_width,
        );
        context
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&params));
    }

    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        positions: &TextureObject,
        mass_grid: &TextureObject,
        timestamps: Option<wgpu::RenderPassTimestampWrites>,
    ) {
        let instances = match self.assignment {
            Assignment::Ngp => 1,
            Assignment::Cic => 8,
        };
        let bind = self.cache.get(
            context,
            &self.layout,
            "deposit",
            0,
            &self.params,
            &[positions],
        );
        let mut pass = begin_pass(encoder, "deposit", mass_grid, kernels::CLEAR_ZERO, timestamps);
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind, &[]);
        pass.draw(0..self.particle_count, 0..instances);
    }
}
