use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::grid::GridLayout;
use crate::kernels::{
    self, BindGroupCache, PipelineSpec, begin_pass, kernel_layout, source, uniform_buffer,
};
use crate::options::WorldBounds;
use crate::texture::TextureObject;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct GatherParams {
    bounds_min: [f32; 3],
    grid: u32,
    bounds_max: [f32; 3],
    spr: u32,
    tex_width: u32,
    particle_count: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Samples the three real force grids at each particle's fractional grid
/// position (trilinear) and writes the per-particle force plane.
pub(crate) struct GatherKernel {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    cache: BindGroupCache,
    grid: GridLayout,
    particle_count: u32,
    tex_width: u32,
}

impl GatherKernel {
    pub fn new(
        context: &RenderContext,
        grid: GridLayout,
        bounds: &WorldBounds,
        particle_count: u32,
        tex_width: u32,
    ) -> Result<Self, ResourceError> {
        let layout = kernel_layout(context, "gather", 4);
        let pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "gather",
                parts: &[source::PACKING, source::FULLSCREEN, source::GATHER],
                layout: &layout,
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba32Float,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        )?;

        let params = uniform_buffer(
            context,
            "gather params",
            &Self::params_for(grid, bounds, particle_count, tex_width),
        );

        Ok(Self {
            pipeline,
            layout,
            params,
            cache: BindGroupCache::default(),
            grid,
            particle_count,
            tex_width,
        })
    }

    fn params_for(
        grid: GridLayout,
        bounds: &WorldBounds,
        particle_count: u32,
        tex_width: u32,
    ) -> GatherParams {
        GatherParams {
            bounds_min: bounds.min.to_array(),
            grid: grid.grid_size,
            bounds_max: bounds.max.to_array(),
            spr: grid.slices_per_row,
            tex_width,
            particle_count,
            _pad0: 0,
            _pad1: 0,
        }
    }

    pub fn update_bounds(&self, context: &RenderContext, bounds: &WorldBounds) {
        let params = Self::params_for(self.grid, bounds, self.particle_count, self.tex_width);
        context
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&params));
    }

    #[allow(clippy::too_many_arguments)]
    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        positions: &TextureObject,
        force_grids: [&TextureObject; 3],
        force_plane: &TextureObject,
        timestamps: Option<wgpu::RenderPassTimestampWrites>,
    ) {
        let [fx, fy, fz] = force_grids;
        let bind = self.cache.get(
            context,
            &self.layout,
            "gather",
            0,
            &self.params,
            &[positions, fx, fy, fz],
        );
        let mut pass = begin_pass(
            encoder,
            "gather",
            force_plane,
            kernels::CLEAR_ZERO,
            timestamps,
        );
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind, &[]);
        pass.draw(0..4, 0..1);
    }
}
