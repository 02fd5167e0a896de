use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::grid::GridLayout;
use crate::kernels::{
    self, BindGroupCache, PipelineSpec, begin_pass, kernel_layout, source, uniform_buffer,
};
use crate::options::{Assignment, SimulationOptions, WorldBounds};
use crate::texture::TextureObject;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct NearFieldParams {
    bounds_min: [f32; 3],
    grid: u32,
    bounds_max: [f32; 3],
    spr: u32,
    gravity: f32,
    softening_sq: f32,
    sigma: f32,
    radius: i32,
    tex_width: u32,
    particle_count: u32,
    scheme: u32,
    _pad: u32,
}

/// TreePM short-range correction: direct summation over the voxel
/// neighborhood with the complementary kernel of the Gaussian split, added
/// onto the far-field force.
pub(crate) struct NearFieldKernel {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    cache: BindGroupCache,
    base: NearFieldParams,
}

impl NearFieldKernel {
    pub fn new(
        context: &RenderContext,
        grid: GridLayout,
        options: &SimulationOptions,
        bounds: &WorldBounds,
        particle_count: u32,
        tex_width: u32,
    ) -> Result<Self, ResourceError> {
        let layout = kernel_layout(context, "near field", 3);
        let pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "near field",
                parts: &[source::PACKING, source::FULLSCREEN, source::NEAR_FIELD],
                layout: &layout,
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba32Float,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        )?;

        let base = NearFieldParams {
            bounds_min: bounds.min.to_array(),
            grid: grid.grid_size,
            bounds_max: bounds.max.to_array(),
            spr: grid.slices_per_row,
            gravity: options.gravity,
            softening_sq: options.softening * options.softening,
            sigma: options.split_sigma,
            radius: options.near_field_radius as i32,
            tex_width,
            particle_count,
            scheme: match options.assignment {
                Assignment::Ngp => 0,
                Assignment::Cic => 1,
            },
            _pad: 0,
        };
        let params = uniform_buffer(context, "near field params", &base);

        Ok(Self {
            pipeline,
            layout,
            params,
            cache: BindGroupCache::default(),
            base,
        })
    }

    pub fn update_bounds(&mut self, context: &RenderContext, bounds: &WorldBounds) {
        self.base.bounds_min = bounds.min.to_array();
        self.base.bounds_max = bounds.max.to_array();
        context
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&self.base));
    }

    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        positions: &TextureObject,
        mass_grid: &TextureObject,
        far_force: &TextureObject,
        combined: &TextureObject,
        timestamps: Option<wgpu::RenderPassTimestampWrites>,
    ) {
        let bind = self.cache.get(
            context,
            &self.layout,
            "near field",
            0,
            &self.params,
            &[positions, mass_grid, far_force],
        );
        let mut pass = begin_pass(
            encoder,
            "near field",
            combined,
            kernels::CLEAR_ZERO,
            timestamps,
        );
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind, &[]);
        pass.draw(0..4, 0..1);
    }
}
