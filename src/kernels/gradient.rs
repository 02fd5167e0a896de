use glam::Vec3;

use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::grid::GridLayout;
use crate::kernels::{
    self, BindGroupCache, PipelineSpec, begin_pass, kernel_layout, source, uniform_buffer,
};
use crate::texture::TextureObject;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct GradientParams {
    box_size: [f32; 3],
    grid: u32,
    axis: u32,
    spr: u32,
    _pad0: u32,
    _pad1: u32,
}

/// Turns the potential spectrum into one force spectrum per axis:
/// F_hat = -i * k_a * phi_hat.
pub(crate) struct GradientKernel {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    axis_params: [wgpu::Buffer; 3],
    cache: BindGroupCache,
    grid: GridLayout,
}

impl GradientKernel {
    pub fn new(
        context: &RenderContext,
        grid: GridLayout,
        box_size: Vec3,
    ) -> Result<Self, ResourceError> {
        let layout = kernel_layout(context, "gradient", 1);
        let pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "gradient",
                parts: &[source::PACKING, source::FULLSCREEN, source::GRADIENT],
                layout: &layout,
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rg32Float,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        )?;

        let axis_params = std::array::from_fn(|axis| {
            uniform_buffer(
                context,
                "gradient params",
                &GradientParams {
                    box_size: box_size.to_array(),
                    grid: grid.grid_size,
                    axis: axis as u32,
                    spr: grid.slices_per_row,
                    _pad0: 0,
                    _pad1: 0,
                },
            )
        });

        Ok(Self {
            pipeline,
            layout,
            axis_params,
            cache: BindGroupCache::default(),
            grid,
        })
    }

    pub fn update_box(&self, context: &RenderContext, box_size: Vec3) {
        for (axis, buffer) in self.axis_params.iter().enumerate() {
            let params = GradientParams {
                box_size: box_size.to_array(),
                grid: self.grid.grid_size,
                axis: axis as u32,
                spr: self.grid.slices_per_row,
                _pad0: 0,
                _pad1: 0,
            };
            context
                .queue
                .write_buffer(buffer, 0, bytemuck::bytes_of(&params));
        }
    }

    pub fn encode_axis(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        axis: usize,
        potential: &TextureObject,
        force_spectrum: &TextureObject,
        timestamps: Option<wgpu::RenderPassTimestampWrites>,
    ) {
        let bind = self.cache.get(
            context,
            &self.layout,
            "gradient",
            axis as u64,
            &self.axis_params[axis],
            &[potential],
        );
        let mut pass = begin_pass(
            encoder,
            "gradient",
            force_spectrum,
            kernels::CLEAR_ZERO,
            timestamps,
        );
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind, &[]);
        pass.draw(0..4, 0..1);
    }
}
