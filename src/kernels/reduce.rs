use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::grid::GridLayout;
use crate::kernels::{
    self, BindGroupCache, PipelineSpec, begin_pass, kernel_layout, source, uniform_buffer,
};
use crate::texture::TextureObject;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct ReduceParams {
    parent_grid: u32,
    parent_spr: u32,
    child_grid: u32,
    child_spr: u32,
}

/// Builds the octree pyramid: one fullscreen pass per level transition,
/// each parent voxel summing its eight children.
pub(crate) struct ReduceKernel {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    stage_params: Vec<wgpu::Buffer>,
    cache: BindGroupCache,
}

impl ReduceKernel {
    pub fn new(context: &RenderContext, layouts: &[GridLayout]) -> Result<Self, ResourceError> {
        let layout = kernel_layout(context, "reduce", 1);
        let pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "reduce",
                parts: &[source::PACKING, source::FULLSCREEN, source::REDUCE],
                layout: &layout,
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rgba32Float,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        )?;

        let stage_params = layouts
            .windows(2)
            .map(|pair| {
                uniform_buffer(
                    context,
                    "reduce params",
                    &ReduceParams {
                        parent_grid: pair[1].grid_size,
                        parent_spr: pair[1].slices_per_row,
                        child_grid: pair[0].grid_size,
                        child_spr: pair[0].slices_per_row,
                    },
                )
            })
            .collect();

        Ok(Self {
            pipeline,
            layout,
            stage_params,
            cache: BindGroupCache::default(),
        })
    }

    /// Reduces the whole pyramid, leaves first.
    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        levels: &[TextureObject],
        timestamps: [Option<wgpu::RenderPassTimestampWrites>; 2],
    ) {
        let [mut first_ts, mut last_ts] = timestamps;
        let transitions = levels.len() - 1;
        for stage in 0..transitions {
            let bind = self.cache.get(
                context,
                &self.layout,
                "reduce",
                stage as u64,
                &self.stage_params[stage],
                &[&levels[stage]],
            );
            let mut ts = if stage == 0 { first_ts.take() } else { None };
            if stage == transitions - 1 {
                ts = ts.or_else(|| last_ts.take());
            }
            let mut pass = begin_pass(
                encoder,
                "reduce",
                &levels[stage + 1],
                kernels::CLEAR_ZERO,
                ts,
            );
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, bind, &[]);
            pass.draw(0..4, 0..1);
        }
    }
}
