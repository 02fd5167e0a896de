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
struct PoissonParams {
    box_size: [f32; 3],
    grid: u32,
    four_pi_g: f32,
    sigma: f32,
    spr: u32,
    _pad: u32,
}

/// Converts the density spectrum into a potential spectrum with the DC bin
/// zeroed; `sigma > 0` applies the TreePM far-field low-pass.
pub(crate) struct PoissonKernel {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    params: wgpu::Buffer,
    cache: BindGroupCache,
    grid: GridLayout,
    four_pi_g: f32,
    sigma: f32,
}

impl PoissonKernel {
    pub fn new(
        context: &RenderContext,
        grid: GridLayout,
        gravity: f32,
        sigma: f32,
        box_size: Vec3,
    ) -> Result<Self, ResourceError> {
        let layout = kernel_layout(context, "poisson", 1);
        let pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "poisson",
                parts: &[source::PACKING, source::FULLSCREEN, source::POISSON],
                layout: &layout,
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rg32Float,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        )?;

        let four_pi_g = 4.0 * std::f32::consts::PI * gravity;
        let params = uniform_buffer(
            context,
            "poisson params",
            &PoissonParams {
                box_size: box_size.to_array(),
                grid: grid.grid_size,
                four_pi_g,
                sigma,
                spr: grid.slices_per_row,
                _pad: 0,
            },
        );

        Ok(Self {
            pipeline,
            layout,
            params,
            cache: BindGroupCache::default(),
            grid,
            four_pi_g,
            sigma,
        })
    }

    pub fn update_box(&self, context: &RenderContext, box_size: Vec3) {
        let params = PoissonParams {
            box_size: box_size.to_array(),
            grid: self.grid.grid_size,
            four_pi_g: self.four_pi_g,
            sigma: self.sigma,
            spr: self.grid.slices_per_row,
            _pad: 0,
        };
        context
            .queue
            .write_buffer(&self.params, 0, bytemuck::bytes_of(&params));
    }

    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        density: &TextureObject,
        potential: &TextureObject,
        timestamps: Option<wgpu::RenderPassTimestampWrites>,
    ) {
        let bind = self
            .cache
            .get(context, &self.layout, "poisson", 0, &self.params, &[density]);
        let mut pass = begin_pass(encoder, "poisson", potential, kernels::CLEAR_ZERO, timestamps);
        pass.set_pipeline(&self.pipeline);
        pass.set_bind_group(0, bind, &[]);
        pass.draw(0..4, 0..1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readback::TextureReadback;

    // Story: the DC bin of the potential spectrum is written (0, 0)
    // exactly, whatever the density spectrum holds there.
    #[test]
    fn dc_bin_is_zeroed_exactly() {
        let Ok(context) = RenderContext::new_blocking() else {
            eprintln!("skipping: no GPU adapter available");
            return;
        };
        let grid = GridLayout::new(8);
        let kernel =
            PoissonKernel::new(&context, grid, 3e-4, 0.0, Vec3::splat(1.0)).unwrap();

        let attach = |stage: &str| {
            TextureObject::attachment(
                &context,
                stage,
                grid.tex_size,
                grid.tex_size,
                wgpu::TextureFormat::Rg32Float,
            )
            .unwrap()
        };
        let density = attach("poisson test density");
        let potential = attach("poisson test potential");

        // A spectrum that is non-zero everywhere, including DC.
        let texels = vec![1.5f32; (grid.tex_size * grid.tex_size * 2) as usize];
        density.upload(&context, bytemuck::cast_slice(&texels));

        let mut kernel = kernel;
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        kernel.encode(&context, &mut encoder, &density, &potential, None);
        context.queue.submit(Some(encoder.finish()));

        let readback = TextureReadback::for_texture(&context, "poisson test", &potential);
        let out = readback.read_f32(&context, &potential);

        // DC bin: exactly zero, both components.
        assert_eq!(out[0], 0.0);
        assert_eq!(out[1], 0.0);

        // A non-DC bin gets a finite negative-real multiple of the input.
        let t = grid.voxel_to_texel([1, 0, 0]);
        let i = ((t[1] * grid.tex_size + t[0]) * 2) as usize;
        assert!(out[i].is_finite() && out[i] < 0.0);
    }

    // Story: the Gaussian split suppresses high wavenumbers more than low
    // ones, relative to the unsplit solve.
    #[test]
    fn gaussian_split_lowpasses_the_far_field() {
        let Ok(context) = RenderContext::new_blocking() else {
            eprintln!("skipping: no GPU adapter available");
            return;
        };
        let grid = GridLayout::new(8);
        let attach = |stage: &str| {
            TextureObject::attachment(
                &context,
                stage,
                grid.tex_size,
                grid.tex_size,
                wgpu::TextureFormat::Rg32Float,
            )
            .unwrap()
        };
        let density = attach("poisson split density");
        let potential = attach("poisson split potential");
        let texels = vec![1.0f32; (grid.tex_size * grid.tex_size * 2) as usize];
        density.upload(&context, bytemuck::cast_slice(&texels));

        let solve = |sigma: f32| {
            let mut kernel =
                PoissonKernel::new(&context, grid, 3e-4, sigma, Vec3::splat(1.0)).unwrap();
            let mut encoder = context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
            kernel.encode(&context, &mut encoder, &density, &potential, None);
            context.queue.submit(Some(encoder.finish()));
            let readback = TextureReadback::for_texture(&context, "poisson split", &potential);
            readback.read_f32(&context, &potential)
        };

        let plain = solve(0.0);
        let split = solve(0.1);

        let bin = |out: &[f32], v: [u32; 3]| {
            let t = grid.voxel_to_texel(v);
            out[((t[1] * grid.tex_size + t[0]) * 2) as usize]
        };
        let low_ratio = bin(&split, [1, 0, 0]) / bin(&plain, [1, 0, 0]);
        let high_ratio = bin(&split, [4, 0, 0]) / bin(&plain, [4, 0, 0]);
        assert!(low_ratio > 0.0 && low_ratio <= 1.0);
        assert!(
            high_ratio < low_ratio,
            "high-k ratio {high_ratio} not below low-k ratio {low_ratio}"
        );
    }
}
