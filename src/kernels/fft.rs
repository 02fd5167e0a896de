use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::grid::GridLayout;
use crate::kernels::{
    self, BindGroupCache, PipelineSpec, begin_pass, kernel_layout, source, uniform_buffer,
};
use crate::texture::TextureObject;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FftParams {
    grid: u32,
    spr: u32,
    axis: u32,
    subsize: u32,
    dir: f32,
    scale: f32,
    promote_real: u32,
    _pad: u32,
}

/// 3D radix-2 Stockham FFT as a chain of fullscreen butterfly passes,
/// ping-ponging between two complex textures.
///
/// The forward transform promotes the real mass grid and applies the
/// mass-to-density scale in its first stage; the inverse divides by N in the
/// last stage of each axis (1/N^3 total) and writes its final stage straight
/// into a real grid. All stage parameters are static buffers except the
/// mass-to-density scale, which is rewritten when the world box changes.
pub(crate) struct FftKernel {
    complex_pipeline: wgpu::RenderPipeline,
    real_out_pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    grid: GridLayout,
    stages_per_axis: u32,
    forward_params: Vec<wgpu::Buffer>,
    inverse_params: Vec<wgpu::Buffer>,
    cache: BindGroupCache,
}

impl FftKernel {
    pub fn new(context: &RenderContext, grid: GridLayout) -> Result<Self, ResourceError> {
        debug_assert!(grid.grid_size.is_power_of_two());
        let stages_per_axis = grid.grid_size.trailing_zeros();

        let layout = kernel_layout(context, "fft", 1);
        let parts = &[source::PACKING, source::FULLSCREEN, source::FFT];
        let complex_pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "fft butterfly",
                parts,
                layout: &layout,
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::Rg32Float,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        )?;
        // Same shader; the last inverse stage lands in a single-channel real
        // grid, which keeps the real part and drops the (zero) imaginary.
        let real_out_pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "fft final stage",
                parts,
                layout: &layout,
                targets: &[Some(wgpu::ColorTargetState {
                    format: wgpu::TextureFormat::R32Float,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        )?;

        let mut forward_params = Vec::new();
        let mut inverse_params = Vec::new();
        for axis in 0..3u32 {
            for stage in 0..stages_per_axis {
                let subsize = 2u32 << stage;
                forward_params.push(uniform_buffer(
                    context,
                    "fft forward params",
                    &FftParams {
                        grid: grid.grid_size,
                        spr: grid.slices_per_row,
                        axis,
                        subsize,
                        dir: -1.0,
                        scale: 1.0,
                        promote_real: (axis == 0 && stage == 0) as u32,
                        _pad: 0,
                    },
                ));
                inverse_params.push(uniform_buffer(
                    context,
                    "fft inverse params",
                    &FftParams {
                        grid: grid.grid_size,
                        spr: grid.slices_per_row,
                        axis,
                        subsize,
                        dir: 1.0,
                        scale: if stage == stages_per_axis - 1 {
                            1.0 / grid.grid_size as f32
                        } else {
                            1.0
                        },
                        promote_real: 0,
                        _pad: 0,
                    },
                ));
            }
        }

        Ok(Self {
            complex_pipeline,
            real_out_pipeline,
            layout,
            grid,
            stages_per_axis,
            forward_params,
            inverse_params,
            cache: BindGroupCache::default(),
        })
    }

    pub fn total_stages(&self) -> u32 {
        3 * self.stages_per_axis
    }

    /// Rewrites the first forward stage's scale: 1/dV with dV the cell
    /// volume of the current world box.
    pub fn update_mass_scale(&self, context: &RenderContext, cell_volume: f32) {
        let params = FftParams {
            grid: self.grid.grid_size,
            spr: self.grid.slices_per_row,
            axis: 0,
            subsize: 2,
            dir: -1.0,
            scale: 1.0 / cell_volume.max(1e-12),
            promote_real: 1,
            _pad: 0,
        };
        context
            .queue
            .write_buffer(&self.forward_params[0], 0, bytemuck::bytes_of(&params));
    }

    fn encode_stage(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        params_index: usize,
        inverse: bool,
        src: &TextureObject,
        dst: &TextureObject,
        real_out: bool,
        timestamps: Option<wgpu::RenderPassTimestampWrites>,
    ) {
        let params = if inverse {
            &self.inverse_params[params_index]
        } else {
            &self.forward_params[params_index]
        };
        let salt = (params_index as u64) << 2 | (inverse as u64) << 1 | real_out as u64;
        let bind = self
            .cache
            .get(context, &self.layout, "fft stage", salt, params, &[src]);
        let mut pass = begin_pass(encoder, "fft stage", dst, kernels::CLEAR_ZERO, timestamps);
        pass.set_pipeline(if real_out {
            &self.real_out_pipeline
        } else {
            &self.complex_pipeline
        });
        pass.set_bind_group(0, bind, &[]);
        pass.draw(0..4, 0..1);
    }

    /// Forward 3D transform of the real mass grid. Returns 0 if the
    /// spectrum landed in `ping`, 1 for `pong`; the other texture is
    /// scratch.
    pub fn encode_forward(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        mass_grid: &TextureObject,
        ping: &TextureObject,
        pong: &TextureObject,
        mut timestamps: [Option<wgpu::RenderPassTimestampWrites>; 2],
    ) -> usize {
        let total = self.total_stages() as usize;
        for stage in 0..total {
            let src = if stage == 0 {
                mass_grid
            } else if stage % 2 == 1 {
                ping
            } else {
                pong
            };
            let dst = if stage % 2 == 0 { ping } else { pong };
            let mut ts = if stage == 0 { timestamps[0].take() } else { None };
            if stage == total - 1 {
                ts = ts.or_else(|| timestamps[1].take());
            }
            self.encode_stage(context, encoder, stage, false, src, dst, false, ts);
        }
        (total - 1) % 2
    }

    /// Inverse 3D transform of one force-spectrum component into its real
    /// grid. `spectrum` and `scratch` are both consumed as ping-pong
    /// scratch; the final stage writes `real_out`.
    pub fn encode_inverse(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        spectrum: &TextureObject,
        scratch: &TextureObject,
        real_out: &TextureObject,
        mut timestamps: [Option<wgpu::RenderPassTimestampWrites>; 2],
    ) {
        let total = self.total_stages() as usize;
        for stage in 0..total {
            let src = if stage == 0 {
                spectrum
            } else if stage % 2 == 1 {
                scratch
            } else {
                spectrum
            };
            let last = stage == total - 1;
            let dst = if last {
                real_out
            } else if stage % 2 == 0 {
                scratch
            } else {
                spectrum
            };
            let mut ts = if stage == 0 { timestamps[0].take() } else { None };
            if last {
                ts = ts.or_else(|| timestamps[1].take());
            }
            self.encode_stage(context, encoder, stage, true, src, dst, last, ts);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::readback::TextureReadback;

    const N: u32 = 8;

    struct FftRig {
        context: std::sync::Arc<RenderContext>,
        grid: GridLayout,
        fft: FftKernel,
        mass: TextureObject,
        ping: TextureObject,
        pong: TextureObject,
        real_out: TextureObject,
    }

    impl FftRig {
        fn new() -> Option<Self> {
            let Ok(context) = RenderContext::new_blocking() else {
                eprintln!("skipping: no GPU adapter available");
                return None;
            };
            let grid = GridLayout::new(N);
            let fft = FftKernel::new(&context, grid).unwrap();
            // Unit mass-to-density scale: the tests exercise the bare DFT.
            fft.update_mass_scale(&context, 1.0);
            let attach = |stage: &str, format| {
                TextureObject::attachment(&context, stage, grid.tex_size, grid.tex_size, format)
                    .unwrap()
            };
            Some(Self {
                mass: attach("fft test mass", wgpu::TextureFormat::R32Float),
                ping: attach("fft test ping", wgpu::TextureFormat::Rg32Float),
                pong: attach("fft test pong", wgpu::TextureFormat::Rg32Float),
                real_out: attach("fft test out", wgpu::TextureFormat::R32Float),
                context,
                grid,
                fft,
            })
        }

        /// Uploads per-voxel values (padding texels zeroed) and runs the
        /// forward transform; returns the spectrum texel data.
        fn forward(&mut self, voxels: &[f32]) -> Vec<f32> {
            let mut texels = vec![0.0f32; (self.grid.tex_size * self.grid.tex_size) as usize];
            for (i, texel) in texels.iter_mut().enumerate() {
                let t = [i as u32 % self.grid.tex_size, i as u32 / self.grid.tex_size];
                if let Some(v) = self.grid.texel_to_voxel(t) {
                    let index = (v[2] * N * N + v[1] * N + v[0]) as usize;
                    *texel = voxels[index];
                }
            }
            self.mass.upload(&self.context, bytemuck::cast_slice(&texels));

            let mut encoder = self
                .context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
            let result = self.fft.encode_forward(
                &self.context,
                &mut encoder,
                &self.mass,
                &self.ping,
                &self.pong,
                [None, None],
            );
            self.context.queue.submit(Some(encoder.finish()));

            let spectrum = if result == 0 { &self.ping } else { &self.pong };
            let readback = TextureReadback::for_texture(&self.context, "fft test", spectrum);
            readback.read_f32(&self.context, spectrum)
        }

        /// Runs forward then inverse and returns the per-voxel real output.
        fn round_trip(&mut self, voxels: &[f32]) -> Vec<f32> {
            let _ = self.forward(voxels);
            let result = (self.fft.total_stages() as usize - 1) % 2;
            let (spectrum, scratch) = if result == 0 {
                (&self.ping, &self.pong)
            } else {
                (&self.pong, &self.ping)
            };

            let mut encoder = self
                .context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
            self.fft.encode_inverse(
                &self.context,
                &mut encoder,
                spectrum,
                scratch,
                &self.real_out,
                [None, None],
            );
            self.context.queue.submit(Some(encoder.finish()));

            let readback = TextureReadback::for_texture(&self.context, "fft test", &self.real_out);
            let texels = readback.read_f32(&self.context, &self.real_out);
            let mut voxels_out = vec![0.0f32; (N * N * N) as usize];
            for (i, texel) in texels.iter().enumerate() {
                let t = [i as u32 % self.grid.tex_size, i as u32 / self.grid.tex_size];
                if let Some(v) = self.grid.texel_to_voxel(t) {
                    voxels_out[(v[2] * N * N + v[1] * N + v[0]) as usize] = *texel;
                }
            }
            voxels_out
        }
    }

    // Story: a uniform unit grid transforms to a spectrum whose DC bin is
    // the voxel count and whose other bins vanish.
    #[test]
    fn forward_dc_bin_sums_input()  {
        let Some(mut rig) = FftRig::new() else { return };
        let voxels = vec![1.0f32; (N * N * N) as usize];
        let spectrum = rig.forward(&voxels);

        // DC bin is voxel (0,0,0) = texel (0,0) = first rg pair.
        let dc = (spectrum[0], spectrum[1]);
        assert!((dc.0 - (N * N * N) as f32).abs() <= 1.0, "dc = {dc:?}");
        assert!(dc.1.abs() <= 1e-2);

        // Any other valid bin should be ~zero for constant input.
        let t = rig.grid.voxel_to_texel([3, 2, 5]);
        let i = ((t[1] * rig.grid.tex_size + t[0]) * 2) as usize;
        assert!(spectrum[i].abs() < 1e-2 && spectrum[i + 1].abs() < 1e-2);
    }

    // Story: total spectral energy is positive and finite for non-zero
    // input.
    #[test]
    fn spectrum_is_finite_with_positive_energy() {
        let Some(mut rig) = FftRig::new() else { return };
        let voxels: Vec<f32> = (0..N * N * N).map(|i| ((i % 13) as f32) * 0.25).collect();
        let spectrum = rig.forward(&voxels);

        let energy: f64 = spectrum.iter().map(|v| (*v as f64) * (*v as f64)).sum();
        assert!(energy > 0.0);
        assert!(spectrum.iter().all(|v| v.is_finite()));
    }

    // Story: forward then inverse recovers the input within 1e-4 per voxel.
    #[test]
    fn round_trip_recovers_input() {
        let Some(mut rig) = FftRig::new() else { return };
        let mut rng = fastrand::Rng::with_seed(7);
        let voxels: Vec<f32> = (0..N * N * N).map(|_| rng.f32() * 4.0 - 2.0).collect();

        let recovered = rig.round_trip(&voxels);
        for (i, (a, b)) in voxels.iter().zip(&recovered).enumerate() {
            assert!(
                (a - b).abs() < 1e-4,
                "voxel {i}: expected {a}, got {b}"
            );
        }
    }
}
