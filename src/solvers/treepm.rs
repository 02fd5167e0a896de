use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::grid::GridLayout;
use crate::kernels::near_field::NearFieldKernel;
use crate::options::{SimulationOptions, WorldBounds};
use crate::particles::ParticleTextures;
use crate::profiler::GpuProfiler;
use crate::solvers::spectral::SpectralSolver;
use crate::texture::TextureObject;

/// TreePM hybrid: the spectral pipeline computes the Gaussian-smoothed far
/// field, then a short-range scan over the un-smoothed mass grid adds the
/// complementary correction. With the split disabled it degenerates to the
/// plain spectral solver.
pub(crate) struct TreePmSolver {
    spectral: SpectralSolver,
    near_field: Option<NearFieldKernel>,
    combined: TextureObject,
}

impl TreePmSolver {
    pub fn new(
        context: &RenderContext,
        options: &SimulationOptions,
        bounds: &WorldBounds,
        particles: &ParticleTextures,
    ) -> Result<Self, ResourceError> {
        let hybrid = options.hybrid_enabled();
        let sigma = if hybrid { options.split_sigma } else { 0.0 };
        let spectral = SpectralSolver::new(context, options, bounds, particles, sigma)?;

        let near_field = hybrid
            .then(|| {
                NearFieldKernel::new(
                    context,
                    GridLayout::new(options.grid_size),
                    options,
                    bounds,
                    particles.count,
                    particles.width,
                )
            })
            .transpose()?;

        let combined = TextureObject::attachment(
            context,
            "combined force plane",
            particles.width,
            particles.height,
            wgpu::TextureFormat::Rgba32Float,
        )?;

        Ok(Self {
            spectral,
            near_field,
            combined,
        })
    }

    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        particles: &ParticleTextures,
        profiler: &GpuProfiler,
    ) {
        self.spectral.encode(context, encoder, particles, profiler);

        if let Some(near_field) = &mut self.near_field {
            let ts = profiler.scope("near field").map(|s| s.single());
            near_field.encode(
                context,
                encoder,
                particles.position.current(),
                self.spectral.mass_grid(),
                &particles.force,
                &self.combined,
                ts.flatten(),
            );
        }
    }

    /// Where the integrator reads forces: the combined texture when the
    /// hybrid ran, the far field alone otherwise.
    pub fn combined_force(&self) -> &TextureObject {
        &self.combined
    }

    pub fn hybrid_active(&self) -> bool {
        self.near_field.is_some()
    }

    pub fn update_bounds(&mut self, context: &RenderContext, bounds: &WorldBounds) {
        self.spectral.update_bounds(context, bounds);
        if let Some(near_field) = &mut self.near_field {
            near_field.update_bounds(context, bounds);
        }
    }
}
