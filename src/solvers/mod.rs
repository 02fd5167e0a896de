//! Solver pipelines: each records the passes that turn the current position
//! plane into a per-particle force texture.

use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::options::{SimulationOptions, SolverKind, WorldBounds};
use crate::particles::ParticleTextures;
use crate::profiler::GpuProfiler;
use crate::texture::TextureObject;

pub(crate) mod monopole;
pub(crate) mod spectral;
pub(crate) mod treepm;

use monopole::MonopoleSolver;
use spectral::SpectralSolver;
use treepm::TreePmSolver;

/// Tagged solver dispatch; one variant per pipeline.
pub(crate) enum SolverPipeline {
    Monopole(MonopoleSolver),
    Spectral(SpectralSolver),
    TreePm(TreePmSolver),
}

impl SolverPipeline {
    pub fn new(
        context: &RenderContext,
        options: &SimulationOptions,
        bounds: &WorldBounds,
        particles: &ParticleTextures,
    ) -> Result<Self, ResourceError> {
        Ok(match options.solver {
            SolverKind::Monopole => {
                Self::Monopole(MonopoleSolver::new(context, options, bounds, particles)?)
            }
            SolverKind::Spectral => {
                Self::Spectral(SpectralSolver::new(context, options, bounds, particles, 0.0)?)
            }
            SolverKind::TreePm => {
                Self::TreePm(TreePmSolver::new(context, options, bounds, particles)?)
            }
        })
    }

    /// Records this frame's force evaluation into the encoder.
    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        particles: &ParticleTextures,
        profiler: &GpuProfiler,
    ) {
        match self {
            Self::Monopole(solver) => solver.encode(context, encoder, particles, profiler),
            Self::Spectral(solver) => solver.encode(context, encoder, particles, profiler),
            Self::TreePm(solver) => solver.encode(context, encoder, particles, profiler),
        }
    }

    /// The texture the integrator reads this frame's forces from.
    pub fn force_texture<'a>(&'a self, particles: &'a ParticleTextures) -> &'a TextureObject {
        match self {
            Self::TreePm(solver) if solver.hybrid_active() => solver.combined_force(),
            _ => &particles.force,
        }
    }

    pub fn update_bounds(&mut self, context: &RenderContext, bounds: &WorldBounds) {
        match self {
            Self::Monopole(solver) => solver.update_bounds(context, bounds),
            Self::Spectral(solver) => solver.update_bounds(context, bounds),
            Self::TreePm(solver) => solver.update_bounds(context, bounds),
        }
    }
}
