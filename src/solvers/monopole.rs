use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::grid::{OCTREE_LEVELS, octree_layouts};
use crate::kernels::aggregate::AggregateKernel;
use crate::kernels::reduce::ReduceKernel;
use crate::kernels::traverse::TraverseKernel;
use crate::options::{SimulationOptions, WorldBounds};
use crate::particles::ParticleTextures;
use crate::profiler::GpuProfiler;
use crate::texture::TextureObject;

/// Monopole Barnes-Hut: voxelize particles into the leaf level, reduce the
/// pyramid, then walk it per particle with the opening-angle criterion.
pub(crate) struct MonopoleSolver {
    levels: Vec<TextureObject>,
    aggregate: AggregateKernel,
    reduce: ReduceKernel,
    traverse: TraverseKernel,
}

impl MonopoleSolver {
    pub fn new(
        context: &RenderContext,
        options: &SimulationOptions,
        bounds: &WorldBounds,
        particles: &ParticleTextures,
    ) -> Result<Self, ResourceError> {
        let layouts = octree_layouts();
        let levels = layouts
            .iter()
            .map(|layout| {
                TextureObject::attachment(
                    context,
                    "octree level",
                    layout.tex_size,
                    layout.tex_size,
                    wgpu::TextureFormat::Rgba32Float,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let aggregate = AggregateKernel::new(
            context,
            layouts[0],
            bounds,
            particles.count,
            particles.width,
        )?;
        let reduce = ReduceKernel::new(context, &layouts)?;
        let traverse = TraverseKernel::new(
            context,
            options,
            bounds,
            OCTREE_LEVELS as u32,
            particles.count,
            particles.width,
        )?;

        Ok(Self {
            levels,
            aggregate,
            reduce,
            traverse,
        })
    }

    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        particles: &ParticleTextures,
        profiler: &GpuProfiler,
    ) {
        let positions = particles.position.current();

        let ts = profiler.scope("aggregate").map(|s| s.single());
        self.aggregate.encode(
            context,
            encoder,
            positions,
            &self.levels[0],
            ts.flatten(),
        );

        let span = profiler.scope("reduce");
        let (begin, end) = match &span {
            Some(s) => (s.begin(), s.end()),
            None => (None, None),
        };
        self.reduce
            .encode(context, encoder, &self.levels, [begin, end]);
        drop(span);

        let ts = profiler.scope("traverse").map(|s| s.single());
        self.traverse.encode(
            context,
            encoder,
            positions,
            &self.levels,
            &particles.force,
            ts.flatten(),
        );
    }

    pub fn update_bounds(&mut self, context: &RenderContext, bounds: &WorldBounds) {
        self.aggregate.update_bounds(context, bounds);
        self.traverse.update_bounds(context, bounds);
    }

    #[cfg(test)]
    pub(crate) fn levels(&self) -> &[TextureObject] {
        &self.levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SolverKind;
    use crate::particles::ParticleInit;
    use crate::readback::TextureReadback;

    fn rig(
        positions: Vec<f32>,
        options: &SimulationOptions,
    ) -> Option<(
        std::sync::Arc<RenderContext>,
        ParticleTextures,
        MonopoleSolver,
        WorldBounds,
    )> {
        let Ok(context) = RenderContext::new_blocking() else {
            eprintln!("skipping: no GPU adapter available");
            return None;
        };
        if !context.capabilities().float_blending {
            eprintln!("skipping: no float32 blending for additive aggregation");
            return None;
        }
        let init = ParticleInit::new(positions).unwrap();
        let bounds = WorldBounds::infer(&init.positions);
        let particles = ParticleTextures::new(&context, &init).unwrap();
        let solver = MonopoleSolver::new(&context, options, &bounds, &particles).unwrap();
        Some((context, particles, solver, bounds))
    }

    fn run_force_pass(
        context: &RenderContext,
        particles: &ParticleTextures,
        solver: &mut MonopoleSolver,
    ) -> Vec<f32> {
        let mut profiler = GpuProfiler::new(context, false);
        profiler.begin_frame();
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor::default());
        solver.encode(context, &mut encoder, particles, &profiler);
        context.queue.submit(Some(encoder.finish()));

        let readback = TextureReadback::for_texture(context, "force readback", &particles.force);
        readback.read_f32(context, &particles.force)
    }

    fn scattered_particles(count: usize, seed: u64) -> Vec<f32> {
        let mut rng = fastrand::Rng::with_seed(seed);
        let mut positions = Vec::with_capacity(count * 4);
        for _ in 0..count {
            positions.extend_from_slice(&[
                rng.f32() * 2.0 - 1.0,
                rng.f32() * 2.0 - 1.0,
                rng.f32() * 2.0 - 1.0,
                0.5 + rng.f32(),
            ]);
        }
        positions
    }

    // Story: the aggregated monopole conserves total mass at every pyramid
    // level within 1e-3 relative.
    #[test]
    fn pyramid_conserves_mass() {
        let options = SimulationOptions {
            solver: SolverKind::Monopole,
            ..Default::default()
        };
        let positions = scattered_particles(100, 11);
        let total_mass: f32 = positions.chunks_exact(4).map(|q| q[3]).sum();
        let Some((context, particles, mut solver, _)) = rig(positions, &options) else {
            return;
        };
        let _ = run_force_pass(&context, &particles, &mut solver);

        for (level, texture) in solver.levels().iter().enumerate() {
            let readback = TextureReadback::for_texture(&context, "level readback", texture);
            let texels = readback.read_f32(&context, texture);
            let level_mass: f32 = texels.chunks_exact(4).map(|t| t[3]).sum();
            let relative = (level_mass - total_mass).abs() / total_mass;
            assert!(
                relative < 1e-3,
                "level {level}: mass {level_mass} vs {total_mass}"
            );
        }
    }

    // Story: shrinking the opening angle never worsens accuracy against a
    // direct-summation reference.
    #[test]
    fn opening_angle_accuracy_is_monotonic() {
        let positions = scattered_particles(24, 3);
        let reference = direct_summation(&positions, 3e-4, 0.2);

        let mut errors = Vec::new();
        for theta in [0.9f32, 0.25] {
            let options = SimulationOptions {
                solver: SolverKind::Monopole,
                theta,
                ..Default::default()
            };
            let Some((context, particles, mut solver, _)) = rig(positions.clone(), &options)
            else {
                return;
            };
            let forces = run_force_pass(&context, &particles, &mut solver);

            let mut err = 0.0f64;
            let mut norm = 0.0f64;
            for (i, quad) in reference.iter().enumerate() {
                let gpu = &forces[i * 4..i * 4 + 3];
                for a in 0..3 {
                    err += (gpu[a] as f64 - quad[a] as f64).abs();
                    norm += quad[a].abs() as f64;
                }
            }
            errors.push(err / norm.max(1e-12));
        }

        assert!(
            errors[1] <= errors[0] + 1e-6,
            "theta=0.25 error {} vs theta=0.9 error {}",
            errors[1],
            errors[0]
        );
        // The fine traversal should be close to the direct sum outright.
        assert!(errors[1] < 0.2, "fine traversal error {}", errors[1]);
    }

    fn direct_summation(positions: &[f32], gravity: f32, softening: f32) -> Vec<[f32; 3]> {
        let count = positions.len() / 4;
        let mut forces = vec![[0.0f32; 3]; count];
        for i in 0..count {
            let pi = &positions[i * 4..i * 4 + 4];
            for j in 0..count {
                if i == j {
                    continue;
                }
                let pj = &positions[j * 4..j * 4 + 4];
                let r = [pj[0] - pi[0], pj[1] - pi[1], pj[2] - pi[2]];
                let d_sq = r[0] * r[0] + r[1] * r[1] + r[2] * r[2];
                let soft = d_sq + softening * softening;
                let inv = 1.0 / soft.sqrt();
                let scale = gravity * pj[3] * inv * inv * inv;
                for a in 0..3 {
                    forces[i][a] += scale * r[a];
                }
            }
        }
        forces
    }
}
