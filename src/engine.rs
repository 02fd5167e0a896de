use std::collections::HashMap;
use std::sync::Arc;

use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::kernels::bounds::BoundsKernel;
use crate::kernels::integrate::IntegrateKernel;
use crate::options::{SimulationOptions, WorldBounds};
use crate::particles::{ParticleInit, ParticleTextures};
use crate::profiler::GpuProfiler;
use crate::readback::TextureReadback;
use crate::solvers::SolverPipeline;

/// Margin added around the sampled box on every bounds refresh.
const BOUNDS_MARGIN: f32 = 0.05;

struct EngineState {
    particles: ParticleTextures,
    solver: SolverPipeline,
    integrator: IntegrateKernel,
    bounds_kernel: BoundsKernel,
    bounds: WorldBounds,
    profiler: GpuProfiler,
    plane_readback: TextureReadback,
}

/// The host-facing engine.
///
/// Owns every GPU resource; the renderer only ever receives stable texture
/// handles. One `step()` runs one solver pass plus one kick-drift
/// integration; `dispose()` releases everything exactly once.
pub struct Simulation {
    context: Arc<RenderContext>,
    options: SimulationOptions,
    state: Option<EngineState>,
    frame: u64,
}

impl Simulation {
    /// Validates the configuration and input arrays, allocates every
    /// texture and pipeline, and uploads the initial state. Renders
    /// nothing. On any error all partially-built resources are released
    /// before the error is returned.
    pub fn new(
        context: Arc<RenderContext>,
        options: SimulationOptions,
        init: ParticleInit,
    ) -> Result<Self, ResourceError> {
        options.validate()?;

        let bounds = match options.world_bounds {
            Some(bounds) => bounds,
            None => WorldBounds::infer(&init.positions),
        };

        let particles = ParticleTextures::new(&context, &init)?;
        let solver = SolverPipeline::new(&context, &options, &bounds, &particles)?;
        let integrator =
            IntegrateKernel::new(&context, &options, particles.count, particles.width)?;
        let bounds_kernel =
            BoundsKernel::new(&context, particles.width, particles.height, particles.count)?;
        let profiler = GpuProfiler::new(&context, options.enable_profiling);
        let plane_readback = TextureReadback::for_texture(
            &context,
            "particle plane readback",
            particles.position.current(),
        );

        Ok(Self {
            context,
            options,
            state: Some(EngineState {
                particles,
                solver,
                integrator,
                bounds_kernel,
                bounds,
                profiler,
                plane_readback,
            }),
            frame: 0,
        })
    }

    /// Advances the simulation by one step: solver force pass, velocity
    /// kick, position drift, ping-pong swap. A no-op after `dispose()`.
    pub fn step(&mut self) {
        let Some(state) = &mut self.state else {
            return;
        };

        if self.frame > 0 && self.frame % self.options.bounds_interval as u64 == 0 {
            Self::refresh_bounds(&self.context, state);
        }

        state.profiler.begin_frame();
        let mut encoder =
            self.context
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                    label: Some("simulation step"),
                });

        state
            .solver
            .encode(&self.context, &mut encoder, &state.particles, &state.profiler);

        let force = state.solver.force_texture(&state.particles);
        let ts = [
            state
                .profiler
                .scope("integrate velocity")
                .map(|s| s.single())
                .flatten(),
            state
                .profiler
                .scope("integrate position")
                .map(|s| s.single())
                .flatten(),
        ];
        state
            .integrator
            .encode(&self.context, &mut encoder, &state.particles, force, ts);

        state.profiler.resolve(&mut encoder);
        self.context.queue.submit(Some(encoder.finish()));
        state.profiler.end_frame(&self.context);

        state.particles.velocity.swap();
        state.particles.position.swap();
        self.frame += 1;
    }

    /// Samples the current positions on the GPU and grows or shrinks the
    /// world box with hysteresis: grow whenever the sampled box pokes out,
    /// shrink only when it collapses below half the current extent.
    fn refresh_bounds(context: &RenderContext, state: &mut EngineState) {
        let sampled = state.bounds_kernel.estimate(
            context,
            state.particles.position.current(),
            BOUNDS_MARGIN,
        );
        let Some(sampled) = sampled else { return };

        let current = state.bounds;
        let grew = sampled.min.cmplt(current.min).any() || sampled.max.cmpgt(current.max).any();
        let shrank = (sampled.extent() * 2.0).cmplt(current.extent()).any();
        if grew || shrank {
            let merged = if grew && !shrank {
                WorldBounds::new(
                    sampled.min.min(current.min),
                    sampled.max.max(current.max),
                )
            } else {
                sampled
            };
            state.bounds = merged;
            state.solver.update_bounds(context, &merged);
        }
    }

    /// Both position planes; handles are stable for the engine's lifetime.
    pub fn position_textures(&self) -> Option<[&wgpu::TextureView; 2]> {
        let state = self.state.as_ref()?;
        Some([
            state.particles.position.get(0).view(),
            state.particles.position.get(1).view(),
        ])
    }

    /// The authoritative position plane for this frame.
    pub fn position_texture(&self) -> Option<&wgpu::TextureView> {
        Some(self.state.as_ref()?.particles.position.current().view())
    }

    /// Index of the authoritative plane within `position_textures()`.
    pub fn current_index(&self) -> usize {
        self.state
            .as_ref()
            .map(|s| s.particles.position.index())
            .unwrap_or(0)
    }

    pub fn color_texture(&self) -> Option<&wgpu::TextureView> {
        Some(self.state.as_ref()?.particles.color.view())
    }

    /// Particle plane dimensions (W, H); index i lives at
    /// (i mod W, i div W).
    pub fn texture_size(&self) -> (u32, u32) {
        self.state
            .as_ref()
            .map(|s| (s.particles.width, s.particles.height))
            .unwrap_or((0, 0))
    }

    /// Average milliseconds per profiled pass group; empty when profiling
    /// is off or the timer capability is absent.
    pub fn stats(&self) -> HashMap<String, f32> {
        self.state
            .as_ref()
            .map(|s| s.profiler.stats())
            .unwrap_or_default()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame
    }

    /// Uncaptured device errors absorbed since construction.
    pub fn device_error_count(&self) -> u64 {
        self.context.device_error_count()
    }

    /// Blocking debug readback of the current position plane as
    /// `[x, y, z, mass]` quads (padding texels included).
    pub fn read_positions(&self) -> Vec<f32> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        state
            .plane_readback
            .read_f32(&self.context, state.particles.position.current())
    }

    /// Blocking debug readback of the current velocity plane.
    pub fn read_velocities(&self) -> Vec<f32> {
        let Some(state) = &self.state else {
            return Vec::new();
        };
        state
            .plane_readback
            .read_f32(&self.context, state.particles.velocity.current())
    }

    /// Releases all GPU resources; idempotent, also runs on drop.
    pub fn dispose(&mut self) {
        self.state = None;
    }

    pub fn is_disposed(&self) -> bool {
        self.state.is_none()
    }

    /// The current world box; useful for fitting a camera.
    pub fn world_bounds(&self) -> Option<WorldBounds> {
        self.state.as_ref().map(|s| s.bounds)
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.dispose();
    }
}
