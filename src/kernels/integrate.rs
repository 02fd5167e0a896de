use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::kernels::{
    self, BindGroupCache, PipelineSpec, begin_pass, kernel_layout, source, uniform_buffer,
};
use crate::options::SimulationOptions;
use crate::particles::ParticleTextures;
use crate::texture::TextureObject;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct VelocityParams {
    dt: f32,
    damping: f32,
    max_speed: f32,
    max_accel: f32,
    particle_count: u32,
    tex_width: u32,
    _pad0: u32,
    _pad1: u32,
}

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct PositionParams {
    dt: f32,
    particle_count: u32,
    tex_width: u32,
    _pad: u32,
}

/// Kick-drift integrator: a velocity pass (clamped kick) followed by a
/// position pass (drift) over the particle planes. The caller swaps both
/// ping-pong pairs after the passes are submitted.
pub(crate) struct IntegrateKernel {
    velocity_pipeline: wgpu::RenderPipeline,
    position_pipeline: wgpu::RenderPipeline,
    velocity_layout: wgpu::BindGroupLayout,
    position_layout: wgpu::BindGroupLayout,
    velocity_params: wgpu::Buffer,
    position_params: wgpu::Buffer,
    velocity_cache: BindGroupCache,
    position_cache: BindGroupCache,
}

impl IntegrateKernel {
    pub fn new(
        context: &RenderContext,
        options: &SimulationOptions,
        particle_count: u32,
        tex_width: u32,
    ) -> Result<Self, ResourceError> {
        let velocity_layout = kernel_layout(context, "integrate velocity", 2);
        let position_layout = kernel_layout(context, "integrate position", 2);

        let particle_target = [Some(wgpu::ColorTargetState {
            format: wgpu::TextureFormat::Rgba32Float,
            blend: None,
            write_mask: wgpu::ColorWrites::ALL,
        })];

        let velocity_pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "integrate velocity",
                parts: &[source::FULLSCREEN, source::INTEGRATE_VELOCITY],
                layout: &velocity_layout,
                targets: &particle_target,
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        )?;
        let position_pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "integrate position",
                parts: &[source::FULLSCREEN, source::INTEGRATE_POSITION],
                layout: &position_layout,
                targets: &particle_target,
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        )?;

        let velocity_params = uniform_buffer(
            context,
            "integrate velocity params",
            &VelocityParams {
                dt: options.dt,
                damping: options.damping,
                max_speed: options.max_speed,
                max_accel: options.max_accel,
                particle_count,
                tex_width,
                _pad0: 0,
                _pad1: 0,
            },
        );
        let position_params = uniform_buffer(
            context,
            "integrate position params",
            &PositionParams {
                dt: options.dt,
                particle_count,
                tex_width,
                _pad: 0,
            },
        );

        Ok(Self {
            velocity_pipeline,
            position_pipeline,
            velocity_layout,
            position_layout,
            velocity_params,
            position_params,
            velocity_cache: BindGroupCache::default(),
            position_cache: BindGroupCache::default(),
        })
    }

    /// Records both integration passes. The position pass reads the velocity
    /// target written by the first pass; neither samples its own attachment.
    pub fn encode(
        &mut self,
        context: &RenderContext,
        encoder: &mut wgpu::CommandEncoder,
        particles: &ParticleTextures,
        force: &TextureObject,
        timestamps: [Option<wgpu::RenderPassTimestampWrites>; 2],
    ) {
        let [velocity_ts, position_ts] = timestamps;

        let bind = self.velocity_cache.get(
            context,
            &self.velocity_layout,
            "integrate velocity",
            0,
            &self.velocity_params,
            &[particles.velocity.current(), force],
        );
        let mut pass = begin_pass(
            encoder,
            "integrate velocity",
            particles.velocity.target(),
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            velocity_ts,
        );
        pass.set_pipeline(&self.velocity_pipeline);
        pass.set_bind_group(0, bind, &[]);
        pass.draw(0..4, 0..1);
        drop(pass);

        let bind = self.position_cache.get(
            context,
            &self.position_layout,
            "integrate position",
            0,
            &self.position_params,
            &[particles.position.current(), particles.velocity.target()],
        );
        let mut pass = begin_pass(
            encoder,
            "integrate position",
            particles.position.target(),
            wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
            position_ts,
        );
        pass.set_pipeline(&self.position_pipeline);
        pass.set_bind_group(0, bind, &[]);
        pass.draw(0..4, 0..1);
    }
}
