use glam::Vec3;

use crate::context::RenderContext;
use crate::error::ResourceError;
use crate::kernels::{self, BindGroupCache, PipelineSpec, kernel_layout, source, uniform_buffer};
use crate::options::WorldBounds;
use crate::texture::TextureObject;

#[repr(C)]
#[derive(Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct BoundsParams {
    src_width: u32,
    src_height: u32,
    particle_count: u32,
    first: u32,
}

const SENTINEL: f32 = 3.0e38;

/// Periodic world-box estimation: a dual-attachment 2x2 min/max pyramid
/// over the position plane, read back through a preallocated 32-byte
/// buffer. The single blocking read is amortized over many frames by the
/// engine's refresh interval.
pub(crate) struct BoundsKernel {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    pyramid: Vec<(TextureObject, TextureObject)>,
    stage_params: Vec<wgpu::Buffer>,
    readback: wgpu::Buffer,
    cache: BindGroupCache,
}

impl BoundsKernel {
    pub fn new(
        context: &RenderContext,
        plane_width: u32,
        plane_height: u32,
        particle_count: u32,
    ) -> Result<Self, ResourceError> {
        let layout = kernel_layout(context, "bounds", 2);
        let pipeline = kernels::build_pipeline(
            context,
            PipelineSpec {
                stage: "bounds",
                parts: &[source::PACKING, source::FULLSCREEN, source::BOUNDS],
                layout: &layout,
                targets: &[
                    Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::Rgba32Float,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                    Some(wgpu::ColorTargetState {
                        format: wgpu::TextureFormat::Rgba32Float,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    }),
                ],
                topology: wgpu::PrimitiveTopology::TriangleStrip,
            },
        )?;

        // Halving pyramid down to a single texel per attachment.
        let mut pyramid = Vec::new();
        let mut stage_params = Vec::new();
        let (mut src_w, mut src_h) = (plane_width, plane_height);
        let mut first = true;
        loop {
            let dst_w = src_w.div_ceil(2).max(1);
            let dst_h = src_h.div_ceil(2).max(1);
            pyramid.push((
                TextureObject::attachment(
                    context,
                    "bounds min",
                    dst_w,
                    dst_h,
                    wgpu::TextureFormat::Rgba32Float,
                )?,
                TextureObject::attachment(
                    context,
                    "bounds max",
                    dst_w,
                    dst_h,
                    wgpu::TextureFormat::Rgba32Float,
                )?,
            ));
            stage_params.push(uniform_buffer(
                context,
                "bounds params",
                &BoundsParams {
                    src_width: src_w,
                    src_height: src_h,
                    particle_count,
                    first: first as u32,
                },
            ));
            first = false;
            if dst_w == 1 && dst_h == 1 {
                break;
            }
            src_w = dst_w;
            src_h = dst_h;
        }

        let readback = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("bounds readback"),
            size: 32,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        Ok(Self {
            pipeline,
            layout,
            pyramid,
            stage_params,
            readback,
            cache: BindGroupCache::default(),
        })
    }

    /// Runs the reduction and the blocking readback, returning the sampled
    /// box expanded by `margin` per axis. `None` when no particle produced a
    /// finite extreme.
    pub fn estimate(
        &mut self,
        context: &RenderContext,
        positions: &TextureObject,
        margin: f32,
    ) -> Option<WorldBounds> {
        let mut encoder = context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("bounds encoder"),
            });

        for stage in 0..self.pyramid.len() {
            let (src_min, src_max) = if stage == 0 {
                // The first stage folds the position plane; both slots bind it.
                (positions, positions)
            } else {
                let (mn, mx) = &self.pyramid[stage - 1];
                (mn, mx)
            };
            let bind = self.cache.get(
                context,
                &self.layout,
                "bounds",
                stage as u64,
                &self.stage_params[stage],
                &[src_min, src_max],
            );
            let (dst_min, dst_max) = &self.pyramid[stage];
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("bounds"),
                color_attachments: &[
                    Some(wgpu::RenderPassColorAttachment {
                        view: dst_min.view(),
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                    Some(wgpu::RenderPassColorAttachment {
                        view: dst_max.view(),
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::TRANSPARENT),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                ],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, bind, &[]);
            pass.draw(0..4, 0..1);
        }

        let (tip_min, tip_max) = self.pyramid.last().expect("non-empty pyramid");
        for (texture, offset) in [(tip_min, 0u64), (tip_max, 16u64)] {
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: texture.texture(),
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &self.readback,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset,
                        bytes_per_row: None,
                        rows_per_image: None,
                    },
                },
                wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
            );
        }
        context.queue.submit(Some(encoder.finish()));

        let slice = self.readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        if let Err(e) = context.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: Some(std::time::Duration::from_secs(5)),
        }) {
            log::error!("device poll error during bounds readback: {e:?}");
            return None;
        }
        let _ = rx.recv();

        let values: [f32; 8] = {
            let view = slice.get_mapped_range();
            *bytemuck::from_bytes(&view[..32])
        };
        self.readback.unmap();

        let min = Vec3::new(values[0], values[1], values[2]);
        let max = Vec3::new(values[4], values[5], values[6]);
        if min.cmpgt(Vec3::splat(SENTINEL * 0.5)).any()
            || max.cmplt(Vec3::splat(-SENTINEL * 0.5)).any()
            || !min.is_finite()
            || !max.is_finite()
        {
            return None;
        }
        Some(WorldBounds::new(min, max).expanded(margin).regularized(1.0))
    }
}
