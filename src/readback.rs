use crate::context::RenderContext;
use crate::texture::{TextureObject, bytes_per_texel};

/// Blocking texture readback through a preallocated staging buffer.
///
/// One instance per texture shape; the buffer is reused across reads so the
/// periodic paths (bounds refresh, test readbacks) allocate nothing per call.
#[derive(Debug)]
pub(crate) struct TextureReadback {
    buffer: wgpu::Buffer,
    padded_row_bytes: u32,
    row_bytes: u32,
    height: u32,
}

impl TextureReadback {
    pub fn new(context: &RenderContext, label: &str, width: u32, height: u32, bpp: u32) -> Self {
        let row_bytes = width * bpp;
        let padded_row_bytes =
            wgpu::util::align_to(row_bytes as u64, wgpu::COPY_BYTES_PER_ROW_ALIGNMENT as u64)
                as u32;
        let buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: padded_row_bytes as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        Self {
            buffer,
            padded_row_bytes,
            row_bytes,
            height,
        }
    }

    pub fn for_texture(context: &RenderContext, label: &str, texture: &TextureObject) -> Self {
        Self::new(
            context,
            label,
            texture.width(),
            texture.height(),
            bytes_per_texel(texture.format()),
        )
    }

    /// Copies the texture into the staging buffer and maps it, stalling until
    /// the GPU catches up. Returns tightly-packed texel bytes.
    pub fn read(&self, context: &RenderContext, texture: &TextureObject) -> Vec<u8> {
        let device = &context.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("readback encoder"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                texture: &texture.inner,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &self.buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(self.padded_row_bytes),
                    rows_per_image: Some(self.height),
                },
            },
            texture.size,
        );
        context.queue.submit(Some(encoder.finish()));

        let slice = self.buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        if let Err(e) = device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: Some(std::time::Duration::from_secs(5)),
        }) {
            log::error!("device poll error during readback mapping: {e:?}");
            return Vec::new();
        }
        let _ = rx.recv();

        let view = slice.get_mapped_range();
        let mut bytes = Vec::with_capacity(self.row_bytes as usize * self.height as usize);
        for y in 0..self.height as usize {
            let start = y * self.padded_row_bytes as usize;
            bytes.extend_from_slice(&view[start..start + self.row_bytes as usize]);
        }
        drop(view);
        self.buffer.unmap();
        bytes
    }

    /// Convenience: read and reinterpret as f32 texel data.
    pub fn read_f32(&self, context: &RenderContext, texture: &TextureObject) -> Vec<f32> {
        let bytes = self.read(context, texture);
        bytemuck::cast_slice(&bytes).to_vec()
    }
}
