use std::sync::atomic::{AtomicU64, Ordering};

use crate::context::RenderContext;
use crate::error::ResourceError;

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identifier, unique per process. Used to key bind-group caches.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct TextureId(pub u64);

impl std::fmt::Display for TextureId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A typed render target owned by a kernel or the engine.
///
/// The view is created once and reused for every pass that binds or renders
/// to this texture, so the handles exposed to the renderer never move.
#[derive(Debug)]
pub struct TextureObject {
    pub(crate) inner: wgpu::Texture,
    pub(crate) view: wgpu::TextureView,
    pub(crate) size: wgpu::Extent3d,
    pub(crate) format: wgpu::TextureFormat,
    pub(crate) id: TextureId,
}

impl TextureObject {
    /// Creates a color render target that can also be sampled and copied.
    ///
    /// Allocation runs under an out-of-memory error scope so driver failures
    /// surface as [`ResourceError::AllocationFailed`] instead of a later
    /// uncaptured error.
    pub(crate) fn attachment(
        context: &RenderContext,
        stage: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Result<Self, ResourceError> {
        let usage = wgpu::TextureUsages::RENDER_ATTACHMENT
            | wgpu::TextureUsages::TEXTURE_BINDING
            | wgpu::TextureUsages::COPY_SRC
            | wgpu::TextureUsages::COPY_DST;
        ensure_color_attachment(stage, format)?;

        let device = &context.device;
        let error_scope = device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let inner = device.create_texture(&wgpu::TextureDescriptor {
            label: Some(stage),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            view_formats: &[],
            usage,
        });
        if let Some(error) = pollster::block_on(error_scope.pop()) {
            return Err(ResourceError::AllocationFailed {
                stage: stage.to_string(),
                log: error.to_string(),
            });
        }

        let view = inner.create_view(&wgpu::TextureViewDescriptor::default());
        let size = inner.size();
        Ok(Self {
            inner,
            view,
            size,
            format,
            id: TextureId(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed)),
        })
    }

    /// Uploads tightly-packed texel data covering the whole texture.
    pub(crate) fn upload(&self, context: &RenderContext, data: &[u8]) {
        let bpp = bytes_per_texel(self.format);
        context.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture: &self.inner,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(bpp * self.size.width),
                rows_per_image: Some(self.size.height),
            },
            self.size,
        );
    }

    pub fn id(&self) -> TextureId {
        self.id
    }

    pub fn view(&self) -> &wgpu::TextureView {
        &self.view
    }

    pub fn texture(&self) -> &wgpu::Texture {
        &self.inner
    }

    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.size.width
    }

    pub fn height(&self) -> u32 {
        self.size.height
    }
}

/// Attachment precondition; violations surface before any pass is encoded.
fn ensure_color_attachment(stage: &str, format: wgpu::TextureFormat) -> Result<(), ResourceError> {
    let renderable = matches!(
        format,
        wgpu::TextureFormat::R32Float
            | wgpu::TextureFormat::Rg32Float
            | wgpu::TextureFormat::Rgba32Float
            | wgpu::TextureFormat::Rgba8Unorm
    );
    if renderable {
        Ok(())
    } else {
        Err(ResourceError::FramebufferIncomplete {
            stage: stage.to_string(),
            reason: format!("{format:?} is not a supported color attachment"),
        })
    }
}

pub(crate) fn bytes_per_texel(format: wgpu::TextureFormat) -> u32 {
    match format {
        wgpu::TextureFormat::R32Float | wgpu::TextureFormat::Rgba8Unorm => 4,
        wgpu::TextureFormat::Rg32Float => 8,
        wgpu::TextureFormat::Rgba32Float => 16,
        _ => format
            .block_copy_size(None)
            .expect("uncompressed format has a block copy size"),
    }
}

/// An array-of-two with a current index; never two objects pointing at each
/// other.
#[derive(Debug)]
pub struct PingPong {
    pair: [TextureObject; 2],
    current: usize,
}

impl PingPong {
    pub(crate) fn new(
        context: &RenderContext,
        stage: &str,
        width: u32,
        height: u32,
        format: wgpu::TextureFormat,
    ) -> Result<Self, ResourceError> {
        Ok(Self {
            pair: [
                TextureObject::attachment(context, stage, width, height, format)?,
                TextureObject::attachment(context, stage, width, height, format)?,
            ],
            current: 0,
        })
    }

    /// The authoritative texture between passes.
    pub fn current(&self) -> &TextureObject {
        &self.pair[self.current]
    }

    /// The write target for the next rewriting pass.
    pub fn target(&self) -> &TextureObject {
        &self.pair[1 - self.current]
    }

    pub fn swap(&mut self) {
        self.current = 1 - self.current;
    }

    pub fn index(&self) -> usize {
        self.current
    }

    pub fn get(&self, index: usize) -> &TextureObject {
        &self.pair[index]
    }
}
