use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{InitializationError, ResourceError};

/// Optional device capabilities probed at construction.
///
/// Their absence is tolerated: missing float blending selects the degraded
/// aggregation path, missing timestamps leaves `stats()` empty.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    /// Additive blending into 32-bit float render targets.
    pub float_blending: bool,
    /// GPU timestamp queries for the profiler.
    pub timestamp_queries: bool,
}

/// Owns the wgpu device and queue shared by every kernel.
#[derive(Debug)]
pub struct RenderContext {
    pub(crate) device: wgpu::Device,
    pub(crate) queue: wgpu::Queue,
    capabilities: Capabilities,
    device_errors: Arc<AtomicU64>,
}

impl RenderContext {
    /// Acquires an adapter and device for headless simulation.
    ///
    /// Requests the optional features the adapter actually has; required
    /// capabilities (float color targets, point rasterization) are part of
    /// the WebGPU baseline and verified through the downlevel flags.
    pub async fn new() -> Result<Arc<Self>, ResourceError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::new_without_display_handle());

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(InitializationError::from)?;

        if !adapter.get_downlevel_capabilities().is_webgpu_compliant() {
            return Err(ResourceError::ExtensionMissing(
                "WebGPU-compliant rasterizer with float render targets".into(),
            ));
        }

        let optional = wgpu::Features::FLOAT32_BLENDABLE | wgpu::Features::TIMESTAMP_QUERY;
        let features = adapter.features() & optional;
        let capabilities = Capabilities {
            float_blending: features.contains(wgpu::Features::FLOAT32_BLENDABLE),
            timestamp_queries: features.contains(wgpu::Features::TIMESTAMP_QUERY),
        };

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("PointGravity Device"),
                memory_hints: wgpu::MemoryHints::Performance,
                required_features: features,
                required_limits: wgpu::Limits::default().using_resolution(adapter.limits()),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(InitializationError::from)?;

        let device_errors = Arc::new(AtomicU64::new(0));
        let counter = device_errors.clone();
        device.on_uncaptured_error(Arc::new(move |error| {
            counter.fetch_add(1, Ordering::Relaxed);
            log::error!("uncaptured GPU error: {error}");
        }));

        Ok(Arc::new(Self {
            device,
            queue,
            capabilities,
            device_errors,
        }))
    }

    /// Blocking variant of [`RenderContext::new`].
    pub fn new_blocking() -> Result<Arc<Self>, ResourceError> {
        pollster::block_on(Self::new())
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Number of uncaptured device errors logged since creation.
    ///
    /// Step-time GPU errors are absorbed and counted, never raised.
    pub fn device_error_count(&self) -> u64 {
        self.device_errors.load(Ordering::Relaxed)
    }
}
