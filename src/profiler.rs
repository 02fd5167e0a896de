use std::collections::HashMap;
use std::sync::mpsc;

use parking_lot::Mutex;

use crate::context::RenderContext;

const MAX_SCOPES: u32 = 16;
const FRAMES_IN_FLIGHT: usize = 3;

/// Timestamp writes for a scope that may span several passes: the first
/// pass takes `begin()`, the last takes `end()`; a single-pass scope takes
/// `single()`.
pub(crate) struct ScopeSpan<'a> {
    query_set: &'a wgpu::QuerySet,
    base_index: u32,
}

impl<'a> ScopeSpan<'a> {
    pub fn begin(&self) -> Option<wgpu::RenderPassTimestampWrites<'a>> {
        Some(wgpu::RenderPassTimestampWrites {
            query_set: self.query_set,
            beginning_of_pass_write_index: Some(self.base_index),
            end_of_pass_write_index: None,
        })
    }

    pub fn end(&self) -> Option<wgpu::RenderPassTimestampWrites<'a>> {
        Some(wgpu::RenderPassTimestampWrites {
            query_set: self.query_set,
            beginning_of_pass_write_index: None,
            end_of_pass_write_index: Some(self.base_index + 1),
        })
    }

    pub fn single(&self) -> Option<wgpu::RenderPassTimestampWrites<'a>> {
        Some(wgpu::RenderPassTimestampWrites {
            query_set: self.query_set,
            beginning_of_pass_write_index: Some(self.base_index),
            end_of_pass_write_index: Some(self.base_index + 1),
        })
    }
}

struct FrameSlot {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    readback_buffer: wgpu::Buffer,
    labels: Mutex<Vec<&'static str>>,
    receiver: Option<mpsc::Receiver<Result<(), wgpu::BufferAsyncError>>>,
}

/// Fire-and-forget GPU timers with multi-frame collection latency.
///
/// Each frame allocates scope pairs from a ring of query sets; results are
/// resolved into a per-slot buffer and mapped without blocking. A slot whose
/// timestamps come back non-monotonic invalidates every in-flight slot, the
/// closest analog of a timer disjoint event.
pub(crate) struct GpuProfiler {
    slots: Option<Vec<FrameSlot>>,
    cursor: usize,
    scopes_this_frame: Mutex<u32>,
    period_ns: f32,
    averages: Mutex<HashMap<&'static str, f32>>,
}

impl GpuProfiler {
    pub fn new(context: &RenderContext, enabled: bool) -> Self {
        let supported = context.capabilities().timestamp_queries;
        if enabled && !supported {
            log::warn!("timestamp queries unsupported; profiling stats will stay empty");
        }
        let slots = (enabled && supported).then(|| {
            (0..FRAMES_IN_FLIGHT)
                .map(|_| {
                    let query_set = context.device.create_query_set(&wgpu::QuerySetDescriptor {
                        label: Some("profiler queries"),
                        ty: wgpu::QueryType::Timestamp,
                        count: MAX_SCOPES * 2,
                    });
                    let size = (MAX_SCOPES as u64 * 2) * 8;
                    let resolve_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("profiler resolve"),
                        size,
                        usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                        mapped_at_creation: false,
                    });
                    let readback_buffer = context.device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("profiler readback"),
                        size,
                        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
                        mapped_at_creation: false,
                    });
                    FrameSlot {
                        query_set,
                        resolve_buffer,
                        readback_buffer,
                        labels: Mutex::new(Vec::new()),
                        receiver: None,
                    }
                })
                .collect()
        });
        Self {
            slots,
            cursor: 0,
            scopes_this_frame: Mutex::new(0),
            period_ns: context.queue.get_timestamp_period(),
            averages: Mutex::new(HashMap::new()),
        }
    }

    pub fn begin_frame(&mut self) {
        let cursor = self.cursor;
        let Some(slots) = &mut self.slots else { return };
        *self.scopes_this_frame.lock() = 0;
        let slot = &mut slots[cursor];
        // A slot whose map is still pending or unharvested cannot be
        // reused; unmap aborts the pending map and drops its queries.
        if slot.receiver.take().is_some() {
            slot.readback_buffer.unmap();
        }
        slot.labels.lock().clear();
    }

    /// Allocates a scope pair in the current frame's query set.
    pub fn scope(&self, label: &'static str) -> Option<ScopeSpan<'_>> {
        let slots = self.slots.as_ref()?;
        let mut count = self.scopes_this_frame.lock();
        if *count >= MAX_SCOPES {
            return None;
        }
        let base_index = *count * 2;
        *count += 1;
        let slot = &slots[self.cursor];
        slot.labels.lock().push(label);
        Some(ScopeSpan {
            query_set: &slot.query_set,
            base_index,
        })
    }

    /// Resolves this frame's queries; call after the last profiled pass.
    pub fn resolve(&mut self, encoder: &mut wgpu::CommandEncoder) {
        let Some(slots) = &self.slots else { return };
        let queries = *self.scopes_this_frame.lock() * 2;
        if queries == 0 {
            return;
        }
        let slot = &slots[self.cursor];
        encoder.resolve_query_set(&slot.query_set, 0..queries, &slot.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(
            &slot.resolve_buffer,
            0,
            &slot.readback_buffer,
            0,
            queries as u64 * 8,
        );
    }

    /// Kicks off the non-blocking map for this frame and harvests any older
    /// frame that completed. Results arrive 2-3 frames late.
    pub fn end_frame(&mut self, context: &RenderContext) {
        let cursor = self.cursor;
        let Some(slots) = &mut self.slots else { return };

        if *self.scopes_this_frame.lock() > 0 {
            let slot = &mut slots[cursor];
            let (tx, rx) = mpsc::channel();
            slot.readback_buffer
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |result| {
                    let _ = tx.send(result);
                });
            slot.receiver = Some(rx);
        }
        self.cursor = (cursor + 1) % FRAMES_IN_FLIGHT;

        let _ = context.device.poll(wgpu::PollType::Poll);

        let oldest = self.cursor;
        let slot = &mut slots[oldest];
        let Some(receiver) = &slot.receiver else {
            return;
        };
        match receiver.try_recv() {
            Ok(Ok(())) => {
                slot.receiver = None;
                let labels: Vec<&'static str> = slot.labels.lock().clone();
                let ticks: Vec<u64> = {
                    let view = slot.readback_buffer.slice(..).get_mapped_range();
                    bytemuck::cast_slice(&view[..labels.len() * 16]).to_vec()
                };
                slot.readback_buffer.unmap();

                let mut disjoint = false;
                let mut measured = Vec::with_capacity(labels.len());
                for (i, label) in labels.iter().enumerate() {
                    let begin = ticks[i * 2];
                    let end = ticks[i * 2 + 1];
                    if end < begin || begin == 0 {
                        disjoint = true;
                        break;
                    }
                    let ms = (end - begin) as f32 * self.period_ns / 1.0e6;
                    measured.push((*label, ms));
                }

                if disjoint {
                    // Disjoint-like anomaly: discard everything in flight.
                    for slot in slots.iter_mut() {
                        slot.labels.lock().clear();
                    }
                    return;
                }
                let mut averages = self.averages.lock();
                for (label, ms) in measured {
                    let entry = averages.entry(label).or_insert(ms);
                    *entry = *entry * 0.9 + ms * 0.1;
                }
            }
            Ok(Err(e)) => {
                slot.receiver = None;
                log::warn!("profiler readback failed: {e:?}");
            }
            Err(_) => {} // not ready yet; keep waiting
        }
    }

    /// Rolling average milliseconds per scope label; empty when profiling
    /// is off or unsupported.
    pub fn stats(&self) -> HashMap<String, f32> {
        self.averages
            .lock()
            .iter()
            .map(|(label, ms)| (label.to_string(), *ms))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Story: a disabled profiler yields no scopes and empty stats.
    #[test]
    fn disabled_profiler_is_inert() {
        let Ok(context) = RenderContext::new_blocking() else {
            eprintln!("skipping: no GPU adapter available");
            return;
        };
        let mut profiler = GpuProfiler::new(&context, false);
        profiler.begin_frame();
        assert!(profiler.scope("traverse").is_none());
        profiler.end_frame(&context);
        assert!(profiler.stats().is_empty());
    }
}
