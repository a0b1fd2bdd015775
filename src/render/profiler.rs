//! GPU profiling using wgpu timestamp queries

/// Per-pass GPU timing data (in milliseconds)
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct GpuTimings {
    pub warp_ms: f32,
    pub display_ms: f32,
    pub total_gpu_ms: f32,
}

/// Profiled passes, in submission order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpuPass {
    Warp = 0,
    Display = 1,
}

const NUM_PASSES: u32 = 2;
const TIMESTAMPS_PER_PASS: u32 = 2; // begin + end
const TOTAL_TIMESTAMPS: u32 = NUM_PASSES * TIMESTAMPS_PER_PASS;

/// GPU profiler using timestamp queries
pub struct GpuProfiler {
    enabled: bool,
    query_set: Option<wgpu::QuerySet>,
    resolve_buffer: wgpu::Buffer,
    read_buffer: wgpu::Buffer,
    timestamp_period: f32,
    /// Display pass timestamps were written this frame
    display_written: bool,
    latest_timings: GpuTimings,
    /// Rolling history for averages
    frame_timings: std::collections::VecDeque<GpuTimings>,
    max_history: usize,
}

impl GpuProfiler {
    /// `supported` is whether the device was created with TIMESTAMP_QUERY.
    /// An unsupported profiler stays disabled and never records.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, supported: bool) -> Self {
        let query_set = supported.then(|| {
            device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("gpu_profiler_queries"),
                ty: wgpu::QueryType::Timestamp,
                count: TOTAL_TIMESTAMPS,
            })
        });

        let buffer_size = (TOTAL_TIMESTAMPS as u64) * std::mem::size_of::<u64>() as u64;

        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gpu_profiler_resolve"),
            size: buffer_size,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let read_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("gpu_profiler_read"),
            size: buffer_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            enabled: supported,
            query_set,
            resolve_buffer,
            read_buffer,
            timestamp_period: queue.get_timestamp_period(),
            display_written: false,
            latest_timings: GpuTimings::default(),
            frame_timings: std::collections::VecDeque::new(),
            max_history: 120,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled && self.query_set.is_some()
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Timestamp writes for one render pass
    pub fn render_pass_timestamp_writes(&mut self, pass: GpuPass) -> Option<wgpu::RenderPassTimestampWrites<'_>> {
        if !self.enabled {
            return None;
        }
        if pass == GpuPass::Display {
            self.display_written = true;
        }
        let index = pass as u32;
        self.query_set.as_ref().map(|query_set| wgpu::RenderPassTimestampWrites {
            query_set,
            beginning_of_pass_write_index: Some(index * 2),
            end_of_pass_write_index: Some(index * 2 + 1),
        })
    }

    /// Resolve queries and copy to readable buffer. Call after all passes, before submit.
    pub fn resolve(&self, encoder: &mut wgpu::CommandEncoder) {
        let Some(query_set) = self.query_set.as_ref().filter(|_| self.enabled) else {
            return;
        };
        // Only resolve what this frame wrote
        let count = if self.display_written { TOTAL_TIMESTAMPS } else { TIMESTAMPS_PER_PASS };
        encoder.resolve_query_set(query_set, 0..count, &self.resolve_buffer, 0);
        encoder.copy_buffer_to_buffer(
            &self.resolve_buffer, 0,
            &self.read_buffer, 0,
            (count as u64) * std::mem::size_of::<u64>() as u64,
        );
    }

    /// Read back results of the last submitted frame
    pub fn read_results(&mut self, device: &wgpu::Device) {
        if !self.is_enabled() {
            return;
        }
        let display_written = std::mem::take(&mut self.display_written);

        let buffer_slice = self.read_buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        device.poll(wgpu::PollType::Wait { submission_index: None, timeout: None }).ok();

        if let Ok(Ok(())) = rx.try_recv() {
            let data = buffer_slice.get_mapped_range();
            let timestamps: &[u64] = bytemuck::cast_slice(&data);

            if timestamps.len() >= TOTAL_TIMESTAMPS as usize {
                let ns_per_tick = self.timestamp_period as f64;
                let ms = |begin: u64, end: u64| -> f32 {
                    ((end.wrapping_sub(begin)) as f64 * ns_per_tick / 1_000_000.0) as f32
                };

                let warp_ms = ms(timestamps[0], timestamps[1]);
                let (display_ms, total_gpu_ms) = if display_written {
                    (ms(timestamps[2], timestamps[3]), ms(timestamps[0], timestamps[3]))
                } else {
                    (0.0, warp_ms)
                };
                let timings = GpuTimings { warp_ms, display_ms, total_gpu_ms };

                self.frame_timings.push_back(timings);
                if self.frame_timings.len() > self.max_history {
                    self.frame_timings.pop_front();
                }
                self.latest_timings = timings;
            }

            drop(data);
            self.read_buffer.unmap();
        }
    }

    pub fn latest_timings(&self) -> GpuTimings {
        self.latest_timings
    }

    /// Get averaged timings over the history window
    pub fn average_timings(&self) -> GpuTimings {
        if self.frame_timings.is_empty() {
            return GpuTimings::default();
        }
        let n = self.frame_timings.len() as f32;
        let mut avg = GpuTimings::default();
        for t in &self.frame_timings {
            avg.warp_ms += t.warp_ms;
            avg.display_ms += t.display_ms;
            avg.total_gpu_ms += t.total_gpu_ms;
        }
        avg.warp_ms /= n;
        avg.display_ms /= n;
        avg.total_gpu_ms /= n;
        avg
    }
}
