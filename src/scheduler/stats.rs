//! Pipeline statistics
//!
//! Both threads record into one collector. Each record holds the lock for
//! a few pushes; percentiles are computed on snapshots outside the lock.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::time::{FrameTimer, RateStats};
use crate::core::types::ClockTime;
use crate::frame::ExchangeCounters;

/// Samples kept per timing series
const WINDOW: usize = 1000;

/// Rolling window of millisecond samples
#[derive(Clone, Debug, Default)]
pub struct SampleWindow {
    samples: VecDeque<f64>,
}

impl SampleWindow {
    pub fn push(&mut self, value: Duration) {
        self.samples.push_back(value.as_secs_f64() * 1000.0);
        if self.samples.len() > WINDOW {
            self.samples.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// (p50, p99) in milliseconds, zero when empty
    pub fn percentiles(&self) -> (f64, f64) {
        let mut sorted: Vec<f64> = self.samples.iter().copied().collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        (percentile(&sorted, 50.0), percentile(&sorted, 99.0))
    }
}

/// Nearest-rank percentile of a sorted slice
fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((sorted.len() as f64 - 1.0) * p / 100.0).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

/// Snapshot of the pipeline's health
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AtwStats {
    pub backend: String,
    pub refresh_hz: f32,
    /// Vsyncs the warp thread was responsible for
    pub vsyncs: u64,
    /// Vsyncs that got a frame in time
    pub presented: u64,
    pub missed_vsyncs: u64,
    pub frames_rendered: u64,
    /// Stereo frames replaced before they were ever displayed
    pub frames_dropped: u64,
    /// Presents that re-warped an already displayed stereo frame
    pub stale_presents: u64,
    pub warp_p50_ms: f64,
    pub warp_p99_ms: f64,
    pub render_p50_ms: f64,
    pub render_p99_ms: f64,
    /// Vsync time minus the start of the render that produced the frame
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
    /// GPU time of the last warp pass, when the backend measures it
    pub gpu_warp_ms: Option<f32>,
    pub present_rate: RateStats,
    pub render_rate: RateStats,
}

impl AtwStats {
    /// One-line summary for the log
    pub fn summary(&self) -> String {
        format!(
            "{} @ {:.1} Hz: {} vsyncs, {} presented, {} missed | {} rendered, {} dropped, {} re-warped | warp {:.2}/{:.2} ms, render {:.2}/{:.2} ms, latency {:.1}/{:.1} ms (p50/p99)",
            self.backend,
            self.refresh_hz,
            self.vsyncs,
            self.presented,
            self.missed_vsyncs,
            self.frames_rendered,
            self.frames_dropped,
            self.stale_presents,
            self.warp_p50_ms,
            self.warp_p99_ms,
            self.render_p50_ms,
            self.render_p99_ms,
            self.latency_p50_ms,
            self.latency_p99_ms,
        )
    }
}

impl From<&AtwStats> for atw_debug::StatsInfo {
    fn from(s: &AtwStats) -> Self {
        Self {
            backend: s.backend.clone(),
            refresh_hz: s.refresh_hz,
            vsyncs: s.vsyncs,
            presented: s.presented,
            missed_vsyncs: s.missed_vsyncs,
            frames_rendered: s.frames_rendered,
            frames_dropped: s.frames_dropped,
            stale_presents: s.stale_presents,
            warp_p50_ms: s.warp_p50_ms,
            warp_p99_ms: s.warp_p99_ms,
            render_p50_ms: s.render_p50_ms,
            render_p99_ms: s.render_p99_ms,
            latency_p50_ms: s.latency_p50_ms,
            latency_p99_ms: s.latency_p99_ms,
        }
    }
}

#[derive(Default)]
struct Counters {
    vsyncs: u64,
    presented: u64,
    missed: u64,
    stale: u64,
    rendered: u64,
    gpu_warp_ms: Option<f32>,
    warp: SampleWindow,
    render: SampleWindow,
    latency: SampleWindow,
    present_timer: FrameTimer,
    render_timer: FrameTimer,
}

/// Shared recorder behind `AtwStats`
pub struct StatsCollector {
    backend: String,
    refresh_hz: f32,
    inner: Mutex<Counters>,
}

impl StatsCollector {
    pub fn new(backend: &str, refresh_hz: f32) -> Self {
        Self {
            backend: backend.to_string(),
            refresh_hz,
            inner: Mutex::new(Counters::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// A vsync was handled. `presented_at` is None when the present missed.
    pub fn record_vsync(
        &self,
        presented_at: Option<ClockTime>,
        stale: bool,
        warp: Duration,
        latency: Option<Duration>,
        gpu_warp_ms: Option<f32>,
    ) {
        let mut c = self.lock();
        c.vsyncs += 1;
        c.warp.push(warp);
        match presented_at {
            Some(time) => {
                c.presented += 1;
                c.present_timer.tick(time);
            }
            None => c.missed += 1,
        }
        if stale {
            c.stale += 1;
        }
        if let Some(latency) = latency {
            c.latency.push(latency);
        }
        if gpu_warp_ms.is_some() {
            c.gpu_warp_ms = gpu_warp_ms;
        }
    }

    /// Vsyncs that passed without the warp thread getting to them
    pub fn record_skipped(&self, count: u64) {
        let mut c = self.lock();
        c.vsyncs += count;
        c.missed += count;
    }

    /// A stereo frame finished rendering at `now`
    pub fn record_render(&self, duration: Duration, now: ClockTime) {
        let mut c = self.lock();
        c.rendered += 1;
        c.render.push(duration);
        c.render_timer.tick(now);
    }

    pub fn snapshot(&self, exchange: ExchangeCounters, now: ClockTime) -> AtwStats {
        let (vsyncs, presented, missed, stale, rendered, gpu_warp_ms, warp, render, latency, present_rate, render_rate) = {
            let c = self.lock();
            (
                c.vsyncs,
                c.presented,
                c.missed,
                c.stale,
                c.rendered,
                c.gpu_warp_ms,
                c.warp.clone(),
                c.render.clone(),
                c.latency.clone(),
                c.present_timer.rate_stats(now),
                c.render_timer.rate_stats(now),
            )
        };
        let (warp_p50_ms, warp_p99_ms) = warp.percentiles();
        let (render_p50_ms, render_p99_ms) = render.percentiles();
        let (latency_p50_ms, latency_p99_ms) = latency.percentiles();

        AtwStats {
            backend: self.backend.clone(),
            refresh_hz: self.refresh_hz,
            vsyncs,
            presented,
            missed_vsyncs: missed,
            frames_rendered: rendered,
            frames_dropped: exchange.dropped,
            stale_presents: stale,
            warp_p50_ms,
            warp_p99_ms,
            render_p50_ms,
            render_p99_ms,
            latency_p50_ms,
            latency_p99_ms,
            gpu_warp_ms,
            present_rate,
            render_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentiles() {
        let mut w = SampleWindow::default();
        assert_eq!(w.percentiles(), (0.0, 0.0));
        for ms in 1..=100u64 {
            w.push(Duration::from_millis(ms));
        }
        let (p50, p99) = w.percentiles();
        assert!((p50 - 51.0).abs() < 1e-9);
        assert!((p99 - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_is_bounded() {
        let mut w = SampleWindow::default();
        for _ in 0..WINDOW + 10 {
            w.push(Duration::from_millis(1));
        }
        assert_eq!(w.len(), WINDOW);
    }

    #[test]
    fn test_collector_counts() {
        let stats = StatsCollector::new("cpu", 60.0);
        let ms = Duration::from_millis;
        stats.record_vsync(Some(ms(16)), false, ms(2), Some(ms(30)), None);
        stats.record_vsync(Some(ms(33)), true, ms(3), Some(ms(47)), Some(0.4));
        stats.record_vsync(None, false, ms(20), None, None);
        stats.record_skipped(2);
        stats.record_render(ms(10), ms(20));

        let counters = ExchangeCounters { published: 1, dropped: 0, displayed: 1 };
        let s = stats.snapshot(counters, ms(50));
        assert_eq!(s.vsyncs, 5);
        assert_eq!(s.presented, 2);
        assert_eq!(s.missed_vsyncs, 3);
        assert_eq!(s.stale_presents, 1);
        assert_eq!(s.frames_rendered, 1);
        assert_eq!(s.gpu_warp_ms, Some(0.4));
        assert!((s.render_p50_ms - 10.0).abs() < 1e-9);
        assert!(s.summary().starts_with("cpu @ 60.0 Hz"));

        let info = atw_debug::StatsInfo::from(&s);
        assert_eq!(info.missed_vsyncs, 3);
    }

    #[test]
    fn test_stats_json_round_trip() {
        let stats = AtwStats {
            backend: "vulkan".into(),
            vsyncs: 10,
            ..Default::default()
        };
        let json = serde_json::to_string(&stats).unwrap();
        let back: AtwStats = serde_json::from_str(&json).unwrap();
        assert_eq!(back, stats);
    }
}
