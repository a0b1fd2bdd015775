//! The deadline-driven warp loop

use std::time::Duration;

use crate::core::error::Error;
use crate::core::types::{ClockTime, Quat, Result};
use crate::display::VsyncTick;
use crate::frame::StereoFrame;
use crate::math::{Fov, timewarp_transform};
use crate::pose::HeadPose;
use crate::scheduler::Pipeline;
use crate::scheduler::latch::LatchPolicy;
use crate::warp::{WarpBackend, WarpJob};

/// Consecutive failed presents before the warp loop gives up
const MAX_CONSECUTIVE_FAILURES: u32 = 120;

/// What happened on one vsync
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TickReport {
    pub tick: VsyncTick,
    /// Stereo frame warped, None for the startup placeholder
    pub frame_index: Option<u64>,
    /// The present completed before the vsync
    pub on_time: bool,
    /// The frame had already been displayed on an earlier vsync
    pub stale: bool,
    pub warp_duration: Duration,
    /// Vsyncs skipped after a late present
    pub skipped: u64,
}

/// Runs the warp backend once per vsync
pub struct WarpScheduler {
    backend: Box<dyn WarpBackend>,
    pipeline: Pipeline,
    latch: LatchPolicy,
    /// Shown until the renderer publishes its first frame
    placeholder: StereoFrame,
    next_tick: u64,
    last_displayed: Option<u64>,
    paused: bool,
    failures: u32,
}

impl WarpScheduler {
    pub fn new(
        backend: Box<dyn WarpBackend>,
        pipeline: Pipeline,
        latch: LatchPolicy,
        fov: Fov,
        eye_resolution: u32,
    ) -> Self {
        let now = pipeline.clock.now();
        let next_tick = pipeline.vsync.tick_at_or_after(now).index;
        let placeholder = StereoFrame::solid(
            0,
            eye_resolution,
            [0, 0, 0, 255],
            HeadPose::new(Quat::IDENTITY, now),
            fov,
        );
        Self {
            backend,
            pipeline,
            latch,
            placeholder,
            next_tick,
            last_displayed: None,
            paused: false,
            failures: 0,
        }
    }

    /// The vsync `run` will handle next
    pub fn next_tick(&self) -> VsyncTick {
        self.pipeline.vsync.tick(self.next_tick)
    }

    pub fn latch(&self) -> &LatchPolicy {
        &self.latch
    }

    /// Push the pause control through to the orientation source
    fn sync_pause(&mut self, now: ClockTime) {
        let paused = self.pipeline.controls.paused();
        if paused != self.paused {
            self.pipeline.source.set_paused(paused, now);
            self.paused = paused;
            log::info!("Head motion {}", if paused { "paused" } else { "resumed" });
        }
    }

    /// Handle one vsync: wait for the latch point, warp the newest frame
    /// with poses at the start and end of the refresh, present, then
    /// signal the vsync to the render thread.
    pub fn run_tick(&mut self, tick: VsyncTick) -> Result<TickReport> {
        let clock = self.pipeline.clock.clone();
        let controls = self.pipeline.controls.clone();

        clock.sleep_until(self.latch.latch_time(tick));

        if let Some((width, height)) = controls.take_resize() {
            self.backend.resize(width, height);
        }
        self.sync_pause(clock.now());

        let latest = self.pipeline.exchange.latest();
        let frame = latest.as_deref().unwrap_or(&self.placeholder);
        let frame_index = latest.as_ref().map(|f| f.index);
        let stale = frame_index.is_some() && frame_index == self.last_displayed;

        let source = &self.pipeline.source;
        let start_pose = source.pose_at(tick.time);
        let end_pose = source.pose_at(self.pipeline.vsync.refresh_end(tick));
        let rendered = frame.render_pose.orientation;
        let start = timewarp_transform(&frame.fov, rendered, start_pose.orientation);
        let end = timewarp_transform(&frame.fov, rendered, end_pose.orientation);

        let job = WarpJob {
            frame,
            tick,
            start: [start; 2],
            end: [end; 2],
            chromatic_aberration: controls.chromatic_aberration(),
        };

        let began = clock.now();
        let result = self.backend.warp_and_present(&job);
        let finished = clock.now();
        let warp_duration = finished.saturating_sub(began);
        self.latch.record(warp_duration);

        let presented = match result {
            Ok(()) => {
                self.failures = 0;
                true
            }
            Err(e) => {
                self.failures += 1;
                log::warn!("Present for vsync {} failed: {}", tick.index, e);
                if self.failures >= MAX_CONSECUTIVE_FAILURES {
                    return Err(Error::Backend(format!(
                        "{} consecutive presents failed, last: {}",
                        self.failures, e
                    )));
                }
                false
            }
        };

        if presented {
            if let Some(index) = frame_index {
                self.pipeline.exchange.mark_displayed(index);
                self.last_displayed = Some(index);
            }
        }
        if controls.capture().is_requested() {
            controls.capture().fulfil(self.backend.capture());
        }

        let on_time = presented && finished <= tick.time;
        let latency = match (on_time, latest.as_ref()) {
            (true, Some(f)) => Some(tick.time.saturating_sub(f.render_start)),
            _ => None,
        };
        self.pipeline.stats.record_vsync(
            on_time.then_some(tick.time),
            stale && on_time,
            warp_duration,
            latency,
            self.backend.gpu_time_ms(),
        );

        // The refresh starts scanning out here
        clock.sleep_until(tick.time);
        self.pipeline.exchange.signal_vsync(tick);

        let mut skipped = 0;
        if on_time {
            self.next_tick = tick.index + 1;
        } else {
            let next = self.pipeline.vsync.tick_after(clock.now()).index.max(tick.index + 1);
            skipped = next - tick.index - 1;
            if skipped > 0 {
                self.pipeline.stats.record_skipped(skipped);
            }
            log::warn!(
                "Missed vsync {} (warp {:.2} ms){}",
                tick.index,
                warp_duration.as_secs_f64() * 1000.0,
                if skipped > 0 { format!(", skipping {} more", skipped) } else { String::new() }
            );
            self.next_tick = next;
        }

        log::trace!(
            "vsync {} frame {:?} warp {:?}{}",
            tick.index,
            frame_index,
            warp_duration,
            if stale { " (re-warp)" } else { "" }
        );

        Ok(TickReport {
            tick,
            frame_index,
            on_time,
            stale,
            warp_duration,
            skipped,
        })
    }

    /// Handle vsyncs until stopped, or until the first vsync after `until`
    pub fn run(&mut self, until: Option<ClockTime>) -> Result<()> {
        log::info!(
            "Warp thread running: {} at {:.2} Hz, late latch {}",
            self.backend.name(),
            self.pipeline.vsync.refresh_hz(),
            if self.latch.is_late_latch() { "on" } else { "off" }
        );
        loop {
            let controls = &self.pipeline.controls;
            if controls.should_stop() || self.pipeline.exchange.is_shutdown() {
                break;
            }
            let tick = self.next_tick();
            if until.is_some_and(|until| tick.time > until) {
                break;
            }
            self.run_tick(tick)?;
        }
        log::info!("Warp thread finished at vsync {}", self.next_tick);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use crate::core::config::AtwConfig;
    use crate::core::time::{Clock, ManualClock};
    use crate::display::{FrameSink, HeadlessSink, PngDump, VsyncClock};
    use crate::frame::{EyeImage, FrameExchange};
    use crate::pose::{FixedOrientation, OrientationSource, SimulatedHmd};
    use crate::scheduler::{SharedControls, StatsCollector};

    const PERIOD: Duration = Duration::from_millis(10);

    /// Warp that takes `cost` of manual clock time and logs what it saw
    struct TestBackend {
        clock: Arc<ManualClock>,
        cost: Duration,
        seen: Arc<Mutex<Vec<(u64, u64, ClockTime)>>>,
    }

    impl WarpBackend for TestBackend {
        fn name(&self) -> &'static str {
            "test"
        }

        fn warp_and_present(&mut self, job: &WarpJob<'_>) -> Result<()> {
            let started = self.clock.now();
            self.seen
                .lock()
                .unwrap()
                .push((job.tick.index, job.frame.index, started));
            self.clock.advance(self.cost);
            Ok(())
        }

        fn capture(&mut self) -> Option<EyeImage> {
            Some(EyeImage::filled(2, 1, [1, 2, 3, 255]))
        }
    }

    struct Harness {
        clock: Arc<ManualClock>,
        pipeline: Pipeline,
        seen: Arc<Mutex<Vec<(u64, u64, ClockTime)>>>,
        fov: Fov,
    }

    impl Harness {
        fn new(source: Arc<dyn OrientationSource>) -> Self {
            let clock = Arc::new(ManualClock::new());
            let config = AtwConfig::default();
            let pipeline = Pipeline {
                exchange: Arc::new(FrameExchange::new()),
                source,
                clock: clock.clone(),
                controls: Arc::new(SharedControls::new(&config)),
                stats: Arc::new(StatsCollector::new("test", 100.0)),
                vsync: VsyncClock::new(PERIOD, PERIOD),
            };
            Self {
                clock,
                pipeline,
                seen: Arc::new(Mutex::new(Vec::new())),
                fov: Fov::symmetric(90.0),
            }
        }

        fn scheduler(&self, cost: Duration, late_latch: bool) -> WarpScheduler {
            let backend = TestBackend {
                clock: self.clock.clone(),
                cost,
                seen: self.seen.clone(),
            };
            let latch = LatchPolicy::new(late_latch, Duration::from_millis(1), PERIOD);
            WarpScheduler::new(Box::new(backend), self.pipeline.clone(), latch, self.fov, 4)
        }

        fn publish(&self, index: u64) {
            let pose = HeadPose::new(Quat::IDENTITY, self.clock.now());
            let frame = StereoFrame::solid(index, 4, [255, 255, 255, 255], pose, self.fov);
            self.pipeline.exchange.publish(frame).unwrap();
        }

        fn stats(&self) -> crate::scheduler::AtwStats {
            self.pipeline
                .stats
                .snapshot(self.pipeline.exchange.counters(), self.clock.now())
        }
    }

    fn fixed() -> Arc<dyn OrientationSource> {
        Arc::new(FixedOrientation(Quat::IDENTITY))
    }

    #[test]
    fn test_every_vsync_presents_once() {
        let h = Harness::new(fixed());
        let mut warp = h.scheduler(Duration::from_millis(2), true);
        for i in 1..=10 {
            h.publish(i);
            let tick = warp.next_tick();
            let report = warp.run_tick(tick).unwrap();
            assert!(report.on_time);
            assert!(!report.stale);
            assert_eq!(report.frame_index, Some(i));
        }
        let ticks: Vec<u64> = h.seen.lock().unwrap().iter().map(|s| s.0).collect();
        assert_eq!(ticks, (0..10).collect::<Vec<_>>());

        let stats = h.stats();
        assert_eq!(stats.vsyncs, 10);
        assert_eq!(stats.presented, 10);
        assert_eq!(stats.missed_vsyncs, 0);
        assert_eq!(stats.frames_dropped, 0);
    }

    #[test]
    fn test_slow_renderer_rewarps_without_missing() {
        let h = Harness::new(fixed());
        let mut warp = h.scheduler(Duration::from_millis(2), true);
        let mut index = 0;
        for n in 0..12 {
            // New stereo frame only every third refresh
            if n % 3 == 0 {
                index += 1;
                h.publish(index);
            }
            let tick = warp.next_tick();
            warp.run_tick(tick).unwrap();
        }
        let stats = h.stats();
        assert_eq!(stats.presented, 12);
        assert_eq!(stats.missed_vsyncs, 0);
        assert_eq!(stats.stale_presents, 8);
        assert_eq!(h.pipeline.exchange.counters().displayed, 4);
    }

    #[test]
    fn test_undisplayed_frames_count_as_dropped() {
        let h = Harness::new(fixed());
        let mut warp = h.scheduler(Duration::from_millis(1), true);
        h.publish(1);
        h.publish(2);
        h.publish(3);
        warp.run_tick(warp.next_tick()).unwrap();
        let stats = h.stats();
        assert_eq!(stats.frames_dropped, 2);
        assert_eq!(h.seen.lock().unwrap()[0].1, 3);
    }

    #[test]
    fn test_placeholder_before_first_frame() {
        let h = Harness::new(fixed());
        let mut warp = h.scheduler(Duration::from_millis(1), true);
        let report = warp.run_tick(warp.next_tick()).unwrap();
        assert!(report.on_time);
        assert_eq!(report.frame_index, None);
        assert!(!report.stale);
        assert_eq!(h.seen.lock().unwrap()[0].1, 0);
    }

    #[test]
    fn test_late_latch_starts_close_to_vsync() {
        let h = Harness::new(fixed());
        let mut warp = h.scheduler(Duration::from_millis(2), true);
        for _ in 0..20 {
            let tick = warp.next_tick();
            warp.run_tick(tick).unwrap();
        }
        // Lead converges to 2 ms * 1.5 + 1 ms margin
        let seen = h.seen.lock().unwrap();
        let &(tick, _, started) = seen.last().unwrap();
        let vsync_time = h.pipeline.vsync.tick(tick).time;
        let lead = vsync_time - started;
        assert!(lead >= Duration::from_millis(3) && lead <= Duration::from_micros(4100), "{:?}", lead);
    }

    #[test]
    fn test_without_late_latch_warps_after_previous_vsync() {
        let h = Harness::new(fixed());
        let mut warp = h.scheduler(Duration::from_millis(2), false);
        warp.run_tick(warp.next_tick()).unwrap();
        let tick = warp.next_tick();
        warp.run_tick(tick).unwrap();
        let started = h.seen.lock().unwrap()[1].2;
        assert_eq!(started, tick.time - PERIOD);
    }

    #[test]
    fn test_slow_backend_misses_and_skips_forward() {
        let h = Harness::new(fixed());
        // 2.5 refreshes per warp
        let mut warp = h.scheduler(Duration::from_millis(25), false);
        h.publish(1);
        let first = warp.next_tick();
        let report = warp.run_tick(first).unwrap();
        assert!(!report.on_time);
        assert!(report.skipped >= 1);
        assert!(warp.next_tick().time > h.clock.now());

        let stats = h.stats();
        assert_eq!(stats.presented, 0);
        assert_eq!(stats.missed_vsyncs, 1 + report.skipped);
        assert_eq!(stats.vsyncs, stats.missed_vsyncs);
    }

    #[test]
    fn test_vsync_is_signalled_at_tick_time() {
        let h = Harness::new(fixed());
        let mut warp = h.scheduler(Duration::from_millis(1), true);
        let tick = warp.next_tick();
        warp.run_tick(tick).unwrap();
        assert_eq!(h.clock.now(), tick.time);
        assert_eq!(h.pipeline.exchange.last_vsync(), Some(tick));
    }

    #[test]
    fn test_pause_control_reaches_source() {
        let hmd = Arc::new(SimulatedHmd::new(10.0, std::f32::consts::PI));
        let h = Harness::new(hmd.clone());
        let mut warp = h.scheduler(Duration::from_millis(1), true);
        h.pipeline.controls.set_paused(true);
        warp.run_tick(warp.next_tick()).unwrap();
        assert!(hmd.is_paused());
        h.pipeline.controls.set_paused(false);
        warp.run_tick(warp.next_tick()).unwrap();
        assert!(!hmd.is_paused());
    }

    #[test]
    fn test_capture_request_is_served() {
        let h = Harness::new(fixed());
        let mut warp = h.scheduler(Duration::from_millis(1), true);
        let controls = h.pipeline.controls.clone();
        let requester = std::thread::spawn(move || controls.capture().request(Duration::from_secs(5)));
        while !h.pipeline.controls.capture().is_requested() {
            std::thread::yield_now();
        }
        warp.run_tick(warp.next_tick()).unwrap();
        let image = requester.join().unwrap().unwrap();
        assert_eq!(image.get(1, 0), [1, 2, 3, 255]);
    }

    /// Presents a full-size output into a real sink; the manual clock
    /// advances by the wall time the sink took
    struct SinkBackend {
        clock: Arc<ManualClock>,
        sink: Box<dyn FrameSink>,
        output: EyeImage,
    }

    impl WarpBackend for SinkBackend {
        fn name(&self) -> &'static str {
            "sink"
        }

        fn warp_and_present(&mut self, job: &WarpJob<'_>) -> Result<()> {
            let began = std::time::Instant::now();
            self.sink.present(&self.output, job.tick)?;
            self.clock.advance(began.elapsed());
            Ok(())
        }

        fn capture(&mut self) -> Option<EyeImage> {
            self.sink.last_frame().cloned()
        }
    }

    #[test]
    fn test_png_dump_every_vsync_misses_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let h = Harness::new(fixed());
        let sink = HeadlessSink::with_dump(PngDump::new(dir.path().to_path_buf(), 1).unwrap());
        let backend = SinkBackend {
            clock: h.clock.clone(),
            sink: Box::new(sink),
            output: EyeImage::from_fn(1280, 640, |x, y| [x as u8, y as u8, 128, 255]),
        };
        // Each present gets the whole refresh
        let latch = LatchPolicy::new(false, Duration::from_millis(1), PERIOD);
        let mut warp = WarpScheduler::new(Box::new(backend), h.pipeline.clone(), latch, h.fov, 4);

        for i in 1..=20 {
            h.publish(i);
            let report = warp.run_tick(warp.next_tick()).unwrap();
            assert!(report.on_time, "vsync {} missed after {:?}", report.tick.index, report.warp_duration);
        }
        let stats = h.stats();
        assert_eq!(stats.presented, 20);
        assert_eq!(stats.missed_vsyncs, 0);

        // Dropping the scheduler drains the writer
        drop(warp);
        let written = std::fs::read_dir(dir.path()).unwrap().count();
        assert!(written >= 1 && written <= 20, "{} files", written);
    }

    #[test]
    fn test_run_stops_at_deadline() {
        let h = Harness::new(fixed());
        let mut warp = h.scheduler(Duration::from_millis(1), true);
        warp.run(Some(Duration::from_millis(55))).unwrap();
        // Ticks at 10, 20, 30, 40, 50 ms
        assert_eq!(h.stats().presented, 5);
    }
}
