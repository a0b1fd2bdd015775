//! Clocks and frame timing utilities

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::core::types::ClockTime;

/// Below this remaining time `SystemClock::sleep_until` stops sleeping and yields instead
const SPIN_THRESHOLD: Duration = Duration::from_micros(1500);

/// Monotonic time source shared by the render and warp threads
pub trait Clock: Send + Sync + 'static {
    /// Current time since the clock epoch
    fn now(&self) -> ClockTime;

    /// Block the calling thread until `deadline` (returns immediately if it has passed)
    fn sleep_until(&self, deadline: ClockTime);
}

/// Wall clock backed by `Instant`
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> ClockTime {
        self.epoch.elapsed()
    }

    fn sleep_until(&self, deadline: ClockTime) {
        loop {
            let now = self.now();
            if now >= deadline {
                return;
            }
            let remaining = deadline - now;
            if remaining > SPIN_THRESHOLD {
                // OS sleep overshoots, leave the last stretch to the yield loop
                std::thread::sleep(remaining - Duration::from_millis(1));
            } else {
                std::thread::yield_now();
            }
        }
    }
}

/// Deterministic clock for tests: time only moves through `sleep_until` and `advance`
pub struct ManualClock {
    now: Mutex<ClockTime>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Duration::ZERO)
    }

    pub fn starting_at(start: ClockTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move time forward by `delta`
    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += delta;
    }

    /// Jump to `time` (never moves backwards)
    pub fn set(&self, time: ClockTime) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = (*now).max(time);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> ClockTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn sleep_until(&self, deadline: ClockTime) {
        self.set(deadline);
    }
}

/// Rate statistics for a time window
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateWindow {
    pub avg: f32,
    pub min: f32,
    pub max: f32,
}

/// Rolling rate statistics over multiple time windows
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RateStats {
    pub one_sec: RateWindow,
    pub five_sec: RateWindow,
    pub fifteen_sec: RateWindow,
    pub tick_count: u64,
}

/// Tracks tick-to-tick timing of a periodic activity (warp presents, scene renders)
pub struct FrameTimer {
    last_tick: Option<ClockTime>,
    delta: Duration,
    tick_count: u64,
    /// Ring buffer of (timestamp, interval_secs) for rolling stats
    history: VecDeque<(ClockTime, f32)>,
}

impl FrameTimer {
    /// Create a new frame timer
    pub fn new() -> Self {
        Self {
            last_tick: None,
            delta: Duration::ZERO,
            tick_count: 0,
            history: VecDeque::new(),
        }
    }

    /// Record a tick at `now`
    pub fn tick(&mut self, now: ClockTime) {
        self.tick_count += 1;
        if let Some(last) = self.last_tick {
            self.delta = now.saturating_sub(last);
            self.history.push_back((now, self.delta.as_secs_f32()));
        }
        self.last_tick = Some(now);

        // Prune ticks older than 15 seconds
        let cutoff = now.saturating_sub(Duration::from_secs(15));
        while let Some(&(timestamp, _)) = self.history.front() {
            if timestamp < cutoff {
                self.history.pop_front();
            } else {
                break;
            }
        }
    }

    /// Interval between the last two ticks
    pub fn delta(&self) -> Duration {
        self.delta
    }

    /// Total number of ticks recorded
    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Rolling rate statistics over 1s, 5s, and 15s windows ending at `now`
    pub fn rate_stats(&self, now: ClockTime) -> RateStats {
        RateStats {
            one_sec: self.window_stats(now, Duration::from_secs(1)),
            five_sec: self.window_stats(now, Duration::from_secs(5)),
            fifteen_sec: self.window_stats(now, Duration::from_secs(15)),
            tick_count: self.tick_count,
        }
    }

    fn window_stats(&self, now: ClockTime, window: Duration) -> RateWindow {
        let cutoff = now.saturating_sub(window);

        let mut count = 0u32;
        let mut total_time = 0.0f32;
        let mut min_rate = f32::INFINITY;
        let mut max_rate = 0.0f32;

        for &(timestamp, interval) in self.history.iter() {
            if timestamp < cutoff {
                continue;
            }
            count += 1;
            total_time += interval;
            let rate = if interval > 0.0 { 1.0 / interval } else { 0.0 };
            min_rate = min_rate.min(rate);
            max_rate = max_rate.max(rate);
        }

        if count == 0 {
            return RateWindow::default();
        }

        RateWindow {
            avg: if total_time > 0.0 { count as f32 / total_time } else { 0.0 },
            min: min_rate,
            max: max_rate,
        }
    }
}

impl Default for FrameTimer {
    fn default() -> Self {
        Self::new()
    }
}
