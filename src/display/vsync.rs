//! Vertical sync timing

use std::time::Duration;

use crate::core::types::ClockTime;

/// Start of one display refresh
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct VsyncTick {
    /// Refresh counter since the display started
    pub index: u64,
    /// Time the refresh starts scanning out
    pub time: ClockTime,
}

/// Fixed-rate refresh schedule anchored at `origin`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VsyncClock {
    period: Duration,
    origin: ClockTime,
}

impl VsyncClock {
    pub fn new(period: Duration, origin: ClockTime) -> Self {
        assert!(!period.is_zero(), "vsync period must be non-zero");
        Self { period, origin }
    }

    /// Refresh schedule at `hz`, first refresh at `origin`
    pub fn from_hz(hz: f32, origin: ClockTime) -> Self {
        Self::new(Duration::from_nanos((1e9 / hz as f64).round() as u64), origin)
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn refresh_hz(&self) -> f32 {
        (1.0 / self.period.as_secs_f64()) as f32
    }

    pub fn origin(&self) -> ClockTime {
        self.origin
    }

    /// The refresh with the given counter
    pub fn tick(&self, index: u64) -> VsyncTick {
        let nanos = self.period.as_nanos() * index as u128;
        VsyncTick {
            index,
            time: self.origin + Duration::from_nanos(nanos as u64),
        }
    }

    /// First refresh starting at or after `t`
    pub fn tick_at_or_after(&self, t: ClockTime) -> VsyncTick {
        if t <= self.origin {
            return self.tick(0);
        }
        let since = (t - self.origin).as_nanos();
        let period = self.period.as_nanos();
        self.tick(since.div_ceil(period) as u64)
    }

    /// First refresh starting strictly after `t`
    pub fn tick_after(&self, t: ClockTime) -> VsyncTick {
        let tick = self.tick_at_or_after(t);
        if tick.time == t && t >= self.origin {
            self.tick(tick.index + 1)
        } else {
            tick
        }
    }

    /// Time the refresh that starts at `tick` finishes scanning out
    pub fn refresh_end(&self, tick: VsyncTick) -> ClockTime {
        tick.time + self.period
    }
}
