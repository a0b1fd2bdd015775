//! When the warp thread samples the head pose for a vsync

use std::time::Duration;

use crate::core::types::ClockTime;
use crate::display::VsyncTick;

/// Weight of the newest warp duration in the moving average
const EMA_ALPHA: f64 = 0.1;
/// Headroom multiplier on the average warp cost
const LEAD_FACTOR: f64 = 1.5;

/// Late-latch timing: start the warp `lead` before the vsync, where `lead`
/// tracks the measured warp cost. Without late latching the warp starts
/// right after the previous vsync.
#[derive(Clone, Debug)]
pub struct LatchPolicy {
    enabled: bool,
    margin: Duration,
    period: Duration,
    /// Moving average of the warp duration in seconds
    average: Option<f64>,
}

impl LatchPolicy {
    pub fn new(enabled: bool, margin: Duration, period: Duration) -> Self {
        Self {
            enabled,
            margin,
            period,
            average: None,
        }
    }

    pub fn is_late_latch(&self) -> bool {
        self.enabled
    }

    /// Feed the duration of a completed warp + present
    pub fn record(&mut self, warp_duration: Duration) {
        let sample = warp_duration.as_secs_f64();
        self.average = Some(match self.average {
            Some(avg) => avg + EMA_ALPHA * (sample - avg),
            None => sample,
        });
    }

    /// Average warp cost, if any warp has been measured
    pub fn average_warp(&self) -> Option<Duration> {
        self.average.map(Duration::from_secs_f64)
    }

    /// How long before the vsync the warp starts
    pub fn lead(&self) -> Duration {
        if !self.enabled {
            return self.period;
        }
        let Some(average) = self.average else {
            // Nothing measured yet: start half a refresh early
            return (self.period / 2).max(self.margin).min(self.period);
        };
        let lead = Duration::from_secs_f64(average * LEAD_FACTOR) + self.margin;
        lead.min(self.period)
    }

    /// Time to sample the pose and start warping for `tick`
    pub fn latch_time(&self, tick: VsyncTick) -> ClockTime {
        tick.time.saturating_sub(self.lead())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: Duration = Duration::from_micros(16_667);

    fn close(a: Duration, b: Duration) -> bool {
        a.abs_diff(b) < Duration::from_micros(1)
    }

    fn tick(ms: u64) -> VsyncTick {
        VsyncTick { index: 1, time: Duration::from_millis(ms) }
    }

    #[test]
    fn test_lead_follows_warp_cost() {
        let mut latch = LatchPolicy::new(true, Duration::from_millis(2), PERIOD);
        latch.record(Duration::from_millis(4));
        assert!(close(latch.lead(), Duration::from_millis(8)));
        assert!(close(latch.latch_time(tick(100)), Duration::from_millis(92)));
    }

    #[test]
    fn test_lead_is_clamped_to_period() {
        let mut latch = LatchPolicy::new(true, Duration::from_millis(2), PERIOD);
        latch.record(Duration::from_millis(40));
        assert_eq!(latch.lead(), PERIOD);
        // Never before time zero
        assert_eq!(latch.latch_time(tick(5)), Duration::ZERO);
    }

    #[test]
    fn test_average_smooths_spikes() {
        let mut latch = LatchPolicy::new(true, Duration::ZERO, PERIOD);
        latch.record(Duration::from_millis(2));
        latch.record(Duration::from_millis(12));
        assert!(close(latch.average_warp().unwrap(), Duration::from_millis(3)));
    }

    #[test]
    fn test_disabled_latches_after_previous_vsync() {
        let mut latch = LatchPolicy::new(false, Duration::from_millis(2), PERIOD);
        latch.record(Duration::from_millis(1));
        assert_eq!(latch.lead(), PERIOD);
    }

    #[test]
    fn test_unmeasured_lead() {
        let latch = LatchPolicy::new(true, Duration::from_millis(1), PERIOD);
        assert_eq!(latch.lead(), PERIOD / 2);
    }
}
