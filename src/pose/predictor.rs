//! Constant angular velocity prediction from sensor samples

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::time::Clock;
use crate::core::types::{ClockTime, Quat, Vec3};
use crate::pose::hmd::{HeadPose, OrientationSource};

/// Predictions further ahead than this are clamped
pub const MAX_PREDICTION: Duration = Duration::from_millis(50);

/// Extrapolates orientation from the two most recent samples
#[derive(Debug, Default)]
pub struct PosePredictor {
    previous: Option<HeadPose>,
    latest: Option<HeadPose>,
}

impl PosePredictor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sensor sample. Samples not newer than the latest are ignored.
    pub fn push(&mut self, sample: HeadPose) {
        if let Some(latest) = self.latest {
            if sample.time <= latest.time {
                return;
            }
        }
        self.previous = self.latest.replace(sample);
    }

    pub fn latest(&self) -> Option<HeadPose> {
        self.latest
    }

    /// Angular velocity (axis * radians per second) between the last two samples
    pub fn angular_velocity(&self) -> Vec3 {
        let (Some(prev), Some(latest)) = (self.previous, self.latest) else {
            return Vec3::ZERO;
        };
        let dt = (latest.time - prev.time).as_secs_f32();
        if dt <= 0.0 {
            return Vec3::ZERO;
        }
        let mut delta = latest.orientation * prev.orientation.inverse();
        // Shortest arc
        if delta.w < 0.0 {
            delta = -delta;
        }
        let (axis, angle) = delta.to_axis_angle();
        axis * (angle / dt)
    }

    /// Predicted pose at `time`
    pub fn predict(&self, time: ClockTime) -> Option<HeadPose> {
        let latest = self.latest?;
        let ahead = time.saturating_sub(latest.time).min(MAX_PREDICTION);
        let rotation = Quat::from_scaled_axis(self.angular_velocity() * ahead.as_secs_f32());
        Some(HeadPose::new((rotation * latest.orientation).normalize(), time))
    }
}

/// Reads an orientation source the way a real IMU is read: only at the
/// current clock time, then predicts forward to the requested time.
pub struct SampledSensor {
    sensor: Arc<dyn OrientationSource>,
    clock: Arc<dyn Clock>,
    predictor: Mutex<PosePredictor>,
}

impl SampledSensor {
    pub fn new(sensor: Arc<dyn OrientationSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            sensor,
            clock,
            predictor: Mutex::new(PosePredictor::new()),
        }
    }
}

impl OrientationSource for SampledSensor {
    fn pose_at(&self, time: ClockTime) -> HeadPose {
        let now = self.clock.now();
        let sample = self.sensor.pose_at(now);
        let mut predictor = self.predictor.lock().unwrap_or_else(|e| e.into_inner());
        predictor.push(sample);
        predictor
            .predict(time)
            .unwrap_or(HeadPose::new(sample.orientation, time))
    }

    fn set_paused(&self, paused: bool, now: ClockTime) {
        self.sensor.set_paused(paused, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;
    use crate::pose::hmd::SimulatedHmd;

    #[test]
    fn test_single_sample_holds_orientation() {
        let mut p = PosePredictor::new();
        let q = Quat::from_rotation_y(0.2);
        p.push(HeadPose::new(q, Duration::from_millis(10)));
        let pred = p.predict(Duration::from_millis(20)).unwrap();
        assert!(pred.orientation.abs_diff_eq(q, 1e-6));
    }

    #[test]
    fn test_constant_rotation_extrapolates() {
        let mut p = PosePredictor::new();
        // 1 rad/s about Y
        p.push(HeadPose::new(Quat::from_rotation_y(0.0), Duration::from_millis(0)));
        p.push(HeadPose::new(Quat::from_rotation_y(0.01), Duration::from_millis(10)));

        let w = p.angular_velocity();
        assert!((w.y - 1.0).abs() < 1e-3);

        let pred = p.predict(Duration::from_millis(30)).unwrap();
        assert!(pred.orientation.abs_diff_eq(Quat::from_rotation_y(0.03), 1e-4));
    }

    #[test]
    fn test_prediction_is_clamped() {
        let mut p = PosePredictor::new();
        p.push(HeadPose::new(Quat::from_rotation_y(0.0), Duration::from_millis(0)));
        p.push(HeadPose::new(Quat::from_rotation_y(0.01), Duration::from_millis(10)));
        let far = p.predict(Duration::from_secs(10)).unwrap();
        let expected = Quat::from_rotation_y(0.01 + MAX_PREDICTION.as_secs_f32());
        assert!(far.orientation.abs_diff_eq(expected, 1e-4));
    }

    #[test]
    fn test_out_of_order_sample_ignored() {
        let mut p = PosePredictor::new();
        p.push(HeadPose::new(Quat::IDENTITY, Duration::from_millis(10)));
        p.push(HeadPose::new(Quat::from_rotation_x(1.0), Duration::from_millis(5)));
        assert_eq!(p.latest().unwrap().time, Duration::from_millis(10));
    }

    #[test]
    fn test_sampled_sensor_tracks_simulation() {
        let clock = Arc::new(ManualClock::new());
        let hmd: Arc<dyn OrientationSource> = Arc::new(SimulatedHmd::new(10.0, 1.0));
        let sensor = SampledSensor::new(hmd.clone(), clock.clone());

        for step in 0..10u64 {
            clock.set(Duration::from_millis(step * 2));
            sensor.pose_at(clock.now());
        }
        let target = clock.now() + Duration::from_millis(8);
        let predicted = sensor.pose_at(target);
        let exact = hmd.pose_at(target);
        assert!(predicted.orientation.angle_between(exact.orientation) < 1e-3);
    }
}
