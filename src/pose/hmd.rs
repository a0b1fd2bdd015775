//! Head-mounted display orientation

use std::sync::Mutex;

use crate::core::config::HmdConfig;
use crate::core::types::{ClockTime, Mat3, Quat};

/// A timestamped head orientation (world-from-head rotation)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeadPose {
    pub orientation: Quat,
    pub time: ClockTime,
}

impl HeadPose {
    pub fn new(orientation: Quat, time: ClockTime) -> Self {
        Self { orientation, time }
    }

    /// Head-from-world rotation (the rotational part of the view matrix)
    pub fn view_rotation(&self) -> Mat3 {
        Mat3::from_quat(self.orientation.conjugate())
    }
}

/// Anything that can report where the head points at a given time.
/// Shared between the render and warp threads.
pub trait OrientationSource: Send + Sync + 'static {
    fn pose_at(&self, time: ClockTime) -> HeadPose;

    /// Freeze or resume the motion at `now`. Sources that cannot pause ignore it.
    fn set_paused(&self, _paused: bool, _now: ClockTime) {}
}

/// Always reports the same orientation
pub struct FixedOrientation(pub Quat);

impl OrientationSource for FixedOrientation {
    fn pose_at(&self, time: ClockTime) -> HeadPose {
        HeadPose::new(self.0, time)
    }
}

/// Pause bookkeeping for the simulated motion
#[derive(Clone, Copy, Debug, Default)]
struct MotionState {
    /// Simulation time the motion is frozen at
    frozen_at: Option<ClockTime>,
    /// Total time spent paused; simulation time lags the clock by this much
    paused_for: ClockTime,
}

impl MotionState {
    fn sim_time(&self, time: ClockTime) -> ClockTime {
        self.frozen_at
            .unwrap_or_else(|| time.saturating_sub(self.paused_for))
    }
}

/// Deterministic head motion: the head sweeps around the forward axis,
/// yaw following a sine and pitch a cosine at half the amplitude.
/// Resuming after a pause continues from the frozen orientation.
pub struct SimulatedHmd {
    amplitude: f32,
    angular_speed: f32,
    state: Mutex<MotionState>,
}

impl SimulatedHmd {
    pub fn new(amplitude_degrees: f32, angular_speed: f32) -> Self {
        Self {
            amplitude: amplitude_degrees.to_radians(),
            angular_speed,
            state: Mutex::new(MotionState::default()),
        }
    }

    pub fn from_config(config: &HmdConfig) -> Self {
        let hmd = Self::new(config.amplitude_degrees, config.angular_speed);
        if config.paused {
            hmd.set_paused(true, ClockTime::ZERO);
        }
        hmd
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MotionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn is_paused(&self) -> bool {
        self.state().frozen_at.is_some()
    }

    /// Orientation of the motion at simulation time `t` seconds
    pub fn orientation_at_secs(&self, t: f32) -> Quat {
        let phase = t * self.angular_speed;
        let yaw = self.amplitude * phase.sin();
        let pitch = 0.5 * self.amplitude * phase.cos();
        Quat::from_euler(glam::EulerRot::YXZ, yaw, pitch, 0.0)
    }
}

impl OrientationSource for SimulatedHmd {
    fn pose_at(&self, time: ClockTime) -> HeadPose {
        let sim_time = self.state().sim_time(time);
        HeadPose::new(self.orientation_at_secs(sim_time.as_secs_f32()), time)
    }

    /// Freeze the motion at `now`, or resume it from where it stopped
    fn set_paused(&self, paused: bool, now: ClockTime) {
        let mut state = self.state();
        match (paused, state.frozen_at) {
            (true, None) => state.frozen_at = Some(state.sim_time(now)),
            (false, Some(frozen)) => {
                state.paused_for = now.saturating_sub(frozen);
                state.frozen_at = None;
            }
            _ => {}
        }
    }
}
