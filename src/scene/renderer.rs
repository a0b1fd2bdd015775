//! Stereo eye buffer renderer (the low-priority stage)

use std::time::Duration;

use rayon::prelude::*;

use crate::core::error::Error;
use crate::core::time::Clock;
use crate::core::types::{ClockTime, Mat3, Result, Vec3};
use crate::frame::{Eye, EyeImage, StereoFrame};
use crate::math::Fov;
use crate::pose::HeadPose;
use crate::scene::environment;

/// Highest supported fragment workload level
pub const MAX_FRAGMENT_LEVEL: u32 = 3;

/// Size of the per-eye corner marker as a fraction of the image
const MARKER_FRACTION: f32 = 0.06;

/// How much work one stereo render costs
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RenderLoad {
    /// Supersampling level: `(1 << level)²` samples per pixel
    pub fragment_level: u32,
    /// Extra time spent after rendering, to emulate a heavier scene
    pub extra_delay: Duration,
}

impl RenderLoad {
    pub fn samples_per_axis(&self) -> u32 {
        1 << self.fragment_level.min(MAX_FRAGMENT_LEVEL)
    }
}

/// Renders the environment for both eyes on its own thread pool
pub struct SceneRenderer {
    resolution: u32,
    fov: Fov,
    pool: rayon::ThreadPool,
}

impl SceneRenderer {
    pub fn new(resolution: u32, fov: Fov, threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("atw-render-pool-{}", i))
            .build()
            .map_err(|e| Error::Config(format!("render thread pool: {}", e)))?;
        Ok(Self { resolution, fov, pool })
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn fov(&self) -> Fov {
        self.fov
    }

    /// Render one eye as seen from `pose`
    pub fn render_eye(&self, eye: Eye, pose: &HeadPose, load: &RenderLoad) -> EyeImage {
        let res = self.resolution;
        let fov = self.fov;
        let n = load.samples_per_axis();
        let inv_samples = 1.0 / (n * n) as f32;
        let world_from_head = Mat3::from_quat(pose.orientation);
        let marker = (res as f32 * MARKER_FRACTION).ceil() as u32;
        let marker_color = match eye {
            Eye::Left => [255, 40, 40, 255],
            Eye::Right => [40, 40, 255, 255],
        };

        let mut image = EyeImage::new(res, res);
        self.pool.install(|| {
            image
                .pixels_mut()
                .par_chunks_mut(res as usize)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, pixel) in row.iter_mut().enumerate() {
                        if (x as u32) < marker && (y as u32) < marker {
                            *pixel = marker_color;
                            continue;
                        }

                        let mut acc = [0.0f32; 3];
                        for sy in 0..n {
                            for sx in 0..n {
                                let u = (x as f32 + (sx as f32 + 0.5) / n as f32) / res as f32;
                                let v = (y as f32 + (sy as f32 + 0.5) / n as f32) / res as f32;
                                let t = fov.tangent_at(u, v);
                                let dir = world_from_head * Vec3::new(t.x, t.y, -1.0);
                                let c = environment::shade(dir);
                                acc[0] += c[0];
                                acc[1] += c[1];
                                acc[2] += c[2];
                            }
                        }
                        *pixel = [
                            to_srgb8(acc[0] * inv_samples),
                            to_srgb8(acc[1] * inv_samples),
                            to_srgb8(acc[2] * inv_samples),
                            255,
                        ];
                    }
                });
        });
        image
    }

    /// Render a stereo pair for `pose`, then burn `load.extra_delay` on `clock`
    pub fn render(
        &self,
        index: u64,
        pose: HeadPose,
        predicted_display_time: ClockTime,
        load: &RenderLoad,
        clock: &dyn Clock,
    ) -> StereoFrame {
        let render_start = clock.now();
        let eyes = Eye::BOTH.map(|eye| self.render_eye(eye, &pose, load));
        if !load.extra_delay.is_zero() {
            clock.sleep_until(clock.now() + load.extra_delay);
        }
        StereoFrame {
            index,
            eyes,
            render_pose: pose,
            fov: self.fov,
            predicted_display_time,
            render_start,
            render_end: clock.now(),
        }
    }
}

#[inline]
fn to_srgb8(linear: f32) -> u8 {
    (linear.clamp(0.0, 1.0).powf(1.0 / 2.2) * 255.0 + 0.5) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::ManualClock;
    use crate::core::types::Quat;

    fn renderer(res: u32) -> SceneRenderer {
        SceneRenderer::new(res, Fov::symmetric(90.0), 2).unwrap()
    }

    #[test]
    fn test_eyes_carry_markers() {
        let r = renderer(64);
        let pose = HeadPose::new(Quat::IDENTITY, ClockTime::ZERO);
        let left = r.render_eye(Eye::Left, &pose, &RenderLoad::default());
        let right = r.render_eye(Eye::Right, &pose, &RenderLoad::default());
        assert_eq!(left.get(0, 0), [255, 40, 40, 255]);
        assert_eq!(right.get(0, 0), [40, 40, 255, 255]);
        // Away from the marker both eyes see the same environment
        assert_eq!(left.get(40, 40), right.get(40, 40));
    }

    #[test]
    fn test_rotation_changes_image() {
        let r = renderer(64);
        let a = r.render_eye(Eye::Left, &HeadPose::new(Quat::IDENTITY, ClockTime::ZERO), &RenderLoad::default());
        let b = r.render_eye(
            Eye::Left,
            &HeadPose::new(Quat::from_rotation_y(0.5), ClockTime::ZERO),
            &RenderLoad::default(),
        );
        assert_ne!(a, b);
    }

    #[test]
    fn test_extra_delay_uses_clock() {
        let r = renderer(16);
        let clock = ManualClock::new();
        let load = RenderLoad {
            fragment_level: 1,
            extra_delay: Duration::from_millis(40),
        };
        let pose = HeadPose::new(Quat::IDENTITY, ClockTime::ZERO);
        let frame = r.render(7, pose, Duration::from_millis(16), &load, &clock);
        assert_eq!(frame.index, 7);
        assert_eq!(frame.render_duration(), Duration::from_millis(40));
        assert_eq!(frame.eyes[0].width(), 16);
    }

    #[test]
    fn test_samples_per_axis() {
        assert_eq!(RenderLoad::default().samples_per_axis(), 1);
        let heavy = RenderLoad { fragment_level: 3, ..Default::default() };
        assert_eq!(heavy.samples_per_axis(), 8);
        let clamped = RenderLoad { fragment_level: 9, ..Default::default() };
        assert_eq!(clamped.samples_per_axis(), 8);
    }
}
