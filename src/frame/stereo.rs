//! Rendered stereo frame pairs

use crate::core::types::ClockTime;
use crate::frame::eye_image::EyeImage;
use crate::math::fov::Fov;
use crate::pose::hmd::HeadPose;

/// Left or right eye
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eye {
    Left = 0,
    Right = 1,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// A stereo pair produced by the render stage
#[derive(Clone, Debug)]
pub struct StereoFrame {
    /// Monotonically increasing render counter
    pub index: u64,
    pub eyes: [EyeImage; 2],
    /// Head pose the eye buffers were rendered with
    pub render_pose: HeadPose,
    /// Field of view of the eye buffers
    pub fov: Fov,
    /// Display time the render pose was predicted for
    pub predicted_display_time: ClockTime,
    pub render_start: ClockTime,
    pub render_end: ClockTime,
}

impl StereoFrame {
    pub fn eye(&self, eye: Eye) -> &EyeImage {
        &self.eyes[eye.index()]
    }

    /// Time spent rendering the pair
    pub fn render_duration(&self) -> std::time::Duration {
        self.render_end.saturating_sub(self.render_start)
    }

    /// Single-colour frame, handy as a placeholder before the first render
    pub fn solid(index: u64, resolution: u32, color: [u8; 4], pose: HeadPose, fov: Fov) -> Self {
        let image = EyeImage::filled(resolution, resolution, color);
        Self {
            index,
            eyes: [image.clone(), image],
            render_pose: pose,
            fov,
            predicted_display_time: pose.time,
            render_start: pose.time,
            render_end: pose.time,
        }
    }
}
