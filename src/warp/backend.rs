//! The seam between the warp scheduler and the three warp implementations

use crate::core::types::{Mat3, Result};
use crate::display::VsyncTick;
use crate::frame::{EyeImage, StereoFrame};

/// Everything needed to warp one stereo frame for one refresh
pub struct WarpJob<'a> {
    pub frame: &'a StereoFrame,
    pub tick: VsyncTick,
    /// Per-eye transform at the start of the refresh
    pub start: [Mat3; 2],
    /// Per-eye transform at the end of the refresh
    pub end: [Mat3; 2],
    /// Sample red and blue through their own distortion coordinates
    pub chromatic_aberration: bool,
}

/// A time warp implementation: warps both eyes of a frame and hands the
/// result to the display for `job.tick`.
pub trait WarpBackend: Send {
    fn name(&self) -> &'static str;

    fn warp_and_present(&mut self, job: &WarpJob<'_>) -> Result<()>;

    /// Copy of the last presented output (left eye left, right eye right)
    fn capture(&mut self) -> Option<EyeImage>;

    /// GPU execution time of the last warp, when the backend can measure it
    fn gpu_time_ms(&self) -> Option<f32> {
        None
    }

    /// The window the output is shown in changed size
    fn resize(&mut self, _width: u32, _height: u32) {}
}
