//! Time warp: reprojection of the newest stereo frame at display time

pub mod backend;
pub mod cpu;
pub mod distortion;
pub mod gpu;

pub use backend::{WarpBackend, WarpJob};
pub use cpu::{CpuBackend, CpuTimeWarp};
pub use distortion::{ChannelCoords, DistortionMesh, LensParams};
pub use gpu::{GpuBackend, GpuTimeWarp};
