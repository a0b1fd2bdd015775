//! ATW - asynchronous time warp
//!
//! A render thread draws stereo frames at whatever rate it manages; a
//! deadline-driven warp thread re-projects the newest one for the head pose
//! at every display refresh, on the CPU or through wgpu (OpenGL / Vulkan).

pub mod core;
pub mod math;
pub mod pose;
pub mod frame;
pub mod scene;
pub mod display;
pub mod warp;
pub mod render;
pub mod scheduler;
pub mod control;
