//! GPU plumbing shared by the warp backends

pub mod window;
pub mod context;
pub mod pipeline;
pub mod profiler;

pub use context::{GpuContext, GraphicsApi};
pub use profiler::{GpuPass, GpuProfiler, GpuTimings};
