//! Display refresh model and frame sinks

pub mod vsync;
pub mod sink;
pub mod surface;

pub use vsync::{VsyncClock, VsyncTick};
pub use sink::{FrameSink, HeadlessSink, PngDump};
pub use surface::SurfaceSink;
