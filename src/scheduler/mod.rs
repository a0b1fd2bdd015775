//! The two activities of the time warp pipeline and what they share
//!
//! The render thread may take as long as it likes and drop frames. The
//! warp thread runs once per vsync off whatever frame is newest, so the
//! display never goes without a frame.

pub mod controls;
pub mod latch;
pub mod render_thread;
pub mod stats;
pub mod system;
pub mod warp_thread;

use std::sync::Arc;

use crate::core::time::Clock;
use crate::display::VsyncClock;
use crate::frame::FrameExchange;
use crate::pose::OrientationSource;

pub use controls::{CaptureSlot, SharedControls};
pub use latch::LatchPolicy;
pub use render_thread::RenderWorker;
pub use stats::{AtwStats, StatsCollector};
pub use system::AtwSystem;
pub use warp_thread::{TickReport, WarpScheduler};

/// Handles shared by the render and warp threads
#[derive(Clone)]
pub struct Pipeline {
    pub exchange: Arc<FrameExchange>,
    pub source: Arc<dyn OrientationSource>,
    pub clock: Arc<dyn Clock>,
    pub controls: Arc<SharedControls>,
    pub stats: Arc<StatsCollector>,
    pub vsync: VsyncClock,
}
