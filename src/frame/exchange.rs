//! Single-slot mailbox between the render and warp threads
//!
//! The render thread publishes finished stereo frames, the warp thread
//! takes whatever is newest at latch time. The warp side only ever holds
//! the slot lock long enough to clone an `Arc`, so a slow renderer can
//! never make it wait. The warp thread also broadcasts each vsync through
//! here so the renderer can pace itself to the display.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::core::error::Error;
use crate::core::types::Result;
use crate::display::vsync::VsyncTick;
use crate::frame::stereo::StereoFrame;

/// What happened to the slot on publish
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The slot held nothing undisplayed
    Fresh,
    /// An older frame was replaced before it was ever displayed
    Replaced { dropped_index: u64 },
}

/// Frame accounting
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ExchangeCounters {
    pub published: u64,
    /// Published but replaced before any vsync displayed them
    pub dropped: u64,
    /// Distinct frames that reached the display at least once
    pub displayed: u64,
}

struct Slot {
    latest: Option<Arc<StereoFrame>>,
    displayed: bool,
}

pub struct FrameExchange {
    slot: Mutex<Slot>,
    vsync: Mutex<Option<VsyncTick>>,
    vsync_cond: Condvar,
    shutdown: AtomicBool,
    published: AtomicU64,
    dropped: AtomicU64,
    displayed: AtomicU64,
}

impl FrameExchange {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                latest: None,
                displayed: false,
            }),
            vsync: Mutex::new(None),
            vsync_cond: Condvar::new(),
            shutdown: AtomicBool::new(false),
            published: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            displayed: AtomicU64::new(0),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make `frame` the newest frame. Its index must be greater than the
    /// current one.
    pub fn publish(&self, frame: StereoFrame) -> Result<PublishOutcome> {
        if self.is_shutdown() {
            return Err(Error::Shutdown);
        }

        let mut slot = self.slot();
        let mut outcome = PublishOutcome::Fresh;
        if let Some(current) = &slot.latest {
            if frame.index <= current.index {
                return Err(Error::Exchange(format!(
                    "frame {} is not newer than frame {}",
                    frame.index, current.index
                )));
            }
            if !slot.displayed {
                outcome = PublishOutcome::Replaced {
                    dropped_index: current.index,
                };
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        log::trace!("Published stereo frame {}", frame.index);
        slot.latest = Some(Arc::new(frame));
        slot.displayed = false;
        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(outcome)
    }

    /// Newest frame, if any has been published
    pub fn latest(&self) -> Option<Arc<StereoFrame>> {
        self.slot().latest.clone()
    }

    /// Record that frame `index` reached the display. Returns true the
    /// first time a given frame is displayed.
    pub fn mark_displayed(&self, index: u64) -> bool {
        let mut slot = self.slot();
        let is_latest = slot.latest.as_ref().is_some_and(|f| f.index == index);
        if is_latest && !slot.displayed {
            slot.displayed = true;
            self.displayed.fetch_add(1, Ordering::Relaxed);
            return true;
        }
        false
    }

    /// Broadcast that the display refreshed
    pub fn signal_vsync(&self, tick: VsyncTick) {
        let mut vsync = self.vsync.lock().unwrap_or_else(|e| e.into_inner());
        *vsync = Some(tick);
        self.vsync_cond.notify_all();
    }

    /// Most recent vsync signalled
    pub fn last_vsync(&self) -> Option<VsyncTick> {
        *self.vsync.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Block until a vsync newer than `after` is signalled, shutdown, or `timeout`.
    /// Returns the newest tick if one arrived.
    pub fn wait_for_vsync(&self, after: Option<u64>, timeout: Duration) -> Option<VsyncTick> {
        let is_new = |tick: &Option<VsyncTick>| match (tick, after) {
            (Some(t), Some(a)) => t.index > a,
            (Some(_), None) => true,
            (None, _) => false,
        };

        let guard = self.vsync.lock().unwrap_or_else(|e| e.into_inner());
        let (guard, _) = self
            .vsync_cond
            .wait_timeout_while(guard, timeout, |tick| {
                !is_new(tick) && !self.shutdown.load(Ordering::Acquire)
            })
            .unwrap_or_else(|e| e.into_inner());

        if is_new(&*guard) { *guard } else { None }
    }

    /// Stop accepting frames and wake every waiter
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        let _vsync = self.vsync.lock().unwrap_or_else(|e| e.into_inner());
        self.vsync_cond.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub fn counters(&self) -> ExchangeCounters {
        ExchangeCounters {
            published: self.published.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            displayed: self.displayed.load(Ordering::Relaxed),
        }
    }
}

impl Default for FrameExchange {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Quat;
    use crate::math::Fov;
    use crate::pose::HeadPose;

    fn frame(index: u64) -> StereoFrame {
        let pose = HeadPose::new(Quat::IDENTITY, Duration::ZERO);
        StereoFrame::solid(index, 4, [index as u8, 0, 0, 255], pose, Fov::default())
    }

    #[test]
    fn test_replacing_undisplayed_frame_counts_drop() {
        let exchange = FrameExchange::new();
        assert_eq!(exchange.publish(frame(1)).unwrap(), PublishOutcome::Fresh);
        assert_eq!(
            exchange.publish(frame(2)).unwrap(),
            PublishOutcome::Replaced { dropped_index: 1 }
        );
        assert!(exchange.mark_displayed(2));
        assert!(!exchange.mark_displayed(2));
        assert_eq!(exchange.publish(frame(3)).unwrap(), PublishOutcome::Fresh);

        let counters = exchange.counters();
        assert_eq!(counters.published, 3);
        assert_eq!(counters.dropped, 1);
        assert_eq!(counters.displayed, 1);
        assert_eq!(exchange.latest().unwrap().index, 3);
    }

    #[test]
    fn test_stale_index_rejected() {
        let exchange = FrameExchange::new();
        exchange.publish(frame(5)).unwrap();
        assert!(matches!(exchange.publish(frame(5)), Err(Error::Exchange(_))));
        assert!(matches!(exchange.publish(frame(4)), Err(Error::Exchange(_))));
        assert_eq!(exchange.latest().unwrap().index, 5);
    }

    #[test]
    fn test_mark_displayed_ignores_old_index() {
        let exchange = FrameExchange::new();
        exchange.publish(frame(1)).unwrap();
        exchange.publish(frame(2)).unwrap();
        assert!(!exchange.mark_displayed(1));
        assert_eq!(exchange.counters().displayed, 0);
    }

    #[test]
    fn test_latest_does_not_wait_for_reader_holding_frame() {
        let exchange = FrameExchange::new();
        exchange.publish(frame(1)).unwrap();
        let held = exchange.latest().unwrap();
        exchange.publish(frame(2)).unwrap();
        // The old Arc stays valid while the slot moves on
        assert_eq!(held.index, 1);
        assert_eq!(exchange.latest().unwrap().index, 2);
    }

    #[test]
    fn test_vsync_wakes_waiter() {
        let exchange = Arc::new(FrameExchange::new());
        let waiter = {
            let exchange = exchange.clone();
            std::thread::spawn(move || exchange.wait_for_vsync(Some(0), Duration::from_secs(5)))
        };
        std::thread::sleep(Duration::from_millis(10));
        exchange.signal_vsync(VsyncTick { index: 1, time: Duration::from_millis(16) });
        let tick = waiter.join().unwrap();
        assert_eq!(tick.map(|t| t.index), Some(1));
    }

    #[test]
    fn test_wait_times_out_without_vsync() {
        let exchange = FrameExchange::new();
        exchange.signal_vsync(VsyncTick { index: 3, time: Duration::ZERO });
        assert!(exchange.wait_for_vsync(Some(3), Duration::from_millis(5)).is_none());
        assert_eq!(exchange.wait_for_vsync(Some(2), Duration::from_millis(5)).map(|t| t.index), Some(3));
    }

    #[test]
    fn test_shutdown_wakes_and_rejects() {
        let exchange = Arc::new(FrameExchange::new());
        let waiter = {
            let exchange = exchange.clone();
            std::thread::spawn(move || exchange.wait_for_vsync(None, Duration::from_secs(30)))
        };
        std::thread::sleep(Duration::from_millis(10));
        exchange.shutdown();
        assert!(waiter.join().unwrap().is_none());
        assert!(matches!(exchange.publish(frame(1)), Err(Error::Shutdown)));
    }
}
