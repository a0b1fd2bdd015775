//! Runtime-adjustable parameters shared by both threads and the debug server

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use crate::core::config::AtwConfig;
use crate::core::input::ControlAction;
use crate::frame::EyeImage;
use crate::scene::{MAX_FRAGMENT_LEVEL, RenderLoad};

/// Render delays stepped through by `CycleRenderDelay`, in milliseconds
pub const RENDER_DELAY_STEPS_MS: [f32; 5] = [0.0, 8.0, 16.0, 33.0, 50.0];

/// Lock-free knobs read by the render and warp threads every iteration
pub struct SharedControls {
    fragment_level: AtomicU32,
    render_delay_us: AtomicU64,
    paused: AtomicBool,
    chromatic_aberration: AtomicBool,
    stop: AtomicBool,
    pending_resize: Mutex<Option<(u32, u32)>>,
    capture: CaptureSlot,
}

impl SharedControls {
    pub fn new(config: &AtwConfig) -> Self {
        Self {
            fragment_level: AtomicU32::new(config.render.fragment_level.min(MAX_FRAGMENT_LEVEL)),
            render_delay_us: AtomicU64::new((config.render.extra_delay_ms.max(0.0) * 1000.0) as u64),
            paused: AtomicBool::new(config.hmd.paused),
            chromatic_aberration: AtomicBool::new(config.warp.correct_chromatic_aberration),
            stop: AtomicBool::new(false),
            pending_resize: Mutex::new(None),
            capture: CaptureSlot::default(),
        }
    }

    pub fn fragment_level(&self) -> u32 {
        self.fragment_level.load(Ordering::Relaxed)
    }

    /// Clamped to the supported range; returns the level actually set
    pub fn set_fragment_level(&self, level: u32) -> u32 {
        let level = level.min(MAX_FRAGMENT_LEVEL);
        self.fragment_level.store(level, Ordering::Relaxed);
        level
    }

    pub fn render_delay(&self) -> Duration {
        Duration::from_micros(self.render_delay_us.load(Ordering::Relaxed))
    }

    pub fn set_render_delay_ms(&self, ms: f32) {
        let us = (ms.max(0.0) * 1000.0) as u64;
        self.render_delay_us.store(us, Ordering::Relaxed);
    }

    /// Current scene workload
    pub fn render_load(&self) -> RenderLoad {
        RenderLoad {
            fragment_level: self.fragment_level(),
            extra_delay: self.render_delay(),
        }
    }

    pub fn paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    pub fn chromatic_aberration(&self) -> bool {
        self.chromatic_aberration.load(Ordering::Relaxed)
    }

    pub fn set_chromatic_aberration(&self, enabled: bool) {
        self.chromatic_aberration.store(enabled, Ordering::Relaxed);
    }

    /// Ask both threads to finish
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
        self.capture.cond.notify_all();
    }

    pub fn should_stop(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    /// The output window changed size; picked up by the warp thread
    pub fn request_resize(&self, width: u32, height: u32) {
        *self.pending_resize.lock().unwrap_or_else(|e| e.into_inner()) = Some((width, height));
    }

    pub fn take_resize(&self) -> Option<(u32, u32)> {
        self.pending_resize.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn capture(&self) -> &CaptureSlot {
        &self.capture
    }

    /// Apply a keyboard action. Returns a description of the change, or None
    /// for actions the caller handles itself.
    pub fn apply(&self, action: ControlAction) -> Option<String> {
        match action {
            ControlAction::TogglePause => {
                let paused = !self.paused();
                self.set_paused(paused);
                Some(format!("motion {}", if paused { "paused" } else { "resumed" }))
            }
            ControlAction::CycleFragmentLevel => {
                let level = (self.fragment_level() + 1) % (MAX_FRAGMENT_LEVEL + 1);
                self.set_fragment_level(level);
                Some(format!("fragment level {}", level))
            }
            ControlAction::CycleRenderDelay => {
                let current = self.render_delay().as_secs_f32() * 1000.0;
                let next = RENDER_DELAY_STEPS_MS
                    .iter()
                    .copied()
                    .find(|&ms| ms > current + 0.5)
                    .unwrap_or(0.0);
                self.set_render_delay_ms(next);
                Some(format!("render delay {} ms", next))
            }
            ControlAction::ToggleChromaticAberration => {
                let enabled = !self.chromatic_aberration();
                self.set_chromatic_aberration(enabled);
                Some(format!(
                    "chromatic aberration correction {}",
                    if enabled { "on" } else { "off" }
                ))
            }
            ControlAction::Quit => {
                self.request_stop();
                Some("quit".into())
            }
            ControlAction::LogStats => None,
        }
    }
}

/// Hand-off of a captured output frame from the warp thread to a requester
#[derive(Default)]
pub struct CaptureSlot {
    requested: AtomicBool,
    image: Mutex<Option<EyeImage>>,
    cond: Condvar,
}

impl CaptureSlot {
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Called by the warp thread after a present
    pub fn fulfil(&self, image: Option<EyeImage>) {
        let mut slot = self.image.lock().unwrap_or_else(|e| e.into_inner());
        *slot = image;
        self.requested.store(false, Ordering::Release);
        self.cond.notify_all();
    }

    /// Request a capture of the next presented frame and wait for it
    pub fn request(&self, timeout: Duration) -> Option<EyeImage> {
        let mut slot = self.image.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
        self.requested.store(true, Ordering::Release);
        let (mut slot, _) = self
            .cond
            .wait_timeout_while(slot, timeout, |_| self.requested.load(Ordering::Acquire))
            .unwrap_or_else(|e| e.into_inner());
        self.requested.store(false, Ordering::Release);
        slot.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn controls() -> SharedControls {
        SharedControls::new(&AtwConfig::default())
    }

    #[test]
    fn test_cycle_fragment_level_wraps() {
        let c = controls();
        for expected in [1, 2, 3, 0] {
            c.apply(ControlAction::CycleFragmentLevel);
            assert_eq!(c.fragment_level(), expected);
        }
        assert_eq!(c.set_fragment_level(42), MAX_FRAGMENT_LEVEL);
    }

    #[test]
    fn test_cycle_render_delay() {
        let c = controls();
        c.apply(ControlAction::CycleRenderDelay);
        assert_eq!(c.render_delay(), Duration::from_millis(8));
        c.set_render_delay_ms(50.0);
        c.apply(ControlAction::CycleRenderDelay);
        assert_eq!(c.render_delay(), Duration::ZERO);
    }

    #[test]
    fn test_toggles_and_quit() {
        let c = controls();
        assert!(c.chromatic_aberration());
        c.apply(ControlAction::ToggleChromaticAberration);
        assert!(!c.chromatic_aberration());
        c.apply(ControlAction::TogglePause);
        assert!(c.paused());
        assert_eq!(c.apply(ControlAction::LogStats), None);
        assert!(!c.should_stop());
        c.apply(ControlAction::Quit);
        assert!(c.should_stop());
    }

    #[test]
    fn test_resize_is_taken_once() {
        let c = controls();
        c.request_resize(800, 600);
        c.request_resize(1024, 512);
        assert_eq!(c.take_resize(), Some((1024, 512)));
        assert_eq!(c.take_resize(), None);
    }

    #[test]
    fn test_capture_handoff() {
        let c = Arc::new(controls());
        let warp = {
            let c = c.clone();
            std::thread::spawn(move || {
                while !c.capture().is_requested() {
                    std::thread::yield_now();
                }
                c.capture().fulfil(Some(EyeImage::filled(2, 2, [9, 9, 9, 255])));
            })
        };
        let image = c.capture().request(Duration::from_secs(5)).unwrap();
        assert_eq!(image.get(1, 1), [9, 9, 9, 255]);
        warp.join().unwrap();
    }

    #[test]
    fn test_capture_times_out() {
        let c = controls();
        assert!(c.capture().request(Duration::from_millis(5)).is_none());
        assert!(!c.capture().is_requested());
    }
}
