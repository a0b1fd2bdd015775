//! The render loop: renders stereo frames for the predicted display time
//! and publishes them to the warp thread

use std::time::Duration;

use crate::core::error::Error;
use crate::core::types::{ClockTime, Result};
use crate::frame::PublishOutcome;
use crate::scene::SceneRenderer;
use crate::scheduler::Pipeline;

/// Upper bound on waiting for a vsync between frames
const VSYNC_WAIT: Duration = Duration::from_millis(100);
/// Weight of the newest render duration in the moving average
const ESTIMATE_ALPHA: f64 = 0.2;

/// Owns the scene renderer and produces frames as fast as the display takes them
pub struct RenderWorker {
    renderer: SceneRenderer,
    pipeline: Pipeline,
    next_index: u64,
    last_vsync: Option<u64>,
    /// Moving average of the render duration in seconds
    estimate: f64,
}

impl RenderWorker {
    pub fn new(renderer: SceneRenderer, pipeline: Pipeline) -> Self {
        Self {
            renderer,
            pipeline,
            next_index: 1,
            last_vsync: None,
            estimate: 0.0,
        }
    }

    /// Expected render duration of the next frame
    pub fn render_estimate(&self) -> Duration {
        Duration::from_secs_f64(self.estimate)
    }

    /// Middle of the first refresh the frame can make if it finishes in
    /// the estimated time
    pub fn predict_display_time(&self, now: ClockTime) -> ClockTime {
        let vsync = &self.pipeline.vsync;
        let target = vsync.tick_at_or_after(now + self.render_estimate());
        target.time + vsync.period() / 2
    }

    /// Render and publish one stereo frame
    pub fn render_once(&mut self) -> Result<PublishOutcome> {
        let clock = self.pipeline.clock.clone();
        let predicted = self.predict_display_time(clock.now());
        let pose = self.pipeline.source.pose_at(predicted);
        let load = self.pipeline.controls.render_load();

        let frame = self
            .renderer
            .render(self.next_index, pose, predicted, &load, clock.as_ref());
        let duration = frame.render_duration();
        let sample = duration.as_secs_f64();
        self.estimate = if self.next_index == 1 {
            sample
        } else {
            self.estimate + ESTIMATE_ALPHA * (sample - self.estimate)
        };
        self.next_index += 1;
        self.pipeline.stats.record_render(duration, clock.now());

        let index = frame.index;
        let outcome = self.pipeline.exchange.publish(frame)?;
        if let PublishOutcome::Replaced { dropped_index } = outcome {
            log::debug!("Frame {} replaced undisplayed frame {}", index, dropped_index);
        }
        Ok(outcome)
    }

    /// Render until the pipeline stops. Waits for a vsync after each frame,
    /// so at most one frame is rendered per refresh.
    pub fn run(&mut self) -> Result<()> {
        log::info!(
            "Render thread running: {}x{} per eye",
            self.renderer.resolution(),
            self.renderer.resolution()
        );
        while !self.pipeline.controls.should_stop() && !self.pipeline.exchange.is_shutdown() {
            match self.render_once() {
                Ok(_) => {}
                Err(Error::Shutdown) => break,
                Err(e) => return Err(e),
            }
            if let Some(tick) = self.pipeline.exchange.wait_for_vsync(self.last_vsync, VSYNC_WAIT) {
                self.last_vsync = Some(tick.index);
            }
        }
        log::info!("Render thread finished after {} frames", self.next_index - 1);
        Ok(())
    }
}
