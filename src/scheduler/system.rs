//! Thread ownership for a running pipeline

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::control::AtwDebugHandler;
use crate::core::config::AtwConfig;
use crate::core::error::Error;
use crate::core::time::Clock;
use crate::core::types::Result;
use crate::display::VsyncClock;
use crate::frame::FrameExchange;
use crate::math::Fov;
use crate::pose::OrientationSource;
use crate::scene::SceneRenderer;
use crate::scheduler::{
    AtwStats, LatchPolicy, Pipeline, RenderWorker, SharedControls, StatsCollector, WarpScheduler,
};
use crate::warp::WarpBackend;

/// A running time warp pipeline: one warp thread, one render thread
pub struct AtwSystem {
    pipeline: Pipeline,
    warp: Option<JoinHandle<Result<()>>>,
    render: Option<JoinHandle<Result<()>>>,
}

impl AtwSystem {
    /// Spawn the warp and render threads. The first vsync is one refresh
    /// period after the call.
    pub fn start(
        config: &AtwConfig,
        backend: Box<dyn WarpBackend>,
        clock: Arc<dyn Clock>,
        source: Arc<dyn OrientationSource>,
    ) -> Result<Self> {
        config.validate()?;

        let fov = Fov::symmetric(config.display.fov_degrees);
        let eye_resolution = config.render.eye_resolution;
        let renderer = SceneRenderer::new(eye_resolution, fov, config.render.threads)?;

        let period = config.refresh_period();
        let start = clock.now();
        let pipeline = Pipeline {
            exchange: Arc::new(FrameExchange::new()),
            source,
            clock,
            controls: Arc::new(SharedControls::new(config)),
            stats: Arc::new(StatsCollector::new(backend.name(), config.display.refresh_hz)),
            vsync: VsyncClock::new(period, start + period),
        };
        let latch = LatchPolicy::new(
            config.warp.late_latch,
            Duration::from_micros(config.warp.safety_margin_us),
            period,
        );
        let until = match config.run_seconds {
            Some(seconds) => Some(
                Duration::try_from_secs_f32(seconds)
                    .ok()
                    .and_then(|run| start.checked_add(run))
                    .ok_or_else(|| Error::Config(format!("invalid run time {}", seconds)))?,
            ),
            None => None,
        };

        log::info!(
            "Starting ATW: {} backend, {:.1} Hz, {}x{} eye buffers, {:.0} degree FOV",
            backend.name(),
            config.display.refresh_hz,
            eye_resolution,
            eye_resolution,
            config.display.fov_degrees
        );

        let mut scheduler = WarpScheduler::new(backend, pipeline.clone(), latch, fov, eye_resolution);
        let warp_pipeline = pipeline.clone();
        let warp = std::thread::Builder::new()
            .name("atw-warp".into())
            .spawn(move || {
                let result = scheduler.run(until);
                if let Err(e) = &result {
                    log::error!("Warp thread failed: {}", e);
                }
                // Whatever ended the warp loop ends the pipeline
                warp_pipeline.controls.request_stop();
                warp_pipeline.exchange.shutdown();
                result
            })?;

        let mut worker = RenderWorker::new(renderer, pipeline.clone());
        let render_pipeline = pipeline.clone();
        let render = std::thread::Builder::new()
            .name("atw-render".into())
            .spawn(move || {
                let result = worker.run();
                if let Err(e) = &result {
                    log::error!("Render thread failed: {}", e);
                    render_pipeline.controls.request_stop();
                }
                result
            });
        let render = match render {
            Ok(handle) => handle,
            Err(e) => {
                pipeline.controls.request_stop();
                pipeline.exchange.shutdown();
                let _ = warp.join();
                return Err(e.into());
            }
        };

        Ok(Self {
            pipeline,
            warp: Some(warp),
            render: Some(render),
        })
    }

    pub fn controls(&self) -> &Arc<SharedControls> {
        &self.pipeline.controls
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.pipeline.clock
    }

    /// Debug command handler over this pipeline
    pub fn debug_handler(&self, config: &AtwConfig) -> AtwDebugHandler {
        AtwDebugHandler::new(self.pipeline.clone(), config)
    }

    /// Current statistics
    pub fn stats(&self) -> AtwStats {
        self.pipeline
            .stats
            .snapshot(self.pipeline.exchange.counters(), self.pipeline.clock.now())
    }

    /// True once the warp loop has ended (run time elapsed, stop or error)
    pub fn is_finished(&self) -> bool {
        self.warp.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Block until the warp loop ends on its own
    pub fn wait(&self, poll: Duration) {
        while !self.is_finished() {
            std::thread::sleep(poll);
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        self.pipeline.controls.request_stop();
        self.pipeline.exchange.shutdown();

        let mut first_error = None;
        for (name, handle) in [("warp", self.warp.take()), ("render", self.render.take())] {
            let Some(handle) = handle else { continue };
            let result = handle
                .join()
                .unwrap_or_else(|_| Err(Error::Backend(format!("{} thread panicked", name))));
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Stop both threads and return the final statistics
    pub fn stop(mut self) -> Result<AtwStats> {
        self.shutdown()?;
        let stats = self.stats();
        log::info!("{}", stats.summary());
        Ok(stats)
    }
}

impl Drop for AtwSystem {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Error while stopping ATW: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::BackendKind;
    use crate::core::time::SystemClock;
    use crate::display::HeadlessSink;
    use crate::pose::SimulatedHmd;
    use crate::warp::{CpuBackend, CpuTimeWarp, DistortionMesh};

    fn small_config() -> AtwConfig {
        let mut config = AtwConfig::default();
        config.backend = BackendKind::Cpu;
        config.display.refresh_hz = 60.0;
        config.display.eye_width = 64;
        config.display.eye_height = 64;
        config.render.eye_resolution = 64;
        config.render.threads = 1;
        config.warp.threads = 1;
        config
    }

    fn cpu_backend(config: &AtwConfig) -> Box<dyn WarpBackend> {
        let warp = CpuTimeWarp::new(
            DistortionMesh::from_config(config),
            config.display.eye_width,
            config.display.eye_height,
            config.warp.threads,
        )
        .unwrap();
        Box::new(CpuBackend::new(warp, Box::new(HeadlessSink::new())))
    }

    #[test]
    fn test_runs_for_configured_time() {
        let mut config = small_config();
        config.run_seconds = Some(0.3);
        let source = Arc::new(SimulatedHmd::from_config(&config.hmd));
        let system = AtwSystem::start(&config, cpu_backend(&config), Arc::new(SystemClock::new()), source).unwrap();
        system.wait(Duration::from_millis(10));
        let stats = system.stop().unwrap();

        assert_eq!(stats.backend, "cpu");
        assert!(stats.vsyncs >= 10, "{:?}", stats);
        assert!(stats.frames_rendered > 0);
        assert_eq!(stats.vsyncs, stats.presented + stats.missed_vsyncs);
    }

    #[test]
    fn test_stop_before_deadline() {
        let config = small_config();
        let source = Arc::new(SimulatedHmd::from_config(&config.hmd));
        let system = AtwSystem::start(&config, cpu_backend(&config), Arc::new(SystemClock::new()), source).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(!system.is_finished());
        system.controls().set_fragment_level(2);
        let stats = system.stop().unwrap();
        assert!(stats.vsyncs > 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = small_config();
        config.display.refresh_hz = 0.0;
        let source = Arc::new(SimulatedHmd::from_config(&config.hmd));
        let backend = cpu_backend(&small_config());
        assert!(AtwSystem::start(&config, backend, Arc::new(SystemClock::new()), source).is_err());
    }

    #[test]
    fn test_bad_run_time_is_an_error() {
        for seconds in [-1.0, f32::NAN] {
            let mut config = small_config();
            config.run_seconds = Some(seconds);
            let source = Arc::new(SimulatedHmd::from_config(&config.hmd));
            let backend = cpu_backend(&config);
            let result = AtwSystem::start(&config, backend, Arc::new(SystemClock::new()), source);
            assert!(matches!(result, Err(Error::Config(_))), "{} accepted", seconds);
        }
    }
}
