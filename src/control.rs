//! Debug server command handling for a running pipeline

use std::time::Duration;

use atw_debug::{DebugCommand, DebugHandler, DebugResponse, ResponseData, StatsInfo};
use base64::Engine;

use crate::core::config::AtwConfig;
use crate::scheduler::Pipeline;

/// How long a screenshot request waits for the warp thread
const SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(2);

/// Answers debug commands from the shared controls and statistics
pub struct AtwDebugHandler {
    pipeline: Pipeline,
    config: serde_json::Value,
}

impl AtwDebugHandler {
    pub fn new(pipeline: Pipeline, config: &AtwConfig) -> Self {
        let config = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        Self { pipeline, config }
    }

    fn stats(&self) -> StatsInfo {
        let p = &self.pipeline;
        let stats = p.stats.snapshot(p.exchange.counters(), p.clock.now());
        StatsInfo::from(&stats)
    }

    fn screenshot(&self) -> DebugResponse {
        let Some(image) = self.pipeline.controls.capture().request(SCREENSHOT_TIMEOUT) else {
            return DebugResponse::error("Screenshot timed out");
        };
        match image.encode_png() {
            Ok(png) => DebugResponse::ok(ResponseData::Screenshot {
                width: image.width(),
                height: image.height(),
                png_base64: base64::engine::general_purpose::STANDARD.encode(&png),
            }),
            Err(e) => DebugResponse::error(format!("PNG encoding failed: {}", e)),
        }
    }
}

impl DebugHandler for AtwDebugHandler {
    fn handle_command(&mut self, cmd: DebugCommand) -> DebugResponse {
        let controls = &self.pipeline.controls;
        match cmd {
            DebugCommand::Ping => DebugResponse::pong(),

            DebugCommand::GetStats => DebugResponse::ok(ResponseData::Stats(self.stats())),

            DebugCommand::GetConfig => DebugResponse::ok(ResponseData::Config {
                json: self.config.clone(),
            }),

            DebugCommand::SetFragmentLevel { level } => {
                let set = controls.set_fragment_level(level);
                log::info!("Debug: fragment level {}", set);
                DebugResponse::updated(format!("fragment_level={}", set))
            }

            DebugCommand::SetRenderDelay { ms } => {
                if !(ms.is_finite() && ms >= 0.0) {
                    return DebugResponse::error(format!("Invalid render delay: {}", ms));
                }
                controls.set_render_delay_ms(ms);
                log::info!("Debug: render delay {} ms", ms);
                DebugResponse::updated(format!("render_delay_ms={}", ms))
            }

            DebugCommand::SetPaused { paused } => {
                controls.set_paused(paused);
                DebugResponse::updated(format!("paused={}", paused))
            }

            DebugCommand::SetChromaticAberration { enabled } => {
                controls.set_chromatic_aberration(enabled);
                DebugResponse::updated(format!("chromatic_aberration={}", enabled))
            }

            DebugCommand::TakeScreenshot => self.screenshot(),
        }
    }
}
