//! Debug protocol - JSON command/response definitions

use serde::{Deserialize, Serialize};

/// Commands sent from a debug client to the running time warp process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", content = "params")]
pub enum DebugCommand {
    /// Ping (health check)
    Ping,
    /// Get scheduler statistics (vsyncs, misses, drops, latencies)
    GetStats,
    /// Get the active configuration
    GetConfig,
    /// Set the scene fragment workload level (0-3)
    SetFragmentLevel { level: u32 },
    /// Add an artificial delay to every scene render
    SetRenderDelay { ms: f32 },
    /// Freeze or resume the simulated head motion
    SetPaused { paused: bool },
    /// Toggle chromatic aberration correction in the warp
    SetChromaticAberration { enabled: bool },
    /// Capture the last presented frame (returns base64 PNG)
    TakeScreenshot,
}

/// Responses from debug server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status")]
pub enum DebugResponse {
    #[serde(rename = "ok")]
    Ok { data: ResponseData },
    #[serde(rename = "error")]
    Error { message: String },
}

/// Response data variants
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponseData {
    Pong { message: String },
    Stats(StatsInfo),
    Config { json: serde_json::Value },
    Screenshot {
        width: u32,
        height: u32,
        png_base64: String,
    },
    ParamsUpdated { description: String },
    None,
}

/// Scheduler statistics as reported over the wire
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsInfo {
    pub backend: String,
    pub refresh_hz: f32,
    pub vsyncs: u64,
    pub presented: u64,
    pub missed_vsyncs: u64,
    pub frames_rendered: u64,
    pub frames_dropped: u64,
    pub stale_presents: u64,
    pub warp_p50_ms: f64,
    pub warp_p99_ms: f64,
    pub render_p50_ms: f64,
    pub render_p99_ms: f64,
    pub latency_p50_ms: f64,
    pub latency_p99_ms: f64,
}

impl DebugResponse {
    pub fn ok(data: ResponseData) -> Self {
        Self::Ok { data }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self::Error {
            message: msg.into(),
        }
    }

    pub fn pong() -> Self {
        Self::ok(ResponseData::Pong {
            message: "pong".into(),
        })
    }

    pub fn none() -> Self {
        Self::ok(ResponseData::None)
    }

    pub fn updated(description: impl Into<String>) -> Self {
        Self::ok(ResponseData::ParamsUpdated {
            description: description.into(),
        })
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_wire_format() {
        let json = serde_json::to_string(&DebugCommand::SetFragmentLevel { level: 2 }).unwrap();
        assert_eq!(json, r#"{"cmd":"SetFragmentLevel","params":{"level":2}}"#);

        let ping: DebugCommand = serde_json::from_str(r#"{"cmd":"Ping"}"#).unwrap();
        assert_eq!(ping, DebugCommand::Ping);
    }

    #[test]
    fn test_response_status_tag() {
        let json = serde_json::to_string(&DebugResponse::pong()).unwrap();
        assert!(json.contains(r#""status":"ok""#));
        assert!(json.contains(r#""message":"pong""#));

        let json = serde_json::to_string(&DebugResponse::error("bad")).unwrap();
        assert_eq!(json, r#"{"status":"error","message":"bad"}"#);
    }

    #[test]
    fn test_stats_round_trip() {
        let stats = StatsInfo {
            backend: "cpu".into(),
            vsyncs: 120,
            presented: 120,
            frames_dropped: 7,
            ..Default::default()
        };
        let json = serde_json::to_string(&DebugResponse::ok(ResponseData::Stats(stats.clone()))).unwrap();
        let back: DebugResponse = serde_json::from_str(&json).unwrap();
        match back {
            DebugResponse::Ok { data: ResponseData::Stats(s) } => assert_eq!(s, stats),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
