//! Runtime configuration
//!
//! Every section has defaults, so a JSON file only needs the fields it
//! changes. Command line flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::warp::distortion::LensParams;

/// Which warp implementation presents frames
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Rayon-parallel warp on the CPU (the CPU/DSP path)
    #[default]
    Cpu,
    /// wgpu on the GL backend
    #[serde(rename = "opengl")]
    OpenGl,
    /// wgpu on the Vulkan backend
    Vulkan,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cpu => "cpu",
            Self::OpenGl => "opengl",
            Self::Vulkan => "vulkan",
        }
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" | "dsp" => Ok(Self::Cpu),
            "opengl" | "gl" => Ok(Self::OpenGl),
            "vulkan" | "vk" => Ok(Self::Vulkan),
            other => Err(Error::Config(format!("unknown backend '{}'", other))),
        }
    }
}

/// Display (HMD panel) parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    /// Panel refresh rate in Hz
    pub refresh_hz: f32,
    /// Output width per eye in pixels (the display is two eyes side by side)
    pub eye_width: u32,
    /// Output height in pixels
    pub eye_height: u32,
    /// Symmetric field of view per eye in degrees
    pub fov_degrees: f32,
    /// Open a window instead of running headless
    pub windowed: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            refresh_hz: 60.0,
            eye_width: 640,
            eye_height: 640,
            fov_degrees: 90.0,
            windowed: false,
        }
    }
}

/// Scene (stereo render stage) parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Square eye buffer resolution in pixels
    pub eye_resolution: u32,
    /// Fragment workload level 0-3 (supersampling 1, 4, 16, 64 samples)
    pub fragment_level: u32,
    /// Extra time spent per rendered frame, in milliseconds
    pub extra_delay_ms: f32,
    /// Worker threads in the render pool
    pub threads: usize,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            eye_resolution: 512,
            fragment_level: 0,
            extra_delay_ms: 0.0,
            threads: 2,
        }
    }
}

/// Time warp stage parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarpConfig {
    /// Sample the pose as late as the measured warp cost allows
    pub late_latch: bool,
    /// Slack kept between warp completion and vsync, in microseconds
    pub safety_margin_us: u64,
    pub correct_chromatic_aberration: bool,
    /// Distortion mesh resolution per eye
    pub mesh_cols: u32,
    pub mesh_rows: u32,
    pub lens: LensParams,
    /// Worker threads in the warp pool (CPU backend)
    pub threads: usize,
}

impl Default for WarpConfig {
    fn default() -> Self {
        Self {
            late_latch: true,
            safety_margin_us: 2000,
            correct_chromatic_aberration: true,
            mesh_cols: 32,
            mesh_rows: 32,
            lens: LensParams::default(),
            threads: 2,
        }
    }
}

/// Simulated head motion
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HmdConfig {
    /// Peak yaw in degrees (pitch swings half as far)
    pub amplitude_degrees: f32,
    /// Angular frequency of the motion in radians per second
    pub angular_speed: f32,
    /// Start with the motion frozen
    pub paused: bool,
    /// Read the simulated sensor at the current time and extrapolate to the
    /// display time, the way a real IMU would be used
    pub sampled: bool,
}

impl Default for HmdConfig {
    fn default() -> Self {
        Self {
            amplitude_degrees: 10.0,
            angular_speed: std::f32::consts::PI,
            paused: false,
            sampled: false,
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AtwConfig {
    pub backend: BackendKind,
    pub display: DisplayConfig,
    pub render: RenderConfig,
    pub warp: WarpConfig,
    pub hmd: HmdConfig,
    /// Stop after this many seconds (None runs until the window closes or Ctrl-C)
    pub run_seconds: Option<f32>,
    /// Start the debug server on this port
    pub debug_port: Option<u16>,
    /// Write a PNG of the presented frame once per second into this directory
    pub dump_dir: Option<PathBuf>,
    /// Write the final statistics as JSON to this file
    pub stats_json: Option<PathBuf>,
}

impl AtwConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Save the configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if !(self.display.refresh_hz.is_finite() && self.display.refresh_hz > 0.0) {
            return Err(Error::Config(format!(
                "refresh rate must be positive, got {}",
                self.display.refresh_hz
            )));
        }
        if self.refresh_period().is_zero() {
            return Err(Error::Config(format!(
                "refresh rate {} Hz is too high to schedule",
                self.display.refresh_hz
            )));
        }
        if let Some(seconds) = self.run_seconds {
            if std::time::Duration::try_from_secs_f32(seconds).is_err() {
                return Err(Error::Config(format!(
                    "run time must be a non-negative number of seconds, got {}",
                    seconds
                )));
            }
        }
        if self.display.eye_width == 0 || self.display.eye_height == 0 {
            return Err(Error::Config("display size must be non-zero".into()));
        }
        if !(self.display.fov_degrees > 0.0 && self.display.fov_degrees < 170.0) {
            return Err(Error::Config(format!(
                "field of view must be in (0, 170) degrees, got {}",
                self.display.fov_degrees
            )));
        }
        if self.render.eye_resolution == 0 {
            return Err(Error::Config("eye resolution must be non-zero".into()));
        }
        if self.render.fragment_level > crate::scene::MAX_FRAGMENT_LEVEL {
            return Err(Error::Config(format!(
                "fragment level must be 0-{}, got {}",
                crate::scene::MAX_FRAGMENT_LEVEL,
                self.render.fragment_level
            )));
        }
        if self.render.extra_delay_ms < 0.0 {
            return Err(Error::Config("render delay cannot be negative".into()));
        }
        if self.warp.mesh_cols == 0 || self.warp.mesh_rows == 0 {
            return Err(Error::Config("distortion mesh needs at least one cell".into()));
        }
        Ok(())
    }

    /// One display refresh
    pub fn refresh_period(&self) -> std::time::Duration {
        std::time::Duration::from_nanos((1e9 / self.display.refresh_hz as f64).round() as u64)
    }
}
