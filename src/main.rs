//! ATW - asynchronous time warp demo

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use winit::keyboard::KeyCode;
use winit::window::Window;

use atw::core::config::{AtwConfig, BackendKind};
use atw::core::error::Error;
use atw::core::input::{ControlAction, KEY_HELP, action_for_key};
use atw::core::logging;
use atw::core::time::{Clock, SystemClock};
use atw::core::types::Result;
use atw::display::{HeadlessSink, PngDump, SurfaceSink};
use atw::pose::{OrientationSource, SampledSensor, SimulatedHmd};
use atw::render::window::{self, WindowConfig, WindowHandler};
use atw::render::{GpuContext, GraphicsApi};
use atw::scheduler::{AtwStats, AtwSystem};
use atw::warp::{CpuBackend, CpuTimeWarp, DistortionMesh, GpuBackend, WarpBackend};

/// Headless runs without `--seconds` stop after this long
const DEFAULT_HEADLESS_SECONDS: f32 = 10.0;

const USAGE: &str = "\
Usage: atw [options]
  --backend <cpu|opengl|vulkan>  warp implementation (default cpu)
  --config <file.json>           load configuration, flags override it
  --hz <f>                       display refresh rate
  --seconds <f>                  stop after this long
  --eye-res <n>                  eye buffer resolution
  --level <0-3>                  scene fragment workload
  --render-delay-ms <f>          extra time per rendered frame
  --no-chroma                    disable chromatic aberration correction
  --no-late-latch                warp right after the previous vsync
  --windowed                     present into a window
  --pause                        start with head motion frozen
  --debug-port <port>            start the debug server
  --dump <dir>                   write a PNG of the output every second
  --stats-json <file>            write the final statistics as JSON";

fn main() {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    if has_flag(&args, "--help") || has_flag(&args, "-h") {
        println!("{}", USAGE);
        return;
    }

    if let Err(e) = run(&args) {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: &[String]) -> Result<()> {
    let config = build_config(args)?;
    log::info!("ATW starting: {} backend", config.backend.as_str());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let source = orientation_source(&config, clock.clone());

    let stats = if config.display.windowed {
        run_windowed(config.clone(), clock, source)?
    } else {
        run_headless(&config, clock, source)?
    };

    println!("{}", stats.summary());
    if let Some(path) = &config.stats_json {
        std::fs::write(path, serde_json::to_string_pretty(&stats)?)?;
        log::info!("Statistics written to {}", path.display());
    }
    Ok(())
}

/// Configuration file (if any) with command line overrides applied
fn build_config(args: &[String]) -> Result<AtwConfig> {
    let mut config = match parse_arg::<PathBuf>(args, "--config")? {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            AtwConfig::load(&path)?
        }
        None => AtwConfig::default(),
    };

    if let Some(backend) = parse_arg::<BackendKind>(args, "--backend")? {
        config.backend = backend;
    }
    if let Some(hz) = parse_arg(args, "--hz")? {
        config.display.refresh_hz = hz;
    }
    if let Some(seconds) = parse_arg(args, "--seconds")? {
        config.run_seconds = Some(seconds);
    }
    if let Some(res) = parse_arg(args, "--eye-res")? {
        config.render.eye_resolution = res;
    }
    if let Some(level) = parse_arg(args, "--level")? {
        config.render.fragment_level = level;
    }
    if let Some(ms) = parse_arg(args, "--render-delay-ms")? {
        config.render.extra_delay_ms = ms;
    }
    if has_flag(args, "--no-chroma") {
        config.warp.correct_chromatic_aberration = false;
    }
    if has_flag(args, "--no-late-latch") {
        config.warp.late_latch = false;
    }
    if has_flag(args, "--windowed") {
        config.display.windowed = true;
    }
    if has_flag(args, "--pause") {
        config.hmd.paused = true;
    }
    if let Some(port) = parse_arg(args, "--debug-port")? {
        config.debug_port = Some(port);
    }
    if let Some(dir) = parse_arg(args, "--dump")? {
        config.dump_dir = Some(dir);
    }
    if let Some(path) = parse_arg(args, "--stats-json")? {
        config.stats_json = Some(path);
    }
    if !config.display.windowed && config.run_seconds.is_none() {
        config.run_seconds = Some(DEFAULT_HEADLESS_SECONDS);
    }

    config.validate()?;
    Ok(config)
}

/// True if `flag` appears on the command line
fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().skip(1).any(|a| a == flag)
}

/// Parse the value following `flag`
fn parse_arg<T: FromStr>(args: &[String], flag: &str) -> Result<Option<T>> {
    let Some(i) = args.iter().position(|a| a == flag) else {
        return Ok(None);
    };
    let value = args
        .get(i + 1)
        .ok_or_else(|| Error::Config(format!("{} needs a value", flag)))?;
    value
        .parse()
        .map(Some)
        .map_err(|_| Error::Config(format!("invalid value for {}: '{}'", flag, value)))
}

fn orientation_source(config: &AtwConfig, clock: Arc<dyn Clock>) -> Arc<dyn OrientationSource> {
    let hmd: Arc<dyn OrientationSource> = Arc::new(SimulatedHmd::from_config(&config.hmd));
    if config.hmd.sampled {
        Arc::new(SampledSensor::new(hmd, clock))
    } else {
        hmd
    }
}

fn graphics_api(kind: BackendKind) -> Option<GraphicsApi> {
    match kind {
        BackendKind::Cpu => None,
        BackendKind::OpenGl => Some(GraphicsApi::OpenGl),
        BackendKind::Vulkan => Some(GraphicsApi::Vulkan),
    }
}

/// PNG writer for `--dump`, one image per second of vsyncs
fn png_dump(config: &AtwConfig) -> Result<Option<PngDump>> {
    let Some(dir) = &config.dump_dir else {
        return Ok(None);
    };
    let every = config.display.refresh_hz.round().max(1.0) as u64;
    Ok(Some(PngDump::new(dir.clone(), every)?))
}

fn headless_backend(config: &AtwConfig) -> Result<Box<dyn WarpBackend>> {
    let mesh = DistortionMesh::from_config(config);
    let (width, height) = (config.display.eye_width, config.display.eye_height);
    let dump = png_dump(config)?;

    match graphics_api(config.backend) {
        None => {
            let warp = CpuTimeWarp::new(mesh, width, height, config.warp.threads)?;
            let sink = match dump {
                Some(dump) => HeadlessSink::with_dump(dump),
                None => HeadlessSink::new(),
            };
            Ok(Box::new(CpuBackend::new(warp, Box::new(sink))))
        }
        Some(api) => {
            let mut backend = GpuBackend::headless(api, &mesh, width, height)?;
            if let Some(dump) = dump {
                backend = backend.with_dump(dump);
            }
            Ok(Box::new(backend))
        }
    }
}

fn windowed_backend(config: &AtwConfig, window: Arc<Window>) -> Result<Box<dyn WarpBackend>> {
    let mesh = DistortionMesh::from_config(config);
    let (width, height) = (config.display.eye_width, config.display.eye_height);
    let dump = png_dump(config)?;

    // The warp thread keeps its own vsync schedule, so the surface must not block on present
    match graphics_api(config.backend) {
        None => {
            let context = surface_context(window)?;
            let mut sink = SurfaceSink::new(context)?;
            if let Some(dump) = dump {
                sink = sink.with_dump(dump);
            }
            let warp = CpuTimeWarp::new(mesh, width, height, config.warp.threads)?;
            Ok(Box::new(CpuBackend::new(warp, Box::new(sink))))
        }
        Some(api) => {
            let context = pollster::block_on(GpuContext::with_window(api, window, false))?;
            let mut backend = GpuBackend::new(context, &mesh, width, height);
            if let Some(dump) = dump {
                backend = backend.with_dump(dump);
            }
            Ok(Box::new(backend))
        }
    }
}

/// Any windowed context for showing CPU output, Vulkan first
fn surface_context(window: Arc<Window>) -> Result<GpuContext> {
    match pollster::block_on(GpuContext::with_window(GraphicsApi::Vulkan, window.clone(), false)) {
        Ok(context) => Ok(context),
        Err(e) => {
            log::warn!("Vulkan surface unavailable ({}), trying OpenGL", e);
            pollster::block_on(GpuContext::with_window(GraphicsApi::OpenGl, window, false))
        }
    }
}

/// Serve debug commands from a background tokio runtime until the pipeline stops
fn start_debug_server(config: &AtwConfig, system: &AtwSystem) {
    let Some(port) = config.debug_port else {
        return;
    };
    let handler = system.debug_handler(config);
    let controls = system.controls().clone();

    let spawned = std::thread::Builder::new()
        .name("atw-debug".into())
        .spawn(move || {
            let rt = match tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    log::error!("Failed to create tokio runtime: {}", e);
                    return;
                }
            };
            rt.block_on(async {
                let handler = Arc::new(tokio::sync::Mutex::new(handler));
                let _server = atw_debug::DebugServer::start(handler, port);
                while !controls.should_stop() {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            });
        });
    if let Err(e) = spawned {
        log::error!("Failed to start debug server thread: {}", e);
    }
}

fn run_headless(config: &AtwConfig, clock: Arc<dyn Clock>, source: Arc<dyn OrientationSource>) -> Result<AtwStats> {
    let backend = headless_backend(config)?;
    let system = AtwSystem::start(config, backend, clock, source)?;
    start_debug_server(config, &system);
    if let Some(seconds) = config.run_seconds {
        log::info!("Running headless for {:.1} s", seconds);
    }
    system.wait(Duration::from_millis(50));
    system.stop()
}

/// Drives the pipeline from the window: starts it once the window exists,
/// forwards keys and resizes, stops it when the window closes.
struct WindowedRun {
    config: AtwConfig,
    clock: Arc<dyn Clock>,
    source: Arc<dyn OrientationSource>,
    system: Option<AtwSystem>,
    result: Option<Result<AtwStats>>,
}

impl WindowHandler for WindowedRun {
    fn window_ready(&mut self, window: Arc<Window>) -> Result<()> {
        let backend = windowed_backend(&self.config, window)?;
        let system = AtwSystem::start(&self.config, backend, self.clock.clone(), self.source.clone())?;
        start_debug_server(&self.config, &system);
        log::info!("Controls: {}", KEY_HELP);
        self.system = Some(system);
        Ok(())
    }

    fn resized(&mut self, width: u32, height: u32) {
        if let Some(system) = &self.system {
            system.controls().request_resize(width, height);
        }
    }

    fn key_pressed(&mut self, key: KeyCode) -> bool {
        let (Some(system), Some(action)) = (&self.system, action_for_key(key)) else {
            return true;
        };
        match system.controls().apply(action) {
            Some(change) => log::info!("{}", change),
            None => log::info!("{}", system.stats().summary()),
        }
        action != ControlAction::Quit
    }

    fn keep_running(&mut self) -> bool {
        self.system.as_ref().is_some_and(|s| !s.is_finished())
    }

    fn closing(&mut self) {
        if let Some(system) = self.system.take() {
            self.result = Some(system.stop());
        }
    }
}

fn run_windowed(config: AtwConfig, clock: Arc<dyn Clock>, source: Arc<dyn OrientationSource>) -> Result<AtwStats> {
    let window_config = WindowConfig {
        title: format!("ATW - {}", config.backend.as_str()),
        width: config.display.eye_width * 2,
        height: config.display.eye_height,
    };
    let handler = WindowedRun {
        config,
        clock,
        source,
        system: None,
        result: None,
    };
    let mut handler = window::run(window_config, handler)?;
    handler
        .result
        .take()
        .unwrap_or_else(|| Err(Error::Window("window closed before the pipeline started".into())))
}
