//! Logging initialization

/// Initialize the logging system
///
/// Uses env_logger with default filter level of `info` and millisecond
/// timestamps, which is the resolution vsync misses are reported at.
/// Override with RUST_LOG environment variable.
///
/// # Example
/// ```
/// atw::core::logging::init();
/// log::info!("Time warp started");
/// ```
pub fn init() {
    // try_init: tests and doc examples may initialize more than once
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")
    )
    .format_timestamp_millis()
    .try_init();
}
