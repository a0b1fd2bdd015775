//! Error types for the time warp pipeline

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("Window error: {0}")]
    Window(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Warp backend error: {0}")]
    Backend(String),

    #[error("Frame exchange error: {0}")]
    Exchange(String),

    #[error("Pipeline is shut down")]
    Shutdown,
}
