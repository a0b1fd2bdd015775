//! Render pipelines

pub mod display;

pub use display::{DisplayPipeline, fit_viewport};
