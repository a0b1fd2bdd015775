//! The scene render stage

pub mod environment;
pub mod renderer;

pub use renderer::{MAX_FRAGMENT_LEVEL, RenderLoad, SceneRenderer};
