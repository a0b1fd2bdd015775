//! Projection and reprojection math

pub mod fov;
pub mod timewarp;

pub use fov::Fov;
pub use timewarp::{timewarp_transform, project_interpolated, scanout_fraction};
