//! Core type aliases and re-exports

pub use glam::{
    Vec2, Vec3, Vec4,
    Mat3, Mat4,
    Quat,
};

/// A point in time, measured from the epoch of the [`Clock`](crate::core::time::Clock) that produced it
pub type ClockTime = std::time::Duration;

/// Standard Result type for the crate
pub type Result<T> = std::result::Result<T, crate::core::error::Error>;
