//! Head orientation sources and prediction

pub mod hmd;
pub mod predictor;

pub use hmd::{FixedOrientation, HeadPose, OrientationSource, SimulatedHmd};
pub use predictor::{PosePredictor, SampledSensor};
