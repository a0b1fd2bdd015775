//! Frames flowing from the render stage to the warp stage

pub mod eye_image;
pub mod stereo;
pub mod exchange;

pub use eye_image::EyeImage;
pub use stereo::{StereoFrame, Eye};
pub use exchange::{ExchangeCounters, FrameExchange, PublishOutcome};
