pub mod sampler;
pub mod source;

#[cfg(feature = "camera")]
pub mod camera;

pub use sampler::{FrameSampler, SampledFrame, SamplerConfig};
pub use source::{CameraSource, RgbFrame, TestPatternSource, VideoError};

#[cfg(feature = "camera")]
pub use camera::NativeCameraSource;
