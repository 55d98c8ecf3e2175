//! Samples a bounded number of frames from a video, feeds them to a
//! colour-detection engine, and returns the engine's consensus.

pub mod driver;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod media;
pub mod sampling;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use driver::{ConsensusDriver, FrameOutcome, FrameSampler, FrameStatus, VideoAnalysis};
pub use engine::{ChromakeyResult, DetectionConfig, DetectionEngine, Rgb};
pub use error::{AnalysisError, FrameError, LoadError, ScheduleError};
pub use media::{MediaBlob, MediaHandle, MediaSource};
pub use sampling::{SampleStrategy, SamplingPlan};
pub use utils::config::{SamplingConfig, Settings, Timeouts};
