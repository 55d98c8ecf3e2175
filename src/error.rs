use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScheduleError {
    #[error("duration must be a positive, finite number of seconds (got {0})")]
    InvalidDuration(f64),
    #[error("max duration must be a positive number of seconds (got {0})")]
    InvalidMaxDuration(f64),
    #[error("frame sample count must be at least 1")]
    ZeroCount,
}

/// Fatal failures while bringing a source to a seek-ready state.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unsupported media type: {0:?}")]
    UnsupportedType(String),
    #[error("failed to allocate temporary media resource")]
    Scratch(#[source] std::io::Error),
    #[error("failed to open media handle: {0}")]
    Open(String),
    #[error("media failed to load: {0}")]
    Failed(String),
    #[error("media did not become ready within {0:?}")]
    Timeout(Duration),
    #[error("media handle stopped delivering events")]
    Closed,
    #[error("media reported no usable duration")]
    MissingDuration,
}

/// Per-frame failures. These never abort a session.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("seek to {timestamp:.3}s failed: {reason}")]
    SeekFailed { timestamp: f64, reason: String },
    #[error("no frame at {timestamp:.3}s within {budget:?}")]
    FrameExtractionTimeout { timestamp: f64, budget: Duration },
    #[error("media handle stopped delivering events during seek to {timestamp:.3}s")]
    Closed { timestamp: f64 },
    #[error("source has no drawable area ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },
    #[error("failed to capture frame: {0}")]
    Capture(String),
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("detection engine failed to initialize: {0}")]
    Init(String),
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("detection engine is not initialized")]
    EngineNotInitialized,
    #[error("another analysis session is already running on this engine")]
    SessionBusy,
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Load(#[from] LoadError),
}
