pub mod backend;
pub mod extractor;
pub mod ffmpeg;
pub mod handle;
pub mod loader;
pub mod mimetype;
pub mod signal;

pub use backend::{MediaBackend, ScratchGuard, ScratchRef};
pub use extractor::{FrameExtractor, FrameSample, DEFAULT_SEEK_TIMEOUT};
pub use ffmpeg::{FfmpegBackend, FfmpegHandle};
pub use handle::{
    Listener, ListenerId, MediaBlob, MediaEvent, MediaHandle, MediaSource, Preload, ReadyState,
};
pub use loader::{wait_until_ready, LoadState, LoadedSource, SourceLoader, DEFAULT_LOAD_TIMEOUT};
