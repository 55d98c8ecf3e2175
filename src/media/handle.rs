use crossbeam::channel::Receiver;
use image::RgbaImage;

use crate::error::FrameError;

/// How much of the stream the handle has decoded so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ReadyState {
    HaveNothing,
    HaveMetadata,
    HaveCurrentData,
    HaveFutureData,
    HaveEnoughData,
}

/// What the handle should fetch when asked to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Preload {
    /// Duration and dimensions only.
    #[default]
    Metadata,
    /// Decodable frame data, required for accurate seeking.
    Full,
}

/// Signals emitted by a handle to its registered listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaEvent {
    LoadedMetadata,
    /// Playback could proceed to the end without stalling.
    CanPlayThrough,
    LoadError(String),
    /// The playback position reached the requested seek target.
    Seeked,
    SeekError(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// A registered event subscription. Removing it is the owner's job.
#[derive(Debug)]
pub struct Listener {
    pub id: ListenerId,
    pub events: Receiver<MediaEvent>,
}

/// A seekable media stream with a single playback position.
///
/// Implementations deliver [`MediaEvent`]s to every registered listener. They
/// may do so from another thread. `load` must be a no-op while a load is
/// already in flight or finished.
pub trait MediaHandle: Send {
    /// Total duration in seconds, once metadata is known.
    fn duration(&self) -> Option<f64>;

    /// Native frame size in pixels.
    fn dimensions(&self) -> (u32, u32);

    fn ready_state(&self) -> ReadyState;

    fn set_muted(&mut self, muted: bool);

    fn set_preload(&mut self, preload: Preload);

    fn add_listener(&mut self) -> Listener;

    fn remove_listener(&mut self, id: ListenerId);

    fn load(&mut self);

    /// Request a move of the playback position. Completion is signalled with
    /// [`MediaEvent::Seeked`] or [`MediaEvent::SeekError`].
    fn seek(&mut self, position: f64);

    /// Render the currently visible frame into `target`, which is sized to
    /// the native dimensions.
    fn draw_frame(&mut self, target: &mut RgbaImage) -> Result<(), FrameError>;
}

/// Raw media content with its declared MIME type.
#[derive(Debug, Clone)]
pub struct MediaBlob {
    pub bytes: Vec<u8>,
    pub mime: String,
}

impl MediaBlob {
    pub fn new(bytes: Vec<u8>, mime: impl Into<String>) -> Self {
        Self {
            bytes,
            mime: mime.into(),
        }
    }
}

/// Input accepted by the loader.
pub enum MediaSource<'a> {
    /// A handle the caller owns and keeps after the call.
    Attached(&'a mut dyn MediaHandle),
    /// Raw content; the loader allocates and releases whatever it needs.
    Blob(MediaBlob),
}

impl std::fmt::Debug for MediaSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaSource::Attached(_) => f.write_str("MediaSource::Attached"),
            MediaSource::Blob(blob) => f
                .debug_struct("MediaSource::Blob")
                .field("mime", &blob.mime)
                .field("len", &blob.bytes.len())
                .finish(),
        }
    }
}
