use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::LoadError;
use crate::media::backend::{MediaBackend, ScratchGuard};
use crate::media::handle::{MediaBlob, MediaEvent, MediaHandle, MediaSource, Preload, ReadyState};
use crate::media::mimetype;
use crate::media::signal::{await_signal, Settled};

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Unstarted,
    Loading,
    Ready,
    Failed,
}

/// Brings `handle` to a seek-ready state.
///
/// Returns immediately, without registering anything, when the handle already
/// has enough data buffered. Otherwise asks for a full preload and waits for
/// the handle to report it can play through.
pub fn wait_until_ready<H>(handle: &mut H, timeout: Duration) -> Result<(), LoadError>
where
    H: MediaHandle + ?Sized,
{
    let mut state = LoadState::Unstarted;
    if handle.ready_state() >= ReadyState::HaveEnoughData {
        transition(&mut state, LoadState::Ready);
        return Ok(());
    }

    transition(&mut state, LoadState::Loading);
    let outcome = await_signal(
        handle,
        timeout,
        |h| {
            // The handle may have finished loading before the listener existed.
            if h.ready_state() >= ReadyState::HaveEnoughData {
                return Some(Ok(()));
            }
            h.set_preload(Preload::Full);
            h.load();
            None
        },
        |event| match event {
            MediaEvent::CanPlayThrough => Some(Ok(())),
            MediaEvent::LoadError(reason) => Some(Err(reason)),
            _ => None,
        },
    );

    let result = match outcome {
        Settled::Signal(Ok(())) => Ok(()),
        Settled::Signal(Err(reason)) => Err(LoadError::Failed(reason)),
        Settled::TimedOut => Err(LoadError::Timeout(timeout)),
        Settled::Closed => Err(LoadError::Closed),
    };
    match &result {
        Ok(()) => transition(&mut state, LoadState::Ready),
        Err(e) => {
            warn!("Media load failed: {}", e);
            transition(&mut state, LoadState::Failed);
        }
    }
    result
}

fn transition(state: &mut LoadState, next: LoadState) {
    debug!("Load state {:?} -> {:?}", state, next);
    *state = next;
}

enum Slot<'a> {
    Attached(&'a mut dyn MediaHandle),
    Owned(Box<dyn MediaHandle>),
}

/// A ready handle plus whatever the loader allocated to produce it.
///
/// Dropping it releases the temporary resource, if any.
pub struct LoadedSource<'a> {
    slot: Slot<'a>,
    scratch: Option<ScratchGuard>,
}

impl<'a> LoadedSource<'a> {
    pub fn handle(&mut self) -> &mut dyn MediaHandle {
        match &mut self.slot {
            Slot::Attached(handle) => &mut **handle,
            Slot::Owned(handle) => handle.as_mut(),
        }
    }

    pub fn duration(&self) -> Option<f64> {
        match &self.slot {
            Slot::Attached(handle) => handle.duration(),
            Slot::Owned(handle) => handle.duration(),
        }
    }

    pub fn owns_scratch(&self) -> bool {
        self.scratch.as_ref().is_some_and(|g| !g.is_released())
    }

    /// Releases the temporary resource now instead of on drop.
    pub fn release(&mut self) {
        if let Some(guard) = self.scratch.as_mut() {
            guard.release();
        }
    }
}

impl std::fmt::Debug for LoadedSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.slot {
            Slot::Attached(_) => "attached",
            Slot::Owned(_) => "owned",
        };
        f.debug_struct("LoadedSource")
            .field("handle", &kind)
            .field("scratch", &self.scratch)
            .finish()
    }
}

/// Normalizes caller input into a ready, seekable handle.
#[derive(Clone)]
pub struct SourceLoader {
    backend: Arc<dyn MediaBackend>,
    timeout: Duration,
}

impl SourceLoader {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_LOAD_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn load<'a>(&self, source: MediaSource<'a>) -> Result<LoadedSource<'a>, LoadError> {
        match source {
            MediaSource::Attached(handle) => {
                wait_until_ready(handle, self.timeout)?;
                Ok(LoadedSource {
                    slot: Slot::Attached(handle),
                    scratch: None,
                })
            }
            MediaSource::Blob(blob) => self.load_blob(blob),
        }
    }

    fn load_blob<'a>(&self, mut blob: MediaBlob) -> Result<LoadedSource<'a>, LoadError> {
        blob.mime = mimetype::resolve_mimetype(&blob.mime, &blob.bytes);
        if !mimetype::is_video(&blob.mime) {
            return Err(LoadError::UnsupportedType(blob.mime));
        }

        let scratch = self.backend.allocate(&blob)?;
        let mut guard = ScratchGuard::new(Arc::clone(&self.backend), scratch);

        let opened = match guard.scratch() {
            Some(scratch) => self.backend.open(scratch),
            None => Err(LoadError::Closed),
        };
        let mut handle = match opened {
            Ok(handle) => handle,
            Err(e) => {
                guard.release();
                return Err(e);
            }
        };

        handle.set_muted(true);
        handle.set_preload(Preload::Full);

        if let Err(e) = wait_until_ready(handle.as_mut(), self.timeout) {
            guard.release();
            return Err(e);
        }

        info!(
            "Loaded {} blob ({} bytes, {:.2}s)",
            blob.mime,
            blob.bytes.len(),
            handle.duration().unwrap_or_default()
        );
        Ok(LoadedSource {
            slot: Slot::Owned(handle),
            scratch: Some(guard),
        })
    }
}

impl std::fmt::Debug for SourceLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceLoader")
            .field("timeout", &self.timeout)
            .finish()
    }
}
