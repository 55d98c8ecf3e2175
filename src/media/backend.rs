use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::LoadError;
use crate::media::handle::{MediaBlob, MediaHandle};

/// A temporary, origin-scoped reference to blob content.
///
/// Deliberately not `Clone`: [`MediaBackend::release`] consumes it, so it can
/// be released at most once.
#[derive(Debug, PartialEq, Eq)]
pub struct ScratchRef {
    id: u64,
    location: PathBuf,
}

impl ScratchRef {
    pub fn new(id: u64, location: impl Into<PathBuf>) -> Self {
        Self {
            id,
            location: location.into(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn location(&self) -> &Path {
        &self.location
    }
}

/// Host media stack used to turn raw blobs into detached handles.
pub trait MediaBackend: Send + Sync {
    fn allocate(&self, blob: &MediaBlob) -> Result<ScratchRef, LoadError>;

    /// Builds a detached handle reading from `scratch`.
    fn open(&self, scratch: &ScratchRef) -> Result<Box<dyn MediaHandle>, LoadError>;

    fn release(&self, scratch: ScratchRef);
}

/// Owns a [`ScratchRef`] and releases it exactly once, on [`release`] or on drop.
///
/// [`release`]: ScratchGuard::release
pub struct ScratchGuard {
    backend: Arc<dyn MediaBackend>,
    scratch: Option<ScratchRef>,
}

impl ScratchGuard {
    pub fn new(backend: Arc<dyn MediaBackend>, scratch: ScratchRef) -> Self {
        Self {
            backend,
            scratch: Some(scratch),
        }
    }

    pub fn scratch(&self) -> Option<&ScratchRef> {
        self.scratch.as_ref()
    }

    pub fn is_released(&self) -> bool {
        self.scratch.is_none()
    }

    pub fn release(&mut self) {
        if let Some(scratch) = self.scratch.take() {
            self.backend.release(scratch);
        }
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for ScratchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScratchGuard")
            .field("scratch", &self.scratch)
            .finish()
    }
}
