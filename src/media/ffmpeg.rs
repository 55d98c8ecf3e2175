use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{unbounded, Sender};
use image::RgbaImage;
use serde::Deserialize;
use tempfile::TempPath;
use tracing::{debug, warn};

use crate::error::{FrameError, LoadError};
use crate::media::backend::{MediaBackend, ScratchRef};
use crate::media::handle::{
    Listener, ListenerId, MediaBlob, MediaEvent, MediaHandle, Preload, ReadyState,
};
use crate::media::mimetype;
use crate::utils::config::FfmpegConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbeInfo {
    pub duration: f64,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: Option<u32>,
    height: Option<u32>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

/// Parses `ffprobe -of json` output for the first video stream.
pub fn parse_probe(json: &[u8]) -> Result<ProbeInfo, String> {
    let output: ProbeOutput =
        serde_json::from_slice(json).map_err(|e| format!("unreadable ffprobe output: {}", e))?;
    let stream = output
        .streams
        .first()
        .ok_or_else(|| "no video stream".to_string())?;

    let (width, height) = match (stream.width, stream.height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => (w, h),
        _ => return Err("video stream has no dimensions".to_string()),
    };

    // Container duration is more reliable than the stream's for most muxers.
    let duration = output
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or(stream.duration.as_deref())
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d > 0.0)
        .ok_or_else(|| "no usable duration".to_string())?;

    Ok(ProbeInfo {
        duration,
        width,
        height,
    })
}

pub fn probe(config: &FfmpegConfig, input_path: &Path) -> Result<ProbeInfo, String> {
    let output = Command::new(&config.ffprobe)
        .arg("-v")
        .arg("error")
        .arg("-select_streams")
        .arg("v:0")
        .arg("-show_entries")
        .arg("stream=width,height,duration:format=duration")
        .arg("-of")
        .arg("json")
        .arg(input_path)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| format!("failed to spawn ffprobe: {}", e))?;

    if !output.status.success() {
        return Err(stderr_reason("ffprobe", &output.stderr));
    }
    parse_probe(&output.stdout)
}

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Decodes the single frame shown at `position` as packed RGBA.
///
/// `superseded` is polled while ffmpeg runs. Once it returns true the child is
/// killed and the decode abandoned.
pub fn decode_frame(
    config: &FfmpegConfig,
    input_path: &Path,
    position: f64,
    muted: bool,
    superseded: impl Fn() -> bool,
) -> Result<Vec<u8>, String> {
    let mut command = Command::new(&config.ffmpeg);
    command
        .arg("-v")
        .arg("error")
        .arg("-noautorotate")
        .arg("-ss")
        .arg(format!("{:.3}", position))
        .arg("-i")
        .arg(input_path);
    if muted {
        command.arg("-an");
    }
    let mut child = command
        .arg("-frames:v")
        .arg("1")
        .arg("-f")
        .arg("rawvideo")
        .arg("-pix_fmt")
        .arg("rgba")
        .arg("-")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("failed to spawn ffmpeg: {}", e))?;

    let stdout = drain(child.stdout.take().ok_or("failed to open ffmpeg stdout")?);
    let stderr = drain(child.stderr.take().ok_or("failed to open ffmpeg stderr")?);

    let status = loop {
        if superseded() {
            let _ = child.kill();
            let _ = child.wait();
            return Err(format!("decode at {:.3}s superseded", position));
        }
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => {
                let _ = child.kill();
                return Err(format!("failed to wait on ffmpeg: {}", e));
            }
        }
    };

    let buffer = collect(stdout, "stdout")?;
    let errors = collect(stderr, "stderr")?;
    if !status.success() {
        return Err(stderr_reason("ffmpeg", &errors));
    }
    if buffer.is_empty() {
        return Err(format!("no frame decoded at {:.3}s", position));
    }
    Ok(buffer)
}

fn drain(mut pipe: impl Read + Send + 'static) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        pipe.read_to_end(&mut buffer)?;
        Ok(buffer)
    })
}

fn collect(reader: JoinHandle<io::Result<Vec<u8>>>, pipe: &str) -> Result<Vec<u8>, String> {
    match reader.join() {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(e)) => Err(format!("failed to read ffmpeg {}: {}", pipe, e)),
        Err(_) => Err(format!("ffmpeg {} reader panicked", pipe)),
    }
}

fn stderr_reason(tool: &str, stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    match text.lines().rev().find(|l| !l.trim().is_empty()) {
        Some(line) => format!("{} failed: {}", tool, line.trim()),
        None => format!("{} exited with non-zero status", tool),
    }
}

#[derive(Debug)]
struct Shared {
    ready: ReadyState,
    loading: bool,
    preload: Preload,
    info: Option<ProbeInfo>,
    frame: Option<Vec<u8>>,
    /// Bumped on every seek; results from older seeks are discarded.
    seek_generation: u64,
    listeners: Vec<(ListenerId, Sender<MediaEvent>)>,
}

impl Shared {
    fn emit(&mut self, event: MediaEvent) {
        self.listeners
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A media handle over a file on disk, driven by `ffprobe` and `ffmpeg`.
///
/// Loading and seeking run on short-lived worker threads and report back
/// through listener channels.
#[derive(Debug)]
pub struct FfmpegHandle {
    path: PathBuf,
    config: FfmpegConfig,
    muted: bool,
    next_listener: u64,
    shared: Arc<Mutex<Shared>>,
}

impl FfmpegHandle {
    pub fn open(path: impl Into<PathBuf>, config: FfmpegConfig) -> Self {
        Self {
            path: path.into(),
            config,
            muted: false,
            next_listener: 0,
            shared: Arc::new(Mutex::new(Shared {
                ready: ReadyState::HaveNothing,
                loading: false,
                preload: Preload::default(),
                info: None,
                frame: None,
                seek_generation: 0,
                listeners: Vec::new(),
            })),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn muted(&self) -> bool {
        self.muted
    }

    pub fn preload(&self) -> Preload {
        lock(&self.shared).preload
    }
}

impl MediaHandle for FfmpegHandle {
    fn duration(&self) -> Option<f64> {
        lock(&self.shared).info.map(|i| i.duration)
    }

    fn dimensions(&self) -> (u32, u32) {
        lock(&self.shared)
            .info
            .map(|i| (i.width, i.height))
            .unwrap_or((0, 0))
    }

    fn ready_state(&self) -> ReadyState {
        lock(&self.shared).ready
    }

    fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    // Shared with the load worker so an in-flight metadata load can be
    // upgraded to a full one.
    fn set_preload(&mut self, preload: Preload) {
        lock(&self.shared).preload = preload;
    }

    fn add_listener(&mut self) -> Listener {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        let (tx, rx) = unbounded();
        lock(&self.shared).listeners.push((id, tx));
        Listener { id, events: rx }
    }

    fn remove_listener(&mut self, id: ListenerId) {
        lock(&self.shared).listeners.retain(|(lid, _)| *lid != id);
    }

    fn load(&mut self) {
        {
            let mut state = lock(&self.shared);
            let wanted = match state.preload {
                Preload::Metadata => ReadyState::HaveMetadata,
                Preload::Full => ReadyState::HaveEnoughData,
            };
            if state.loading || state.ready >= wanted {
                return;
            }
            state.loading = true;
        }

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let path = self.path.clone();
        let muted = self.muted;

        thread::spawn(move || {
            debug!("Probing {:?}", path);
            let info = match probe(&config, &path) {
                Ok(info) => info,
                Err(reason) => {
                    let mut state = lock(&shared);
                    state.loading = false;
                    state.emit(MediaEvent::LoadError(reason));
                    return;
                }
            };
            {
                let mut state = lock(&shared);
                state.info = Some(info);
                state.ready = state.ready.max(ReadyState::HaveMetadata);
                state.emit(MediaEvent::LoadedMetadata);
                if state.preload == Preload::Metadata {
                    state.loading = false;
                    return;
                }
            }

            // A full preload proves the stream decodes before reporting it playable.
            let decoded = decode_frame(&config, &path, 0.0, muted, || false);
            let mut state = lock(&shared);
            state.loading = false;
            match decoded {
                Ok(_) => {
                    state.ready = ReadyState::HaveEnoughData;
                    state.emit(MediaEvent::CanPlayThrough);
                }
                Err(reason) => state.emit(MediaEvent::LoadError(reason)),
            }
        });
    }

    fn seek(&mut self, position: f64) {
        let generation = {
            let mut state = lock(&self.shared);
            state.seek_generation += 1;
            state.seek_generation
        };

        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let path = self.path.clone();
        let muted = self.muted;

        thread::spawn(move || {
            let superseded = || lock(&shared).seek_generation != generation;
            let decoded = decode_frame(&config, &path, position, muted, superseded);
            let mut state = lock(&shared);
            if state.seek_generation != generation {
                debug!("Discarding stale seek to {:.3}s", position);
                return;
            }
            match decoded {
                Ok(pixels) => {
                    state.frame = Some(pixels);
                    state.emit(MediaEvent::Seeked);
                }
                Err(reason) => state.emit(MediaEvent::SeekError(reason)),
            }
        });
    }

    fn draw_frame(&mut self, target: &mut RgbaImage) -> Result<(), FrameError> {
        let state = lock(&self.shared);
        let frame = state
            .frame
            .as_ref()
            .ok_or_else(|| FrameError::Capture("no frame decoded yet".to_string()))?;

        let (width, height) = target.dimensions();
        let raster: &mut [u8] = target;
        if frame.len() != raster.len() {
            return Err(FrameError::Capture(format!(
                "decoded {} bytes for a {}x{} raster",
                frame.len(),
                width,
                height
            )));
        }
        raster.copy_from_slice(frame);
        Ok(())
    }
}

/// Writes blobs to temp files and opens them with [`FfmpegHandle`].
#[derive(Debug)]
pub struct FfmpegBackend {
    config: FfmpegConfig,
    next_id: AtomicU64,
    scratch: Mutex<HashMap<u64, TempPath>>,
}

impl FfmpegBackend {
    pub fn new(config: FfmpegConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(0),
            scratch: Mutex::new(HashMap::new()),
        }
    }

    /// Number of temp files currently held.
    pub fn outstanding(&self) -> usize {
        self.scratch.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl MediaBackend for FfmpegBackend {
    fn allocate(&self, blob: &MediaBlob) -> Result<ScratchRef, LoadError> {
        let suffix = format!(".{}", mimetype::extension_for(&blob.mime));
        let mut file = tempfile::Builder::new()
            .prefix("chroma-")
            .suffix(&suffix)
            .tempfile()
            .map_err(LoadError::Scratch)?;
        file.write_all(&blob.bytes).map_err(LoadError::Scratch)?;
        file.flush().map_err(LoadError::Scratch)?;

        let temp_path = file.into_temp_path();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let location = temp_path.to_path_buf();
        self.scratch
            .lock()
            .map_err(|_| LoadError::Open("scratch registry poisoned".to_string()))?
            .insert(id, temp_path);

        debug!("Allocated scratch #{} at {:?}", id, location);
        Ok(ScratchRef::new(id, location))
    }

    fn open(&self, scratch: &ScratchRef) -> Result<Box<dyn MediaHandle>, LoadError> {
        if !scratch.location().exists() {
            return Err(LoadError::Open(format!(
                "scratch file {:?} is missing",
                scratch.location()
            )));
        }
        Ok(Box::new(FfmpegHandle::open(
            scratch.location(),
            self.config.clone(),
        )))
    }

    fn release(&self, scratch: ScratchRef) {
        let removed = match self.scratch.lock() {
            Ok(mut map) => map.remove(&scratch.id()),
            Err(_) => None,
        };
        match removed {
            Some(temp_path) => {
                if let Err(e) = temp_path.close() {
                    warn!("Failed to delete scratch #{}: {}", scratch.id(), e);
                } else {
                    debug!("Released scratch #{}", scratch.id());
                }
            }
            None => warn!("Release of unknown scratch #{}", scratch.id()),
        }
    }
}
