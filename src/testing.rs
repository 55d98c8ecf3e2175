//! Scripted collaborators for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam::channel::{unbounded, Sender};
use image::{Rgba, RgbaImage};

use crate::engine::{ChromakeyResult, DetectionConfig, DetectionEngine, DetectionMethod, Rgb};
use crate::error::{EngineError, FrameError, LoadError};
use crate::media::backend::{MediaBackend, ScratchRef};
use crate::media::handle::{
    Listener, ListenerId, MediaBlob, MediaEvent, MediaHandle, Preload, ReadyState,
};

#[derive(Debug, Clone)]
pub enum LoadScript {
    Ready,
    Fail(String),
    Silent,
}

#[derive(Debug, Clone)]
pub enum SeekScript {
    Arrive,
    Fail(String),
    Silent,
}

pub type SeekPlan = Arc<dyn Fn(f64) -> SeekScript + Send + Sync>;

fn always_arrive() -> SeekPlan {
    Arc::new(|_| SeekScript::Arrive)
}

#[derive(Debug, Default)]
pub struct HandleStats {
    added: AtomicUsize,
    removed: AtomicUsize,
    loads: AtomicUsize,
    draws: AtomicUsize,
    muted: AtomicBool,
    preload: Mutex<Preload>,
    seeks: Mutex<Vec<f64>>,
}

impl HandleStats {
    pub fn listeners_added(&self) -> usize {
        self.added.load(Ordering::SeqCst)
    }

    pub fn listeners_removed(&self) -> usize {
        self.removed.load(Ordering::SeqCst)
    }

    pub fn live_listeners(&self) -> usize {
        self.listeners_added() - self.listeners_removed()
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn draws(&self) -> usize {
        self.draws.load(Ordering::SeqCst)
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    pub fn preload(&self) -> Preload {
        *self.preload.lock().unwrap()
    }

    pub fn seeks(&self) -> Vec<f64> {
        self.seeks.lock().unwrap().clone()
    }
}

/// Marker written into the red channel of every drawn frame.
pub fn position_marker(position: f64) -> u8 {
    (position * 10.0).round().clamp(1.0, 255.0) as u8
}

/// A handle that answers `load` and `seek` synchronously from a script.
pub struct ScriptedHandle {
    duration: f64,
    width: u32,
    height: u32,
    ready: ReadyState,
    load_script: LoadScript,
    seek_plan: SeekPlan,
    listeners: Vec<(ListenerId, Sender<MediaEvent>)>,
    next_id: u64,
    position: f64,
    stats: Arc<HandleStats>,
}

impl ScriptedHandle {
    pub fn new(duration: f64, load_script: LoadScript) -> Self {
        Self {
            duration,
            width: 4,
            height: 2,
            ready: ReadyState::HaveNothing,
            load_script,
            seek_plan: always_arrive(),
            listeners: Vec::new(),
            next_id: 0,
            position: 0.0,
            stats: Arc::new(HandleStats::default()),
        }
    }

    pub fn ready(duration: f64) -> Self {
        let mut handle = Self::new(duration, LoadScript::Ready);
        handle.ready = ReadyState::HaveEnoughData;
        handle
    }

    pub fn with_seeks(mut self, plan: impl Fn(f64) -> SeekScript + Send + Sync + 'static) -> Self {
        self.seek_plan = Arc::new(plan);
        self
    }

    fn with_seek_plan(mut self, plan: SeekPlan) -> Self {
        self.seek_plan = plan;
        self
    }

    pub fn with_dimensions(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn stats(&self) -> Arc<HandleStats> {
        Arc::clone(&self.stats)
    }

    fn emit(&mut self, event: MediaEvent) {
        self.listeners.retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }
}

impl MediaHandle for ScriptedHandle {
    fn duration(&self) -> Option<f64> {
        (self.ready >= ReadyState::HaveMetadata).then_some(self.duration)
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn ready_state(&self) -> ReadyState {
        self.ready
    }

    fn set_muted(&mut self, muted: bool) {
        self.stats.muted.store(muted, Ordering::SeqCst);
    }

    fn set_preload(&mut self, preload: Preload) {
        *self.stats.preload.lock().unwrap() = preload;
    }

    fn add_listener(&mut self) -> Listener {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = unbounded();
        self.listeners.push((id, tx));
        self.stats.added.fetch_add(1, Ordering::SeqCst);
        Listener { id, events: rx }
    }

    fn remove_listener(&mut self, id: ListenerId) {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        if self.listeners.len() < before {
            self.stats.removed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn load(&mut self) {
        self.stats.loads.fetch_add(1, Ordering::SeqCst);
        match self.load_script.clone() {
            LoadScript::Ready => {
                self.ready = ReadyState::HaveEnoughData;
                self.emit(MediaEvent::LoadedMetadata);
                self.emit(MediaEvent::CanPlayThrough);
            }
            LoadScript::Fail(reason) => self.emit(MediaEvent::LoadError(reason)),
            LoadScript::Silent => {}
        }
    }

    fn seek(&mut self, position: f64) {
        self.stats.seeks.lock().unwrap().push(position);
        self.position = position;
        match (self.seek_plan)(position) {
            SeekScript::Arrive => self.emit(MediaEvent::Seeked),
            SeekScript::Fail(reason) => self.emit(MediaEvent::SeekError(reason)),
            SeekScript::Silent => {}
        }
    }

    fn draw_frame(&mut self, target: &mut RgbaImage) -> Result<(), FrameError> {
        self.stats.draws.fetch_add(1, Ordering::SeqCst);
        let marker = position_marker(self.position);
        for pixel in target.pixels_mut() {
            *pixel = Rgba([marker, 255, 0, 255]);
        }
        Ok(())
    }
}

/// Backend that hands out [`ScriptedHandle`]s and counts scratch traffic.
pub struct CountingBackend {
    duration: f64,
    load_script: LoadScript,
    seek_plan: SeekPlan,
    fail_open: bool,
    next_id: AtomicU64,
    allocated: AtomicUsize,
    released: AtomicUsize,
    last_stats: Mutex<Option<Arc<HandleStats>>>,
}

impl CountingBackend {
    pub fn new(duration: f64, load_script: LoadScript) -> Self {
        Self {
            duration,
            load_script,
            seek_plan: always_arrive(),
            fail_open: false,
            next_id: AtomicU64::new(0),
            allocated: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            last_stats: Mutex::new(None),
        }
    }

    pub fn ready(duration: f64) -> Self {
        Self::new(duration, LoadScript::Ready)
    }

    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn with_seeks(mut self, plan: impl Fn(f64) -> SeekScript + Send + Sync + 'static) -> Self {
        self.seek_plan = Arc::new(plan);
        self
    }

    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    pub fn last_handle_stats(&self) -> Option<Arc<HandleStats>> {
        self.last_stats.lock().unwrap().clone()
    }
}

impl MediaBackend for CountingBackend {
    fn allocate(&self, _blob: &MediaBlob) -> Result<ScratchRef, LoadError> {
        self.allocated.fetch_add(1, Ordering::SeqCst);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(ScratchRef::new(id, format!("scratch://{}", id)))
    }

    fn open(&self, _scratch: &ScratchRef) -> Result<Box<dyn MediaHandle>, LoadError> {
        if self.fail_open {
            return Err(LoadError::Open("scripted open failure".to_string()));
        }
        let handle = ScriptedHandle::new(self.duration, self.load_script.clone())
            .with_seek_plan(Arc::clone(&self.seek_plan));
        *self.last_stats.lock().unwrap() = Some(handle.stats());
        Ok(Box::new(handle))
    }

    fn release(&self, _scratch: ScratchRef) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    StartSession,
    /// Red channel of the first pixel, then dimensions.
    AddFrame(u8, u32, u32),
    GetConsensus,
}

/// Engine that records every call and answers from fixed values.
#[derive(Debug)]
pub struct RecordingEngine {
    pub initialized: bool,
    pub accept: bool,
    pub consensus: Option<ChromakeyResult>,
    pub config: DetectionConfig,
    pub calls: Vec<EngineCall>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            initialized: true,
            accept: true,
            consensus: Some(green_result()),
            config: DetectionConfig::default(),
            calls: Vec::new(),
        }
    }

    pub fn uninitialized() -> Self {
        Self {
            initialized: false,
            ..Self::new()
        }
    }

    pub fn count(&self, call: fn(&EngineCall) -> bool) -> usize {
        self.calls.iter().filter(|c| call(c)).count()
    }
}

pub fn green_result() -> ChromakeyResult {
    ChromakeyResult {
        color: Rgb { r: 0, g: 255, b: 0 },
        confidence: 0.9,
        coverage: 0.5,
        hue: 120.0,
        method: Some(DetectionMethod::Hybrid),
    }
}

impl DetectionEngine for RecordingEngine {
    fn init(&mut self) -> Result<(), EngineError> {
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn set_config(&mut self, config: DetectionConfig) {
        self.config = config;
    }

    fn detect_from_image(&mut self, _: &[u8], _: u32, _: u32) -> Option<ChromakeyResult> {
        self.consensus.clone()
    }

    fn start_session(&mut self) {
        self.calls.push(EngineCall::StartSession);
    }

    fn add_frame(&mut self, pixels: &[u8], width: u32, height: u32) -> bool {
        let marker = pixels.first().copied().unwrap_or(0);
        self.calls.push(EngineCall::AddFrame(marker, width, height));
        self.accept
    }

    fn get_consensus(&mut self) -> Option<ChromakeyResult> {
        self.calls.push(EngineCall::GetConsensus);
        self.consensus.clone()
    }
}
