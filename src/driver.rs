use std::sync::{Arc, Mutex, TryLockError};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::{ChromakeyResult, DetectionEngine};
use crate::error::{AnalysisError, FrameError, LoadError};
use crate::media::{
    FrameExtractor, FrameSample, LoadedSource, MediaBackend, MediaSource, SourceLoader,
};
use crate::sampling::{self, SamplingPlan};
use crate::utils::config::{SamplingConfig, Timeouts};

/// What happened to one planned timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FrameStatus {
    Accepted,
    /// Extracted, but the engine judged it uninformative.
    Rejected,
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameOutcome {
    pub timestamp: f64,
    #[serde(flatten)]
    pub status: FrameStatus,
}

/// Result of one analysis call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoAnalysis {
    /// `None` when no confident consensus was reached.
    pub consensus: Option<ChromakeyResult>,
    pub plan: SamplingPlan,
    pub frames: Vec<FrameOutcome>,
}

impl VideoAnalysis {
    pub fn accepted(&self) -> usize {
        self.count(|s| matches!(s, FrameStatus::Accepted))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| matches!(s, FrameStatus::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&FrameStatus) -> bool) -> usize {
        self.frames.iter().filter(|f| pred(&f.status)).count()
    }
}

/// Walks a sampling plan over a loaded source, one seek at a time.
///
/// Frames that cannot be extracted are logged and recorded as skipped; every
/// other frame is handed to the caller, which decides its status.
#[derive(Debug, Clone, Default)]
pub struct FrameSampler {
    extractor: FrameExtractor,
    config: SamplingConfig,
}

impl FrameSampler {
    pub fn new(config: SamplingConfig, extractor: FrameExtractor) -> Self {
        Self { extractor, config }
    }

    pub fn config(&self) -> &SamplingConfig {
        &self.config
    }

    pub fn plan_for(&self, loaded: &LoadedSource<'_>) -> Result<SamplingPlan, AnalysisError> {
        let duration = loaded.duration().ok_or(LoadError::MissingDuration)?;
        let plan = sampling::plan(
            duration,
            self.config.frame_sample_count,
            self.config.sample_strategy,
            self.config.max_duration,
        )?;
        info!(
            "Sampling {} frames ({:?}) over {:.2}s of {:.2}s",
            plan.len(),
            plan.strategy(),
            plan.effective_duration(),
            duration
        );
        Ok(plan)
    }

    pub fn run(
        &self,
        loaded: &mut LoadedSource<'_>,
        plan: &SamplingPlan,
        mut on_frame: impl FnMut(FrameSample) -> FrameStatus,
    ) -> Vec<FrameOutcome> {
        let mut frames = Vec::with_capacity(plan.len());
        for timestamp in plan.iter() {
            let status = match self.extractor.extract(loaded.handle(), timestamp) {
                Ok(sample) => on_frame(sample),
                Err(e) => {
                    warn!("Skipping frame: {}", e);
                    skipped(&e)
                }
            };
            frames.push(FrameOutcome { timestamp, status });
        }
        frames
    }
}

/// Drives a sampling plan through the extractor into a detection engine.
///
/// The engine allows one open session at a time. The driver holds the
/// engine's lock for the whole call, so a concurrent call on the same engine
/// fails with [`AnalysisError::SessionBusy`] instead of interleaving frames.
pub struct ConsensusDriver<E> {
    engine: Arc<Mutex<E>>,
    loader: SourceLoader,
    sampler: FrameSampler,
}

impl<E: DetectionEngine> ConsensusDriver<E> {
    pub fn new(engine: Arc<Mutex<E>>, backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            engine,
            loader: SourceLoader::new(backend),
            sampler: FrameSampler::default(),
        }
    }

    pub fn with_config(mut self, config: SamplingConfig) -> Self {
        self.sampler.config = config;
        self
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.loader = self.loader.with_timeout(timeouts.load);
        self.sampler.extractor = FrameExtractor::with_timeout(timeouts.seek);
        self
    }

    pub fn config(&self) -> &SamplingConfig {
        self.sampler.config()
    }

    pub fn engine(&self) -> &Arc<Mutex<E>> {
        &self.engine
    }

    pub fn analyze(&self, source: MediaSource<'_>) -> Result<VideoAnalysis, AnalysisError> {
        let mut engine = match self.engine.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(AnalysisError::SessionBusy),
            // A panic mid-session leaves nothing worth keeping; start_session resets it.
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };
        if !engine.is_initialized() {
            return Err(AnalysisError::EngineNotInitialized);
        }
        self.sampler.config.validate()?;

        // Dropping `loaded` on any early return releases loader-owned resources.
        let mut loaded = self.loader.load(source)?;
        let plan = self.sampler.plan_for(&loaded)?;

        engine.start_session();
        let frames = self.sampler.run(&mut loaded, &plan, |sample| {
            if engine.add_frame(&sample.pixels, sample.width, sample.height) {
                debug!("Frame at {:.3}s accepted", sample.timestamp);
                FrameStatus::Accepted
            } else {
                debug!("Frame at {:.3}s rejected by engine", sample.timestamp);
                FrameStatus::Rejected
            }
        });

        let consensus = engine.get_consensus();
        loaded.release();

        let analysis = VideoAnalysis {
            consensus,
            plan,
            frames,
        };
        match &analysis.consensus {
            Some(result) => info!(
                "Consensus hue {:.1} (confidence {:.2}) from {}/{} frames",
                result.hue,
                result.confidence,
                analysis.accepted(),
                analysis.frames.len()
            ),
            None => info!(
                "No consensus from {}/{} accepted frames",
                analysis.accepted(),
                analysis.frames.len()
            ),
        }
        Ok(analysis)
    }
}

fn skipped(error: &FrameError) -> FrameStatus {
    FrameStatus::Skipped {
        reason: error.to_string(),
    }
}

impl<E> std::fmt::Debug for ConsensusDriver<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsensusDriver")
            .field("loader", &self.loader)
            .field("sampler", &self.sampler)
            .finish()
    }
}
