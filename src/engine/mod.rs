pub mod vote;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub use vote::{FrameDetector, VoteEngine};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionMethod {
    Edge,
    Cluster,
    Hybrid,
}

/// A detected backdrop colour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChromakeyResult {
    pub color: Rgb,
    /// 0..=1
    pub confidence: f32,
    /// Fraction of the frame covered, 0..=1.
    pub coverage: f32,
    /// Degrees, 0..360.
    pub hue: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<DetectionMethod>,
}

/// Sensitivity thresholds forwarded to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionConfig {
    pub min_area_percentage: f32,
    pub min_saturation: f32,
    pub edge_sample_percentage: f32,
    pub confidence_threshold: f32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            min_area_percentage: 0.25,
            min_saturation: 0.6,
            edge_sample_percentage: 0.15,
            confidence_threshold: 0.7,
        }
    }
}

/// The colour-detection engine consumed by the orchestrator.
///
/// An instance holds at most one open session. `start_session` discards any
/// session that was never consumed; `get_consensus` closes it.
pub trait DetectionEngine: Send {
    /// Idempotent. Must succeed before any other call.
    fn init(&mut self) -> Result<(), EngineError>;

    fn is_initialized(&self) -> bool;

    fn set_config(&mut self, config: DetectionConfig);

    /// Single-frame detection, `pixels` being packed RGBA.
    fn detect_from_image(&mut self, pixels: &[u8], width: u32, height: u32)
        -> Option<ChromakeyResult>;

    fn start_session(&mut self);

    /// Returns whether the frame contributed to the session.
    fn add_frame(&mut self, pixels: &[u8], width: u32, height: u32) -> bool;

    fn get_consensus(&mut self) -> Option<ChromakeyResult>;
}
