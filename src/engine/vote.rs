use tracing::debug;

use crate::engine::{ChromakeyResult, DetectionConfig, DetectionEngine, DetectionMethod, Rgb};
use crate::error::EngineError;

/// Frames whose hues differ by less than this many degrees vote together.
const HUE_TOLERANCE: f32 = 10.0;

/// Single-frame colour detection plugged into a [`VoteEngine`].
pub trait FrameDetector: Send {
    fn detect(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        config: &DetectionConfig,
    ) -> Option<ChromakeyResult>;
}

impl<F> FrameDetector for F
where
    F: Fn(&[u8], u32, u32, &DetectionConfig) -> Option<ChromakeyResult> + Send,
{
    fn detect(
        &self,
        pixels: &[u8],
        width: u32,
        height: u32,
        config: &DetectionConfig,
    ) -> Option<ChromakeyResult> {
        self(pixels, width, height, config)
    }
}

/// Engine that runs a [`FrameDetector`] per frame and reaches consensus by
/// hue agreement.
pub struct VoteEngine<D> {
    detector: D,
    config: DetectionConfig,
    initialized: bool,
    session: Option<Vec<ChromakeyResult>>,
}

impl<D: FrameDetector> VoteEngine<D> {
    pub fn new(detector: D) -> Self {
        Self {
            detector,
            config: DetectionConfig::default(),
            initialized: false,
            session: None,
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn session_open(&self) -> bool {
        self.session.is_some()
    }
}

impl<D: FrameDetector> DetectionEngine for VoteEngine<D> {
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

    fn detect_from_image(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Option<ChromakeyResult> {
        self.detector.detect(pixels, width, height, &self.config)
    }

    fn start_session(&mut self) {
        if let Some(stale) = self.session.replace(Vec::new()) {
            debug!("Discarding unconsumed session with {} frames", stale.len());
        }
    }

    fn add_frame(&mut self, pixels: &[u8], width: u32, height: u32) -> bool {
        let Some(session) = self.session.as_mut() else {
            return false;
        };
        match self.detector.detect(pixels, width, height, &self.config) {
            Some(result) => {
                session.push(result);
                true
            }
            None => false,
        }
    }

    fn get_consensus(&mut self) -> Option<ChromakeyResult> {
        let frames = self.session.take()?;
        consensus(&frames)
    }
}

/// Picks the largest group of hue-agreeing results and averages it.
///
/// Confidence is scaled by the share of frames in that group.
pub fn consensus(results: &[ChromakeyResult]) -> Option<ChromakeyResult> {
    if results.is_empty() {
        return None;
    }

    let groups = group_by_hue(results);
    // Ties go to the group formed last.
    let largest = groups.iter().max_by_key(|g| g.len())?;

    let agreement = largest.len() as f32 / results.len() as f32;
    let mut merged = average(largest);
    merged.confidence *= agreement;
    Some(merged)
}

fn hue_distance(a: f32, b: f32) -> f32 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}

fn group_by_hue(results: &[ChromakeyResult]) -> Vec<Vec<&ChromakeyResult>> {
    let mut groups: Vec<Vec<&ChromakeyResult>> = Vec::new();
    for result in results {
        let home = groups.iter_mut().find(|g| {
            g.first()
                .is_some_and(|first| hue_distance(result.hue, first.hue) < HUE_TOLERANCE)
        });
        match home {
            Some(group) => group.push(result),
            None => groups.push(vec![result]),
        }
    }
    groups
}

fn average(group: &[&ChromakeyResult]) -> ChromakeyResult {
    let n = group.len() as f32;
    let (mut r, mut g, mut b) = (0.0f32, 0.0f32, 0.0f32);
    let (mut confidence, mut coverage) = (0.0f32, 0.0f32);
    let (mut sin, mut cos) = (0.0f32, 0.0f32);

    for result in group {
        r += f32::from(result.color.r);
        g += f32::from(result.color.g);
        b += f32::from(result.color.b);
        confidence += result.confidence;
        coverage += result.coverage;
        let radians = result.hue.to_radians();
        sin += radians.sin();
        cos += radians.cos();
    }

    // Circular mean so a group straddling 0/360 stays near red.
    let hue = sin.atan2(cos).to_degrees().rem_euclid(360.0);

    ChromakeyResult {
        color: Rgb {
            r: (r / n).round() as u8,
            g: (g / n).round() as u8,
            b: (b / n).round() as u8,
        },
        confidence: confidence / n,
        coverage: coverage / n,
        hue: if hue >= 360.0 { 0.0 } else { hue },
        method: Some(DetectionMethod::Hybrid),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(r: u8, g: u8, b: u8, hue: f32) -> ChromakeyResult {
        ChromakeyResult {
            color: Rgb { r, g, b },
            confidence: 0.9,
            coverage: 0.5,
            hue,
            method: Some(DetectionMethod::Edge),
        }
    }

    fn green() -> ChromakeyResult {
        frame(0, 255, 0, 120.0)
    }

    fn blue() -> ChromakeyResult {
        frame(0, 0, 255, 240.0)
    }

    /// Reads the hue straight out of the first pixel's red channel.
    fn hue_from_red(pixels: &[u8], _: u32, _: u32, _: &DetectionConfig) -> Option<ChromakeyResult> {
        match pixels.first() {
            Some(0) | None => None,
            Some(&h) => Some(frame(0, 255, 0, f32::from(h))),
        }
    }

    #[test]
    fn test_video_consensus_perfect_agreement() {
        let results: Vec<_> = (0..5).map(|_| green()).collect();
        let consensus = consensus(&results).unwrap();

        assert!((consensus.hue - 120.0).abs() < 0.1);
        assert!(consensus.confidence > 0.89);
        assert_eq!(consensus.method, Some(DetectionMethod::Hybrid));
    }

    #[test]
    fn test_video_consensus_noise_handling() {
        let mut results: Vec<_> = (0..4).map(|_| green()).collect();
        results.push(blue());

        let consensus = consensus(&results).unwrap();

        assert!((consensus.hue - 120.0).abs() < 1.0);
        // 4 of 5 frames agree: 0.9 * 0.8
        assert!((consensus.confidence - 0.72).abs() < 0.01);
        assert_eq!(consensus.color, Rgb { r: 0, g: 255, b: 0 });
    }

    #[test]
    fn test_equal_groups_prefer_later_hue() {
        let consensus = consensus(&[green(), blue()]).unwrap();

        assert!((consensus.hue - 240.0).abs() < 0.1);
        assert_eq!(consensus.color, Rgb { r: 0, g: 0, b: 255 });
        assert!((consensus.confidence - 0.45).abs() < 0.01);
    }

    #[test]
    fn test_hue_wraparound_groups_together() {
        let results = vec![frame(255, 0, 0, 355.0), frame(255, 0, 0, 3.0), green()];
        let consensus = consensus(&results).unwrap();

        assert!(hue_distance(consensus.hue, 359.0) < 0.5);
        assert!((consensus.confidence - 0.6).abs() < 0.01);
    }

    #[test]
    fn test_empty_session_has_no_consensus() {
        assert!(consensus(&[]).is_none());
    }

    #[test]
    fn test_session_lifecycle() {
        let mut engine = VoteEngine::new(hue_from_red);
        assert!(!engine.is_initialized());
        engine.init().unwrap();
        engine.init().unwrap();
        assert!(engine.is_initialized());

        // No open session: frames are rejected.
        assert!(!engine.add_frame(&[120, 0, 0, 255], 1, 1));

        engine.start_session();
        assert!(engine.add_frame(&[120, 0, 0, 255], 1, 1));
        assert!(!engine.add_frame(&[0, 0, 0, 255], 1, 1));
        assert!(engine.add_frame(&[122, 0, 0, 255], 1, 1));

        let result = engine.get_consensus().unwrap();
        assert!((result.hue - 121.0).abs() < 0.1);
        assert!(!engine.session_open());
        assert!(engine.get_consensus().is_none());
    }

    #[test]
    fn test_start_session_discards_previous() {
        let mut engine = VoteEngine::new(hue_from_red);
        engine.init().unwrap();
        engine.start_session();
        assert!(engine.add_frame(&[200, 0, 0, 255], 1, 1));

        engine.start_session();
        assert!(engine.get_consensus().is_none());
    }

    #[test]
    fn test_config_reaches_detector() {
        let strict = |_: &[u8], _: u32, _: u32, config: &DetectionConfig| {
            (config.confidence_threshold < 0.5).then(green)
        };
        let mut engine = VoteEngine::new(strict);
        engine.init().unwrap();
        assert!(engine.detect_from_image(&[0; 4], 1, 1).is_none());

        engine.set_config(DetectionConfig {
            confidence_threshold: 0.3,
            ..Default::default()
        });
        assert_eq!(engine.detect_from_image(&[0; 4], 1, 1), Some(green()));
        assert_eq!(engine.config().confidence_threshold, 0.3);
    }

    #[test]
    fn test_config_serde_uses_camel_case() {
        let config: DetectionConfig =
            serde_json::from_str(r#"{ "minSaturation": 0.4, "confidenceThreshold": 0.8 }"#)
                .unwrap();
        assert_eq!(config.min_saturation, 0.4);
        assert_eq!(config.confidence_threshold, 0.8);
        assert_eq!(config.min_area_percentage, 0.25);
    }
}
