use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// Share of the sample count placed in each of the head and tail windows.
const EDGE_SHARE: f64 = 0.4;
const HEAD_END: f64 = 0.1;
const TAIL_START: f64 = 0.9;
const MIDDLE_START: f64 = 0.3;
const MIDDLE_END: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SampleStrategy {
    /// Evenly spaced inside the open interval, never the first or last frame.
    #[default]
    Uniform,
    /// Weighted toward the opening and closing seconds of the clip.
    Keyframes,
}

impl std::str::FromStr for SampleStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uniform" => Ok(Self::Uniform),
            "keyframes" => Ok(Self::Keyframes),
            other => Err(format!("unknown sample strategy: {}", other)),
        }
    }
}

/// Ordered, immutable list of timestamps (seconds) to sample.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SamplingPlan {
    strategy: SampleStrategy,
    effective_duration: f64,
    timestamps: Vec<f64>,
}

impl SamplingPlan {
    pub fn strategy(&self) -> SampleStrategy {
        self.strategy
    }

    pub fn effective_duration(&self) -> f64 {
        self.effective_duration
    }

    pub fn timestamps(&self) -> &[f64] {
        &self.timestamps
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = f64> + '_ {
        self.timestamps.iter().copied()
    }
}

/// Computes which timestamps to sample.
///
/// The duration is capped at `max_duration` before any spacing is applied.
/// Output always holds exactly `count` ascending timestamps within
/// `[0, min(duration, max_duration)]`.
pub fn plan(
    duration: f64,
    count: usize,
    strategy: SampleStrategy,
    max_duration: f64,
) -> Result<SamplingPlan, ScheduleError> {
    if !(duration.is_finite() && duration > 0.0) {
        return Err(ScheduleError::InvalidDuration(duration));
    }
    if max_duration.is_nan() || max_duration <= 0.0 {
        return Err(ScheduleError::InvalidMaxDuration(max_duration));
    }
    if count == 0 {
        return Err(ScheduleError::ZeroCount);
    }

    let effective = duration.min(max_duration);
    let timestamps = match strategy {
        SampleStrategy::Uniform => uniform(effective, count),
        SampleStrategy::Keyframes => keyframes(effective, count),
    };

    Ok(SamplingPlan {
        strategy,
        effective_duration: effective,
        timestamps,
    })
}

fn uniform(effective: f64, count: usize) -> Vec<f64> {
    let step = effective / (count + 1) as f64;
    (1..=count).map(|i| i as f64 * step).collect()
}

fn keyframes(effective: f64, count: usize) -> Vec<f64> {
    let edge_count = (count as f64 * EDGE_SHARE).floor() as usize;
    let middle_count = count - 2 * edge_count;

    let mut out = Vec::with_capacity(count);
    out.extend(half_open(0.0, HEAD_END * effective, edge_count));
    out.extend(half_open(TAIL_START * effective, effective, edge_count));
    out.extend(closed(MIDDLE_START * effective, MIDDLE_END * effective, middle_count));

    out.sort_by(f64::total_cmp);
    out
}

/// `n` evenly spaced points from `[start, end)`.
fn half_open(start: f64, end: f64, n: usize) -> impl Iterator<Item = f64> {
    let step = if n == 0 { 0.0 } else { (end - start) / n as f64 };
    (0..n).map(move |i| start + i as f64 * step)
}

/// `n` evenly spaced points from `[start, end]`. A single point sits at the midpoint.
fn closed(start: f64, end: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![(start + end) / 2.0],
        _ => {
            let step = (end - start) / (n - 1) as f64;
            (0..n).map(|i| start + i as f64 * step).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn test_uniform_spacing() {
        let plan = plan(10.0, 4, SampleStrategy::Uniform, 30.0).unwrap();
        assert!(approx(plan.timestamps(), &[2.0, 4.0, 6.0, 8.0]));
        assert_eq!(plan.effective_duration(), 10.0);
    }

    #[test]
    fn test_cap_applies_before_spacing() {
        let plan = plan(100.0, 4, SampleStrategy::Uniform, 10.0).unwrap();
        assert!(approx(plan.timestamps(), &[2.0, 4.0, 6.0, 8.0]));
        assert_eq!(plan.effective_duration(), 10.0);
    }

    #[test]
    fn test_uniform_is_strictly_inside_open_interval() {
        for count in 1..=40 {
            for &duration in &[0.04, 1.0, 7.3, 29.99, 600.0] {
                let plan = plan(duration, count, SampleStrategy::Uniform, 30.0).unwrap();
                let effective = plan.effective_duration();
                assert_eq!(plan.len(), count);
                assert!(plan.iter().all(|t| t > 0.0 && t < effective));
                assert!(plan.timestamps().windows(2).all(|w| w[0] < w[1]));
            }
        }
    }

    #[test]
    fn test_keyframes_bias_toward_edges() {
        let plan = plan(10.0, 10, SampleStrategy::Keyframes, 30.0).unwrap();
        let ts = plan.timestamps();
        assert_eq!(ts.len(), 10);
        assert!(ts.windows(2).all(|w| w[0] <= w[1]));
        assert!(ts[0] < 1.1);
        assert!(ts[6] > 8.9);
    }

    #[test]
    fn test_keyframes_small_count_uses_middle_window() {
        // floor(2 * 0.4) == 0, so nothing lands in the edge windows.
        let plan = plan(10.0, 2, SampleStrategy::Keyframes, 30.0).unwrap();
        assert!(approx(plan.timestamps(), &[3.0, 7.0]));

        let single = super::plan(10.0, 1, SampleStrategy::Keyframes, 30.0).unwrap();
        assert!(approx(single.timestamps(), &[5.0]));
    }

    #[test]
    fn test_keyframes_stay_within_bounds() {
        for count in 1..=32 {
            let plan = plan(45.0, count, SampleStrategy::Keyframes, 20.0).unwrap();
            assert_eq!(plan.len(), count);
            assert!(plan.iter().all(|t| (0.0..=20.0).contains(&t)));
            assert!(plan.timestamps().windows(2).all(|w| w[0] <= w[1]));
        }
    }

    #[test]
    fn test_deterministic() {
        let a = plan(12.5, 9, SampleStrategy::Keyframes, 30.0).unwrap();
        let b = plan(12.5, 9, SampleStrategy::Keyframes, 30.0).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_input() {
        assert_eq!(
            plan(0.0, 4, SampleStrategy::Uniform, 30.0),
            Err(ScheduleError::InvalidDuration(0.0))
        );
        assert!(matches!(
            plan(f64::NAN, 4, SampleStrategy::Uniform, 30.0),
            Err(ScheduleError::InvalidDuration(_))
        ));
        assert_eq!(
            plan(10.0, 0, SampleStrategy::Uniform, 30.0),
            Err(ScheduleError::ZeroCount)
        );
        assert_eq!(
            plan(10.0, 4, SampleStrategy::Uniform, -1.0),
            Err(ScheduleError::InvalidMaxDuration(-1.0))
        );
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("Keyframes".parse::<SampleStrategy>(), Ok(SampleStrategy::Keyframes));
        assert_eq!(" uniform ".parse::<SampleStrategy>(), Ok(SampleStrategy::Uniform));
        assert!("random".parse::<SampleStrategy>().is_err());
    }
}
