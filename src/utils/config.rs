use std::fs::File;
use std::io::{Write, BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Result, Context, anyhow};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ScheduleError;
use crate::media::{DEFAULT_LOAD_TIMEOUT, DEFAULT_SEEK_TIMEOUT};
use crate::sampling::SampleStrategy;

/// Caller-facing sampling options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SamplingConfig {
    pub frame_sample_count: usize,
    pub sample_strategy: SampleStrategy,
    /// Seconds of the source eligible for sampling.
    pub max_duration: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            frame_sample_count: 8,
            sample_strategy: SampleStrategy::Uniform,
            max_duration: 30.0,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.frame_sample_count == 0 {
            return Err(ScheduleError::ZeroCount);
        }
        if self.max_duration.is_nan() || self.max_duration <= 0.0 {
            return Err(ScheduleError::InvalidMaxDuration(self.max_duration));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub load: Duration,
    pub seek: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            load: DEFAULT_LOAD_TIMEOUT,
            seek: DEFAULT_SEEK_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegConfig {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for FfmpegConfig {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    pub sampling: SamplingConfig,
    pub timeouts: Timeouts,
    pub ffmpeg: FfmpegConfig,
}

/// Loads settings from `path` if it exists, otherwise returns defaults.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        info!("No settings file at {:?}, using defaults", path);
        return Ok(Settings::default());
    }
    let settings = if path.extension().is_some_and(|e| e == "json") {
        load_from_json(path)?
    } else {
        load_from_env(path)?
    };
    info!("Loaded settings from {:?}", path);
    Ok(settings)
}

fn load_from_json(path: &Path) -> Result<Settings> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let sampling: SamplingConfig = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid sampling config in {:?}", path))?;
    sampling.validate()?;
    Ok(Settings {
        sampling,
        ..Settings::default()
    })
}

/// Reads `KEY=VALUE` lines. Unknown keys are ignored, missing keys keep defaults.
pub fn load_from_env(path: &Path) -> Result<Settings> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut settings = Settings::default();

    for line in reader.lines() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "CHROMA_FRAME_SAMPLE_COUNT" => {
                settings.sampling.frame_sample_count = value
                    .parse()
                    .with_context(|| format!("Invalid frame sample count: {}", value))?;
            }
            "CHROMA_SAMPLE_STRATEGY" => {
                settings.sampling.sample_strategy = value.parse().map_err(|e| anyhow!("{}", e))?;
            }
            "CHROMA_MAX_DURATION" => {
                settings.sampling.max_duration = value
                    .parse()
                    .with_context(|| format!("Invalid max duration: {}", value))?;
            }
            "CHROMA_LOAD_TIMEOUT_MS" => settings.timeouts.load = parse_millis(value)?,
            "CHROMA_SEEK_TIMEOUT_MS" => settings.timeouts.seek = parse_millis(value)?,
            "FFMPEG_PATH" => settings.ffmpeg.ffmpeg = PathBuf::from(value),
            "FFPROBE_PATH" => settings.ffmpeg.ffprobe = PathBuf::from(value),
            _ => {}
        }
    }

    settings.sampling.validate()?;
    Ok(settings)
}

fn parse_millis(value: &str) -> Result<Duration> {
    let ms: u64 = value
        .parse()
        .with_context(|| format!("Invalid timeout in milliseconds: {}", value))?;
    Ok(Duration::from_millis(ms))
}

pub fn save_to_env(path: &Path, settings: &Settings) -> Result<()> {
    let mut file = File::create(path).context("Failed to create settings file")?;
    let strategy = match settings.sampling.sample_strategy {
        SampleStrategy::Uniform => "uniform",
        SampleStrategy::Keyframes => "keyframes",
    };
    writeln!(file, "CHROMA_FRAME_SAMPLE_COUNT={}", settings.sampling.frame_sample_count)?;
    writeln!(file, "CHROMA_SAMPLE_STRATEGY={}", strategy)?;
    writeln!(file, "CHROMA_MAX_DURATION={}", settings.sampling.max_duration)?;
    writeln!(file, "CHROMA_LOAD_TIMEOUT_MS={}", settings.timeouts.load.as_millis())?;
    writeln!(file, "CHROMA_SEEK_TIMEOUT_MS={}", settings.timeouts.seek.as_millis())?;
    writeln!(file, "FFMPEG_PATH={}", settings.ffmpeg.ffmpeg.display())?;
    writeln!(file, "FFPROBE_PATH={}", settings.ffmpeg.ffprobe.display())?;
    Ok(())
}
