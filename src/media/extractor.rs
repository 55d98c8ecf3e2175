use std::time::Duration;

use image::RgbaImage;
use tracing::debug;

use crate::error::FrameError;
use crate::media::handle::{MediaEvent, MediaHandle};
use crate::media::signal::{await_signal, Settled};

pub const DEFAULT_SEEK_TIMEOUT: Duration = Duration::from_millis(5000);

/// One captured frame: packed RGBA, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSample {
    pub timestamp: f64,
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Seeks a ready handle and captures the frame shown there.
#[derive(Debug, Clone, Copy)]
pub struct FrameExtractor {
    timeout: Duration,
}

impl Default for FrameExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameExtractor {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_SEEK_TIMEOUT,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn extract<H>(&self, handle: &mut H, timestamp: f64) -> Result<FrameSample, FrameError>
    where
        H: MediaHandle + ?Sized,
    {
        let end = handle.duration().unwrap_or(timestamp).max(0.0);
        let target = timestamp.clamp(0.0, end);

        let outcome = await_signal(
            handle,
            self.timeout,
            |h| {
                h.seek(target);
                None
            },
            |event| match event {
                MediaEvent::Seeked => Some(Ok(())),
                MediaEvent::SeekError(reason) => Some(Err(reason)),
                _ => None,
            },
        );

        match outcome {
            Settled::Signal(Ok(())) => {}
            Settled::Signal(Err(reason)) => {
                return Err(FrameError::SeekFailed {
                    timestamp: target,
                    reason,
                })
            }
            Settled::TimedOut => {
                return Err(FrameError::FrameExtractionTimeout {
                    timestamp: target,
                    budget: self.timeout,
                })
            }
            Settled::Closed => return Err(FrameError::Closed { timestamp: target }),
        }

        let (width, height) = handle.dimensions();
        if width == 0 || height == 0 {
            return Err(FrameError::EmptyFrame { width, height });
        }

        // A fresh raster per call; nothing carries over between frames.
        let mut raster = RgbaImage::new(width, height);
        handle.draw_frame(&mut raster)?;
        debug!("Captured {}x{} frame at {:.3}s", width, height, target);

        Ok(FrameSample {
            timestamp: target,
            width,
            height,
            pixels: raster.into_raw(),
        })
    }
}
