//! Capture configuration.
//!
//! The rate and buffer duration determine the capacity of the rolling
//! frame window. Both are validated before any buffer is built.

use crate::error::{ClipError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;

/// Shortest rolling window, in seconds.
pub const MIN_BUFFER_SECONDS: u32 = 1;
/// Longest rolling window, in seconds.
pub const MAX_BUFFER_SECONDS: u32 = 60;

/// Supported capture rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureRate {
    Fps15,
    #[default]
    Fps30,
    Fps60,
}

impl CaptureRate {
    /// Frames per second.
    pub fn fps(self) -> u32 {
        match self {
            Self::Fps15 => 15,
            Self::Fps30 => 30,
            Self::Fps60 => 60,
        }
    }

    /// Parse a plain frames-per-second value. Only 15, 30 and 60 are accepted.
    pub fn from_fps(fps: u32) -> Result<Self> {
        match fps {
            15 => Ok(Self::Fps15),
            30 => Ok(Self::Fps30),
            60 => Ok(Self::Fps60),
            other => Err(ClipError::InvalidConfig(format!(
                "unsupported capture rate {other} (expected 15, 30 or 60)"
            ))),
        }
    }

    /// Interval between produced frames.
    pub fn frame_interval(self) -> Duration {
        Duration::from_micros(1_000_000 / self.fps() as u64)
    }
}

impl fmt::Display for CaptureRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} fps", self.fps())
    }
}

/// Configuration for a capture session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Production rate.
    pub rate: CaptureRate,
    /// Length of the rolling window in seconds.
    pub buffer_seconds: u32,
    /// Consecutive producer failures tolerated before capture stops.
    pub failure_threshold: u32,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            rate: CaptureRate::Fps30,
            buffer_seconds: 10,
            failure_threshold: 5,
        }
    }
}

impl CaptureConfig {
    pub fn new(rate: CaptureRate, buffer_seconds: u32) -> Self {
        Self {
            rate,
            buffer_seconds,
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the duration bounds and failure threshold.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_BUFFER_SECONDS..=MAX_BUFFER_SECONDS).contains(&self.buffer_seconds) {
            return Err(ClipError::InvalidConfig(format!(
                "buffer duration {}s outside {}..={}s",
                self.buffer_seconds, MIN_BUFFER_SECONDS, MAX_BUFFER_SECONDS
            )));
        }
        if self.failure_threshold == 0 {
            return Err(ClipError::InvalidConfig(
                "failure threshold must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Number of frames in the rolling window (`rate × seconds`).
    pub fn capacity(&self) -> usize {
        self.rate.fps() as usize * self.buffer_seconds as usize
    }
}
