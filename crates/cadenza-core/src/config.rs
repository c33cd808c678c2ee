//! Engine and output configuration.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Playback engine tuning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ring transport capacity in seconds of audio at the device rate.
    pub ring_seconds: f64,
    /// Fraction of a second buffered before Play/Seek/Replay start output.
    pub play_prime_seconds: f64,
    /// Fraction of a second buffered before Resume starts output.
    pub resume_prime_seconds: f64,
    /// Upper bound on the priming wait.
    pub prime_timeout_ms: u64,
    /// Poll interval while priming.
    pub prime_poll_ms: u64,
    /// Command queue wait before the engine loop does bookkeeping.
    pub command_poll_ms: u64,
    /// Frames produced per decode chunk.
    pub decode_chunk_frames: usize,
    /// Decode thread wait while idle or blocked on a full transport.
    pub decode_idle_ms: u64,
    /// Upper bound on the engine waiting for the decode thread to go idle.
    pub decode_idle_timeout_ms: u64,
    pub output: OutputConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ring_seconds: 2.0,
            play_prime_seconds: 0.2,
            resume_prime_seconds: 0.05,
            prime_timeout_ms: 2000,
            prime_poll_ms: 10,
            command_poll_ms: 50,
            decode_chunk_frames: 1024,
            decode_idle_ms: 20,
            decode_idle_timeout_ms: 2000,
            output: OutputConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !(self.ring_seconds.is_finite() && self.ring_seconds > 0.0) {
            return Err(Error::InvalidArgument(format!(
                "ring_seconds must be positive, got {}",
                self.ring_seconds
            )));
        }
        for (name, value) in [
            ("play_prime_seconds", self.play_prime_seconds),
            ("resume_prime_seconds", self.resume_prime_seconds),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::InvalidArgument(format!(
                    "{name} must be non-negative, got {value}"
                )));
            }
            if value >= self.ring_seconds {
                return Err(Error::InvalidArgument(format!(
                    "{name} ({value}) must be smaller than ring_seconds ({})",
                    self.ring_seconds
                )));
            }
        }
        if self.decode_chunk_frames == 0 {
            return Err(Error::InvalidArgument(
                "decode_chunk_frames must be non-zero".into(),
            ));
        }
        if self.decode_idle_timeout_ms == 0 {
            return Err(Error::InvalidArgument(
                "decode_idle_timeout_ms must be non-zero".into(),
            ));
        }
        self.output.validate()
    }

    /// Ring capacity in frames for a device running at `sample_rate`.
    pub fn ring_capacity_frames(&self, sample_rate: u32) -> usize {
        ((f64::from(sample_rate) * self.ring_seconds).round() as usize).max(1)
    }

    /// Frames that must be buffered before output starts.
    pub fn prime_frames(&self, sample_rate: u32, resume: bool) -> usize {
        let seconds = if resume {
            self.resume_prime_seconds
        } else {
            self.play_prime_seconds
        };
        (f64::from(sample_rate) * seconds) as usize
    }

    pub const fn prime_timeout(&self) -> Duration {
        Duration::from_millis(self.prime_timeout_ms)
    }

    pub const fn prime_poll(&self) -> Duration {
        Duration::from_millis(self.prime_poll_ms)
    }

    pub const fn command_poll(&self) -> Duration {
        Duration::from_millis(self.command_poll_ms)
    }

    pub const fn decode_idle(&self) -> Duration {
        Duration::from_millis(self.decode_idle_ms)
    }

    pub const fn decode_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.decode_idle_timeout_ms)
    }
}

/// Output device configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Device period for hosts that let the caller choose it. The cpal
    /// backend queues two periods.
    pub buffer_ms: u32,
    /// Ask the device for 32-bit float before falling back to its mix format.
    pub prefer_float: bool,
    /// Bound on a single readiness wait on the render thread.
    pub wait_timeout_ms: u64,
    pub render_thread_name: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            buffer_ms: 20,
            prefer_float: true,
            wait_timeout_ms: 200,
            render_thread_name: "cadenza-render".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn validate(&self) -> Result<()> {
        if self.buffer_ms == 0 {
            return Err(Error::InvalidArgument("buffer_ms must be non-zero".into()));
        }
        if self.wait_timeout_ms == 0 {
            return Err(Error::InvalidArgument(
                "wait_timeout_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    /// Device buffer size in frames at `sample_rate`.
    pub fn buffer_frames(&self, sample_rate: u32) -> u32 {
        ((u64::from(sample_rate) * u64::from(self.buffer_ms)) / 1000).max(1) as u32
    }
}
