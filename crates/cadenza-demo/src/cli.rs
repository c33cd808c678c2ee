//! Command-line options.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use clap::Parser;
use std::path::PathBuf;

/// Drive the Cadenza playback core against the default output device.
#[derive(Debug, Clone, Parser)]
#[command(name = "cadenza-demo", version, about)]
pub struct Options {
    /// Number of start/stop cycles
    #[arg(long, default_value_t = 3)]
    pub repeat: i64,

    /// Seconds per cycle
    #[arg(long, default_value_t = 2.0)]
    pub seconds: f64,

    /// Tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    pub frequency: f64,

    /// Run CPU load on every core during playback
    #[arg(long)]
    pub stress: bool,

    /// Exercise the playback engine command set instead of raw tone cycles
    #[arg(long)]
    pub engine_smoke: bool,

    /// JSON engine configuration
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl Options {
    /// Replace out-of-range values with usable ones.
    pub fn normalized(mut self) -> Self {
        self.repeat = self.repeat.max(1);
        if !(self.seconds.is_finite() && self.seconds > 0.0) {
            self.seconds = 0.5;
        }
        if !(self.frequency.is_finite() && self.frequency >= 1.0) {
            self.frequency = 440.0;
        }
        self
    }
}
