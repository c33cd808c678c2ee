//! Shared value types: player states, decode modes, and the status snapshot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Externally visible state of the playback engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PlayerState {
    /// Engine constructed, nothing played yet.
    #[default]
    Idle,
    Stopped,
    /// Output is being primed and started.
    Starting,
    Playing,
    Paused,
    Seeking,
    Stopping,
    /// The frame source ran out and the transport drained.
    Finished,
    /// A command failed; see `PlaybackStatus::last_error`.
    Error,
}

impl PlayerState {
    /// States in which a Play command starts output.
    pub const fn can_start(self) -> bool {
        !matches!(self, Self::Playing | Self::Starting)
    }
}

impl fmt::Display for PlayerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Seeking => "seeking",
            Self::Stopping => "stopping",
            Self::Finished => "finished",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Mode published by the engine to the decode thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum DecodeMode {
    #[default]
    Stopped = 0,
    Running = 1,
    Paused = 2,
    Quit = 3,
}

impl DecodeMode {
    /// Raw value stored in the control atomic.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Decode a value loaded from the control atomic. Unknown values map to
    /// `Stopped`.
    pub const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Quit,
            _ => Self::Stopped,
        }
    }

    /// Modes in which the decode thread produces no frames.
    pub const fn is_idle(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Read-only snapshot of engine state and counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PlaybackStatus {
    pub state: PlayerState,
    /// Seconds of audio delivered to the device, plus the last seek offset.
    pub position_seconds: f64,
    /// Seconds of audio waiting in the transport.
    pub buffered_seconds: f64,
    /// Short reads on the transport.
    pub underrun_count: u64,
    /// Short writes on the transport.
    pub overrun_count: u64,
    /// Render cycles that had to zero-fill.
    pub underrun_wakes: u64,
    /// Frames zero-filled by the render thread.
    pub underrun_frames: u64,
    /// Frames the decode thread produced but could not write.
    pub dropped_frames: u64,
    pub decode_epoch: u64,
    pub decode_mode: DecodeMode,
    pub seek_target_frame: i64,
    /// Next frame the decode thread will produce.
    pub decoded_frame_cursor: i64,
    pub produced_frames_total: u64,
    /// Negotiated device rate, 0 before the output is initialized.
    pub sample_rate: u32,
    pub channels: u16,
    pub last_error: Option<String>,
}
