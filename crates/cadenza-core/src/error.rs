//! Error types for Cadenza.

use thiserror::Error;

/// Result type alias using Cadenza's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Cadenza.
///
/// Conditions raised on the render or decode hot paths (`Underrun`,
/// `Overrun`, `InvariantViolation`) are counted where they happen and are
/// never returned across the real-time boundary. The engine thread reports
/// them from the counters.
#[derive(Error, Debug)]
pub enum Error {
    // Device errors
    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Output initialization failed: {0}")]
    Initialization(String),

    #[error("Output start failed: {0}")]
    Start(String),

    #[error("Unsupported mix format: {0}")]
    UnsupportedFormat(String),

    // Transport conditions
    #[error("Ring buffer underrun")]
    Underrun,

    #[error("Ring buffer overrun")]
    Overrun,

    #[error("Ring buffer position invariant violated: write={write} read={read} capacity={capacity}")]
    InvariantViolation { write: u64, read: u64, capacity: u64 },

    // Engine errors
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Playback engine unavailable")]
    EngineUnavailable,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Returns true if the condition is recovered on the hot path and does
    /// not stop playback.
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Underrun | Self::Overrun | Self::UnsupportedFormat(_)
        )
    }

    /// Returns true if this error came from the output device.
    pub const fn is_device_error(&self) -> bool {
        matches!(
            self,
            Self::Device(_) | Self::Initialization(_) | Self::Start(_)
        )
    }
}
