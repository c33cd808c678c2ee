//! Commands accepted by the playback engine and events it emits.

use cadenza_core::PlayerState;

/// Commands to control the playback engine, applied strictly in order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Start output from the current position.
    Play,
    /// Stop output, keeping buffered audio.
    Pause,
    /// Restart output after a pause with a short priming threshold.
    Resume,
    /// Stop output and discard buffered audio.
    Stop,
    /// Move to a position in seconds.
    Seek(f64),
    /// Restart from the beginning.
    Replay,
    /// Shut the engine down.
    Quit,
}

/// Events emitted by the playback engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Playback state changed.
    StateChanged(PlayerState),
    /// A command failed.
    Error(String),
}
