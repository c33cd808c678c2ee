//! # cadenza-audio
//!
//! Real-time playback core for Cadenza.
//!
//! Features:
//! - Lock-free SPSC ring transport for decode→render communication
//! - Event-driven render adapter with float/PCM16 negotiation
//! - cpal-backed output host
//! - Command-driven playback engine with epoch-based seek cancellation

pub mod buffer;
pub mod engine;
pub mod output;

pub use buffer::{shared_ring_buffer, RingBuffer, SharedRingBuffer};
pub use engine::{Command, EngineEvent, FrameSource, PlayerEngine, Silence, Tone};
pub use output::{CpalHost, RenderAdapter};
