//! Capability traits for a shared-mode, event-driven output device.
//!
//! The render adapter talks to the platform only through these traits, so
//! tests can drive it with fakes and the cpal backend can emulate the model.

use super::format::MixFormat;
use super::signal::ReadySignal;
use cadenza_core::{OutputConfig, Result};

/// Device buffer handed out by [`RenderApi::get_buffer`], typed by the
/// negotiated sample format.
#[derive(Debug)]
pub enum DeviceBuffer<'a> {
    F32(&'a mut [f32]),
    I16(&'a mut [i16]),
    /// Layout the render path does not write; released silent.
    Raw(&'a mut [u8]),
}

/// Flags passed back with a released buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseFlags {
    /// The buffer holds rendered audio.
    None,
    /// Treat the buffer as silence regardless of its contents.
    Silent,
}

/// Per-cycle render calls, owned by the render thread.
pub trait RenderApi: Send {
    /// Frames queued on the device and not yet played.
    fn current_padding(&mut self) -> Result<u32>;

    /// Acquire `frames` frames of device buffer. `Ok(None)` is a null buffer.
    fn get_buffer(&mut self, frames: u32) -> Result<Option<DeviceBuffer<'_>>>;

    /// Hand `frames` frames back to the device.
    fn release_buffer(&mut self, frames: u32, flags: ReleaseFlags) -> Result<()>;

    /// Called on the render thread before the first cycle. Backends can
    /// raise thread priority here.
    fn enter_render_thread(&mut self) {}

    /// Called on the render thread after the last cycle.
    fn leave_render_thread(&mut self) {}
}

/// Activated audio client. Lives on the thread that created it.
pub trait AudioClient {
    /// The device's shared-mode mix format.
    fn mix_format(&mut self) -> Result<MixFormat>;

    /// Whether the device accepts `format` in shared mode without conversion.
    fn is_format_supported(&mut self, format: &MixFormat) -> bool;

    /// Initialize in event-driven shared mode. The device must call
    /// `ready.notify()` whenever it can accept more frames.
    fn initialize(&mut self, format: &MixFormat, ready: ReadySignal) -> Result<()>;

    /// Total device buffer size in frames.
    fn buffer_frames(&mut self) -> Result<u32>;

    /// Obtain the render service. Called once per initialization.
    fn render_api(&mut self) -> Result<Box<dyn RenderApi>>;

    fn start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    /// Discard queued frames. Only valid while stopped.
    fn reset(&mut self) -> Result<()>;

    /// Human readable device name for logs.
    fn name(&self) -> String {
        "unknown".to_string()
    }
}

/// Entry point to a platform audio subsystem.
pub trait AudioHost: Send {
    /// Activate the default output endpoint.
    fn default_output(&mut self, config: &OutputConfig) -> Result<Box<dyn AudioClient>>;
}
