//! Output path: device capabilities, format negotiation and the render thread.

pub mod adapter;
pub mod cpal_host;
pub mod device;
pub mod format;
pub mod render;
pub mod signal;

#[cfg(test)]
pub(crate) mod fake;

pub use adapter::{AdapterState, RenderAdapter};
pub use cpal_host::CpalHost;
pub use device::{AudioClient, AudioHost, DeviceBuffer, ReleaseFlags, RenderApi};
pub use format::{convert_f32_to_i16, detect_sample_format, MixFormat, SampleFormat};
pub use render::{FillCallback, FillSource, RenderCounters};
pub use signal::ReadySignal;
