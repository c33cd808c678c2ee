//! The render cycle: padding, acquire, fill, release.
//!
//! Everything here runs on the render thread and must not allocate, lock or
//! log.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use super::device::{DeviceBuffer, ReleaseFlags, RenderApi};
use super::format::{convert_f32_to_i16, SampleFormat};
use super::signal::{RenderSignal, Wake};
use crate::buffer::{RingBuffer, SharedRingBuffer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Raw fill callback: receives an interleaved buffer and the channel count,
/// returns `false` to decline (the cycle is then released silent).
pub type FillCallback = Box<dyn FnMut(&mut [f32], usize) -> bool + Send>;

/// Where the render thread pulls frames from.
#[derive(Default)]
pub enum FillSource {
    #[default]
    None,
    Ring(SharedRingBuffer),
    Callback(FillCallback),
}

impl FillSource {
    pub const fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

impl std::fmt::Debug for FillSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Ring(ring) => write!(f, "Ring({} frames)", ring.capacity()),
            Self::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Counters written by the render thread, read by anyone.
#[derive(Debug, Default)]
pub struct RenderCounters {
    underrun_wakes: AtomicU64,
    underrun_frames: AtomicU64,
    rendered_frames: AtomicU64,
}

impl RenderCounters {
    /// Cycles that had to zero-fill part of the device buffer.
    pub fn underrun_wakes(&self) -> u64 {
        self.underrun_wakes.load(Ordering::Relaxed)
    }

    /// Frames zero-filled because the transport ran short.
    pub fn underrun_frames(&self) -> u64 {
        self.underrun_frames.load(Ordering::Relaxed)
    }

    /// Frames of real audio delivered to the device.
    pub fn rendered_frames(&self) -> u64 {
        self.rendered_frames.load(Ordering::Acquire)
    }

    pub fn reset_rendered_frames(&self) {
        self.rendered_frames.store(0, Ordering::Release);
    }

    fn record_underrun(&self, missing: usize) {
        self.underrun_wakes.fetch_add(1, Ordering::Relaxed);
        self.underrun_frames
            .fetch_add(missing as u64, Ordering::Relaxed);
    }
}

/// Fixed per-initialization layout of the device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderLayout {
    pub buffer_frames: u32,
    pub channels: usize,
    pub format: SampleFormat,
}

/// What a single cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    PaddingFailed,
    /// Padding covered the whole buffer; nothing acquired.
    DeviceFull,
    /// Acquire failed or returned a null buffer; nothing released.
    AcquireFailed,
    Rendered {
        frames: u32,
        produced: usize,
        silent: bool,
    },
}

/// Read up to `dst.len() / channels` frames from `ring`, zero-filling the
/// shortfall. Returns the frames actually read.
pub fn consume_ring(
    ring: Option<&RingBuffer>,
    dst: &mut [f32],
    channels: usize,
    counters: &RenderCounters,
) -> usize {
    if channels == 0 {
        return 0;
    }
    let requested = dst.len() / channels;
    if requested == 0 {
        return 0;
    }

    let read = ring.map_or(0, |ring| ring.read(dst));
    if read < requested {
        dst[read * channels..requested * channels].fill(0.0);
        counters.record_underrun(requested - read);
    }
    read
}

fn fill_float(
    source: &mut FillSource,
    out: &mut [f32],
    channels: usize,
    counters: &RenderCounters,
) -> usize {
    match source {
        FillSource::Ring(ring) => consume_ring(Some(ring.as_ref()), out, channels, counters),
        FillSource::Callback(callback) => {
            if callback(out, channels) {
                out.len() / channels
            } else {
                0
            }
        }
        FillSource::None => 0,
    }
}

fn fill_device(
    buffer: DeviceBuffer<'_>,
    frames: u32,
    source: &mut FillSource,
    layout: &RenderLayout,
    scratch: &mut [f32],
    counters: &RenderCounters,
) -> usize {
    let samples = frames as usize * layout.channels;
    if source.is_none() || layout.channels == 0 {
        return 0;
    }

    match (layout.format, buffer) {
        (SampleFormat::Float32, DeviceBuffer::F32(out)) if out.len() >= samples => {
            fill_float(source, &mut out[..samples], layout.channels, counters)
        }
        (SampleFormat::Pcm16, DeviceBuffer::I16(out))
            if out.len() >= samples && scratch.len() >= samples =>
        {
            let staged = &mut scratch[..samples];
            let produced = fill_float(source, staged, layout.channels, counters);
            if produced > 0 {
                convert_f32_to_i16(staged, &mut out[..samples]);
            }
            produced
        }
        _ => 0,
    }
}

/// Run one render cycle. Releases exactly once after a successful acquire.
pub fn render_cycle(
    api: &mut dyn RenderApi,
    source: &mut FillSource,
    layout: &RenderLayout,
    scratch: &mut [f32],
    counters: &RenderCounters,
) -> CycleOutcome {
    let Ok(padding) = api.current_padding() else {
        return CycleOutcome::PaddingFailed;
    };
    if padding >= layout.buffer_frames {
        return CycleOutcome::DeviceFull;
    }
    let frames = layout.buffer_frames - padding;

    let produced = match api.get_buffer(frames) {
        Ok(Some(buffer)) => fill_device(buffer, frames, source, layout, scratch, counters),
        Ok(None) | Err(_) => return CycleOutcome::AcquireFailed,
    };

    let silent = produced == 0;
    let flags = if silent {
        ReleaseFlags::Silent
    } else {
        ReleaseFlags::None
    };
    // A failed release leaves nothing to undo on this side.
    let _ = api.release_buffer(frames, flags);
    counters
        .rendered_frames
        .fetch_add(produced as u64, Ordering::AcqRel);

    CycleOutcome::Rendered {
        frames,
        produced,
        silent,
    }
}

/// State moved onto the render thread for one run and handed back on join.
pub(crate) struct RenderContext {
    pub api: Box<dyn RenderApi>,
    pub source: FillSource,
    pub scratch: Vec<f32>,
    pub layout: RenderLayout,
}

/// Render thread body: one cycle per readiness notification until stop.
pub(crate) fn render_loop(
    mut ctx: RenderContext,
    signal: &RenderSignal,
    counters: &RenderCounters,
    wait_timeout: Duration,
) -> RenderContext {
    ctx.api.enter_render_thread();
    loop {
        match signal.wait(wait_timeout) {
            Wake::Stop => break,
            Wake::Timeout => {}
            Wake::Ready => {
                render_cycle(
                    ctx.api.as_mut(),
                    &mut ctx.source,
                    &ctx.layout,
                    &mut ctx.scratch,
                    counters,
                );
            }
        }
    }
    ctx.api.leave_render_thread();
    ctx
}
