//! Frame producers driven by the decode thread.
//!
//! A source renders frames at an absolute position so that a seek only has
//! to move the cursor. Real decoders plug in through the same trait.

use std::f64::consts::TAU;
use std::time::Duration;

/// Producer of interleaved `f32` frames.
pub trait FrameSource: Send {
    /// Render frames starting at absolute frame `start` into `out`, whose
    /// length is a whole number of `channels`-sample frames.
    ///
    /// Returns the number of frames rendered. Fewer than requested means the
    /// source ends inside this chunk; zero means the cursor is past the end.
    fn render(&mut self, out: &mut [f32], start: u64, channels: usize, sample_rate: u32) -> usize;

    /// Total length, if known.
    fn duration(&self) -> Option<Duration> {
        None
    }
}

/// Endless or bounded silence.
#[derive(Debug, Clone, Copy, Default)]
pub struct Silence {
    pub duration: Option<Duration>,
}

impl Silence {
    pub const fn endless() -> Self {
        Self { duration: None }
    }
}

impl FrameSource for Silence {
    fn render(&mut self, out: &mut [f32], start: u64, channels: usize, sample_rate: u32) -> usize {
        let frames = frames_remaining(out.len() / channels.max(1), start, self.duration, sample_rate);
        out[..frames * channels].fill(0.0);
        frames
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

/// Sine tone written identically to every channel.
#[derive(Debug, Clone, Copy)]
pub struct Tone {
    pub frequency: f64,
    pub amplitude: f32,
    pub duration: Option<Duration>,
}

impl Tone {
    pub const fn new(frequency: f64, amplitude: f32, duration: Option<Duration>) -> Self {
        Self {
            frequency,
            amplitude,
            duration,
        }
    }
}

impl Default for Tone {
    fn default() -> Self {
        Self::new(440.0, 0.2, None)
    }
}

impl FrameSource for Tone {
    #[allow(clippy::cast_precision_loss)]
    fn render(&mut self, out: &mut [f32], start: u64, channels: usize, sample_rate: u32) -> usize {
        if channels == 0 || sample_rate == 0 {
            return 0;
        }
        let frames = frames_remaining(out.len() / channels, start, self.duration, sample_rate);
        let step = TAU * self.frequency / f64::from(sample_rate);
        for (i, frame) in out[..frames * channels].chunks_exact_mut(channels).enumerate() {
            // Phase from the absolute position keeps seeks click-consistent.
            let phase = ((start + i as u64) as f64 * step) % TAU;
            frame.fill(phase.sin() as f32 * self.amplitude);
        }
        frames
    }

    fn duration(&self) -> Option<Duration> {
        self.duration
    }
}

fn frames_remaining(requested: usize, start: u64, duration: Option<Duration>, sample_rate: u32) -> usize {
    let Some(duration) = duration else {
        return requested;
    };
    let total = (duration.as_secs_f64() * f64::from(sample_rate)).round() as u64;
    total.saturating_sub(start).min(requested as u64) as usize
}

/// Silence that blocks inside one render call when armed, filling that chunk
/// with [`StallGate::MARKER`].
#[cfg(test)]
pub(crate) struct Stalling {
    pub(crate) gate: std::sync::Arc<StallGate>,
    pub(crate) delay: Duration,
}

#[cfg(test)]
#[derive(Default)]
pub(crate) struct StallGate {
    pub(crate) armed: std::sync::atomic::AtomicBool,
    pub(crate) entered: std::sync::atomic::AtomicBool,
    pub(crate) left: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl StallGate {
    pub(crate) const MARKER: f32 = 9.0;
}

#[cfg(test)]
impl FrameSource for Stalling {
    fn render(&mut self, out: &mut [f32], _start: u64, channels: usize, _sample_rate: u32) -> usize {
        use std::sync::atomic::Ordering;

        if self.gate.armed.swap(false, Ordering::SeqCst) {
            self.gate.entered.store(true, Ordering::SeqCst);
            std::thread::sleep(self.delay);
            out.fill(StallGate::MARKER);
            self.gate.left.store(true, Ordering::SeqCst);
        } else {
            out.fill(0.0);
        }
        out.len() / channels.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endless_silence() {
        let mut source = Silence::endless();
        let mut out = [1.0f32; 8];
        assert_eq!(source.render(&mut out, 1_000_000, 2, 48_000), 4);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_bounded_source_ends() {
        let mut source = Silence {
            duration: Some(Duration::from_millis(1)),
        };
        let mut out = [1.0f32; 64];
        // 48 frames in one millisecond.
        assert_eq!(source.render(&mut out, 40, 2, 48_000), 8);
        assert_eq!(source.render(&mut out, 48, 2, 48_000), 0);
        assert_eq!(out[16], 1.0);
    }

    #[test]
    fn test_tone_is_position_deterministic() {
        let mut source = Tone::new(1000.0, 0.5, None);
        let mut whole = vec![0.0f32; 64 * 2];
        source.render(&mut whole, 0, 2, 48_000);

        let mut tail = vec![0.0f32; 32 * 2];
        source.render(&mut tail, 32, 2, 48_000);
        for (a, b) in whole[64..].iter().zip(&tail) {
            assert!((a - b).abs() < 1e-6);
        }
        assert!(whole.chunks_exact(2).all(|f| (f[0] - f[1]).abs() < f32::EPSILON));
        assert!(whole.iter().all(|s| s.abs() <= 0.5));
        assert!(whole.iter().any(|s| s.abs() > 0.25));
    }

    #[test]
    fn test_tone_without_rate_renders_nothing() {
        let mut source = Tone::default();
        let mut out = [0.0f32; 4];
        assert_eq!(source.render(&mut out, 0, 2, 0), 0);
        assert_eq!(source.duration(), None);
    }
}
