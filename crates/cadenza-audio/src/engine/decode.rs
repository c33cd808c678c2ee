//! Decode thread: the single producer of the ring transport.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use super::source::FrameSource;
use super::Shared;
use cadenza_core::DecodeMode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Frames rendered by the source but not yet accepted by the transport.
#[derive(Default)]
struct Staged {
    samples: Vec<f32>,
    /// First pending frame.
    start: usize,
    /// Pending frame count.
    frames: usize,
}

impl Staged {
    fn pending(&self, channels: usize) -> &[f32] {
        &self.samples[self.start * channels..(self.start + self.frames) * channels]
    }

    fn consume(&mut self, frames: usize) {
        self.start += frames;
        self.frames -= frames;
    }

    /// Forget pending frames, returning how many were dropped.
    fn discard(&mut self) -> usize {
        let dropped = self.frames;
        self.start = 0;
        self.frames = 0;
        dropped
    }
}

/// Owns the frame source and feeds the transport according to the control
/// block.
pub(crate) struct DecodeWorker {
    shared: Arc<Shared>,
    source: Box<dyn FrameSource>,
    chunk_frames: usize,
    idle_wait: Duration,
    staged: Staged,
    cursor: u64,
    epoch: u64,
    end_of_stream: bool,
}

impl DecodeWorker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        source: Box<dyn FrameSource>,
        chunk_frames: usize,
        idle_wait: Duration,
    ) -> Self {
        let epoch = shared.control.epoch();
        Self {
            shared,
            source,
            chunk_frames: chunk_frames.max(1),
            idle_wait,
            staged: Staged::default(),
            cursor: 0,
            epoch,
            end_of_stream: false,
        }
    }

    pub(crate) fn run(mut self) {
        debug!("Decode thread started");
        let shared = Arc::clone(&self.shared);
        let control = &shared.control;

        loop {
            // Sequence before mode: an idle report never acknowledges a mode
            // this loop has not seen.
            let seq = control.mode_seq();
            let mode = control.mode();
            if mode == DecodeMode::Quit {
                control.publish_idle(seq);
                break;
            }

            let epoch = control.epoch();
            if epoch != self.epoch {
                self.resync(epoch);
            }

            let ring = match shared.ring() {
                Some(ring) if !mode.is_idle() && !self.end_of_stream => ring,
                _ => {
                    control.publish_idle(seq);
                    control.park(seq, epoch, self.idle_wait);
                    continue;
                }
            };

            control.publish_busy();
            let channels = ring.channels();

            if self.staged.frames == 0 && !self.render_chunk(channels) {
                continue;
            }

            // A render can outlast a publication. Staged frames only reach the
            // transport under the mode and epoch they were rendered for; a new
            // epoch drops them in `resync`.
            if control.mode_seq() != seq || control.epoch() != epoch {
                continue;
            }

            if ring.available_to_write() == 0 {
                control.park(seq, epoch, self.idle_wait);
                continue;
            }

            let written = ring.write(self.staged.pending(channels));
            self.staged.consume(written);
            self.cursor += written as u64;
            shared
                .produced_frames
                .fetch_add(written as u64, Ordering::AcqRel);
            shared
                .decode_cursor
                .store(self.cursor as i64, Ordering::Release);
        }

        debug!("Decode thread exiting");
    }

    /// Adopt a new epoch: move the cursor to the published target and drop
    /// anything staged for the old one.
    fn resync(&mut self, epoch: u64) {
        self.epoch = epoch;
        let target = self.shared.control.target();
        self.cursor = target.max(0) as u64;

        let dropped = self.staged.discard();
        if dropped > 0 {
            self.shared
                .dropped_frames
                .fetch_add(dropped as u64, Ordering::AcqRel);
        }
        self.end_of_stream = false;
        self.shared.end_of_stream.store(false, Ordering::Release);
        self.shared
            .decode_cursor
            .store(self.cursor as i64, Ordering::Release);
        trace!("Decode epoch {epoch}: cursor {}, dropped {dropped}", self.cursor);
    }

    /// Render the next chunk into the staging buffer. Returns false at the
    /// end of the stream.
    fn render_chunk(&mut self, channels: usize) -> bool {
        let sample_rate = self.shared.sample_rate.load(Ordering::Acquire);
        self.staged.samples.resize(self.chunk_frames * channels, 0.0);

        let frames = self
            .source
            .render(&mut self.staged.samples, self.cursor, channels, sample_rate)
            .min(self.chunk_frames);
        if frames == 0 {
            info!("Frame source ended at frame {}", self.cursor);
            self.end_of_stream = true;
            self.shared.end_of_stream.store(true, Ordering::Release);
            return false;
        }

        self.staged.start = 0;
        self.staged.frames = frames;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::shared_ring_buffer;
    use crate::engine::source::{Silence, StallGate, Stalling, Tone};
    use crate::output::fake::wait_for;

    fn spawn(
        source: Box<dyn FrameSource>,
        capacity: usize,
        chunk: usize,
    ) -> (Arc<Shared>, std::thread::JoinHandle<()>) {
        let shared = Arc::new(Shared::new());
        shared.sample_rate.store(48_000, Ordering::Release);
        assert!(shared.ring.set(shared_ring_buffer(capacity, 2)).is_ok());
        let worker = DecodeWorker::new(
            Arc::clone(&shared),
            source,
            chunk,
            Duration::from_millis(2),
        );
        let handle = std::thread::spawn(move || worker.run());
        (shared, handle)
    }

    fn quit(shared: &Shared, handle: std::thread::JoinHandle<()>) {
        shared.control.set_mode(DecodeMode::Quit);
        handle.join().unwrap();
    }

    #[test]
    fn test_idle_until_running() {
        let (shared, handle) = spawn(Box::new(Silence::endless()), 1000, 256);
        let seq = shared.control.mode_seq();
        assert!(shared.control.wait_idle(seq, Duration::from_secs(2)));
        assert_eq!(shared.produced_frames.load(Ordering::Acquire), 0);
        quit(&shared, handle);
    }

    #[test]
    fn test_fills_transport_then_blocks() {
        let (shared, handle) = spawn(Box::new(Silence::endless()), 1000, 256);
        shared.control.set_mode(DecodeMode::Running);

        let ring = Arc::clone(shared.ring().unwrap());
        assert!(wait_for(|| ring.available_to_write() == 0));
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(shared.produced_frames.load(Ordering::Acquire), 1000);
        assert_eq!(shared.decode_cursor.load(Ordering::Acquire), 1000);
        // 256 * 3 + 232: only the last write came up short.
        assert_eq!(ring.overrun_count(), 1);

        // Draining lets the staged remainder through.
        let mut out = vec![0.0f32; 100 * 2];
        ring.read(&mut out);
        assert!(wait_for(
            || shared.produced_frames.load(Ordering::Acquire) == 1100
        ));
        quit(&shared, handle);
    }

    #[test]
    fn test_new_epoch_moves_cursor_and_drops_staged() {
        let (shared, handle) = spawn(Box::new(Tone::default()), 1000, 256);
        let control = &shared.control;
        control.set_mode(DecodeMode::Running);
        let ring = Arc::clone(shared.ring().unwrap());
        assert!(wait_for(|| ring.available_to_write() == 0));

        let seq = control.set_mode(DecodeMode::Paused);
        assert!(control.wait_idle(seq, Duration::from_secs(2)));
        ring.reset();
        control.begin_epoch(Some(48_000));
        control.set_mode(DecodeMode::Running);

        assert!(wait_for(|| ring.available_to_write() == 0));
        assert!(wait_for(
            || shared.decode_cursor.load(Ordering::Acquire) == 49_000
        ));
        assert_eq!(shared.dropped_frames.load(Ordering::Acquire), 24);
        quit(&shared, handle);
    }

    #[test]
    #[allow(clippy::float_cmp)]
    fn test_chunk_rendered_across_an_epoch_change_is_dropped() {
        let gate = Arc::new(StallGate::default());
        gate.armed.store(true, Ordering::SeqCst);
        let source = Stalling {
            gate: Arc::clone(&gate),
            delay: Duration::from_millis(100),
        };
        let (shared, handle) = spawn(Box::new(source), 4096, 256);
        let control = &shared.control;
        control.set_mode(DecodeMode::Running);
        assert!(wait_for(|| gate.entered.load(Ordering::SeqCst)));

        // Published while the chunk is still rendering.
        control.begin_epoch(Some(0));
        assert!(wait_for(|| gate.left.load(Ordering::SeqCst)));

        let ring = Arc::clone(shared.ring().unwrap());
        assert!(wait_for(|| ring.available_to_write() == 0));
        assert!(wait_for(
            || shared.produced_frames.load(Ordering::Acquire) == 4096
        ));
        assert_eq!(shared.dropped_frames.load(Ordering::Acquire), 256);

        let mut out = vec![0.0f32; 4096 * 2];
        assert_eq!(ring.read(&mut out), 4096);
        assert!(out.iter().all(|&s| s != StallGate::MARKER));
        quit(&shared, handle);
    }

    #[test]
    fn test_chunk_rendered_across_a_pause_waits() {
        let gate = Arc::new(StallGate::default());
        gate.armed.store(true, Ordering::SeqCst);
        let source = Stalling {
            gate: Arc::clone(&gate),
            delay: Duration::from_millis(100),
        };
        let (shared, handle) = spawn(Box::new(source), 4096, 256);
        let control = &shared.control;
        control.set_mode(DecodeMode::Running);
        assert!(wait_for(|| gate.entered.load(Ordering::SeqCst)));

        let seq = control.set_mode(DecodeMode::Paused);
        assert!(control.wait_idle(seq, Duration::from_secs(2)));
        assert!(gate.left.load(Ordering::SeqCst));
        assert_eq!(shared.ring().unwrap().available_to_read(), 0);
        assert_eq!(shared.produced_frames.load(Ordering::Acquire), 0);
        // Same epoch: the chunk is kept for the next run.
        assert_eq!(shared.dropped_frames.load(Ordering::Acquire), 0);
        quit(&shared, handle);
    }

    #[test]
    fn test_end_of_stream_goes_idle() {
        let source = Silence {
            duration: Some(Duration::from_millis(10)),
        };
        let (shared, handle) = spawn(Box::new(source), 4096, 256);
        let seq = shared.control.set_mode(DecodeMode::Running);

        assert!(wait_for(|| shared.end_of_stream.load(Ordering::Acquire)));
        assert!(shared.control.wait_idle(seq, Duration::from_secs(2)));
        assert_eq!(shared.produced_frames.load(Ordering::Acquire), 480);
        assert_eq!(shared.ring().unwrap().available_to_read(), 480);

        // A new epoch clears the end-of-stream flag and starts over.
        shared.ring().unwrap().reset();
        shared.control.begin_epoch(Some(0));
        assert!(wait_for(
            || shared.produced_frames.load(Ordering::Acquire) == 960
        ));
        quit(&shared, handle);
    }

    #[test]
    fn test_quit_leaves_idle() {
        let (shared, handle) = spawn(Box::new(Silence::endless()), 1000, 256);
        shared.control.set_mode(DecodeMode::Running);
        assert!(wait_for(|| !shared.control.is_idle()));
        shared.control.set_mode(DecodeMode::Quit);
        handle.join().unwrap();
        assert!(shared.control.is_idle());
    }
}
