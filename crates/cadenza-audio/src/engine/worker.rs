//! Engine thread: applies commands and owns the render adapter.

use super::command::{Command, EngineEvent};
use super::Shared;
use crate::buffer::{shared_ring_buffer, RingBuffer, SharedRingBuffer};
use crate::output::{AudioHost, RenderAdapter};
use cadenza_core::{DecodeMode, EngineConfig, Error, PlayerState, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::ops::ControlFlow;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Transport counters already reported by the bookkeeping pass.
#[derive(Debug, Default)]
struct TransportWatch {
    underruns: u64,
    overruns: u64,
    violations: u64,
}

impl TransportWatch {
    /// Conditions recorded on `ring` since the last poll.
    fn poll(&mut self, ring: &RingBuffer) -> Vec<Error> {
        let mut conditions = Vec::new();

        let violations = ring.invariant_violation_count();
        if violations > self.violations {
            let (write, read) = ring.positions();
            conditions.push(Error::InvariantViolation {
                write,
                read,
                capacity: ring.capacity() as u64,
            });
        }
        let overruns = ring.overrun_count();
        if overruns > self.overruns {
            conditions.push(Error::Overrun);
        }
        let underruns = ring.underrun_count();
        if underruns > self.underruns {
            conditions.push(Error::Underrun);
        }

        *self = Self {
            underruns,
            overruns,
            violations,
        };
        conditions
    }
}

pub(crate) struct EngineWorker {
    shared: Arc<Shared>,
    config: EngineConfig,
    command_rx: Receiver<Command>,
    event_tx: Sender<EngineEvent>,
    output: RenderAdapter,
    watch: TransportWatch,
}

impl EngineWorker {
    pub(crate) fn new(
        shared: Arc<Shared>,
        config: EngineConfig,
        host: Box<dyn AudioHost>,
        command_rx: Receiver<Command>,
        event_tx: Sender<EngineEvent>,
    ) -> Self {
        let output = RenderAdapter::with_counters(
            host,
            config.output.clone(),
            Arc::clone(&shared.counters),
        );
        Self {
            shared,
            config,
            command_rx,
            event_tx,
            output,
            watch: TransportWatch::default(),
        }
    }

    pub(crate) fn run(mut self) {
        info!("Playback engine started");

        loop {
            match self.command_rx.recv_timeout(self.config.command_poll()) {
                Ok(command) => {
                    if self.handle_command(command).is_break() {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Command channel closed, shutting down");
                    self.quit();
                    break;
                }
            }
            self.update_bookkeeping();
        }

        info!("Playback engine stopped");
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        debug!("Command: {command:?}");
        match command {
            Command::Play => match self.state() {
                PlayerState::Finished => self.restart_from_zero(),
                state if state.can_start() => self.start_playback(false),
                _ => debug!("Already playing"),
            },
            Command::Pause => self.commit_paused(),
            Command::Resume => {
                if self.state().can_start() {
                    self.start_playback(true);
                } else {
                    debug!("Resume ignored while playing");
                }
            }
            Command::Stop => self.stop(),
            Command::Seek(seconds) => self.seek(seconds),
            Command::Replay => self.restart_from_zero(),
            Command::Quit => {
                self.quit();
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn stop(&mut self) {
        self.set_state(PlayerState::Stopping);
        self.stop_output_and_reset_clock();
        self.shared.render_offset.store(0, Ordering::Release);
        if let Err(e) = self.wait_decode_idle(DecodeMode::Stopped) {
            self.fail(e);
            return;
        }
        self.reset_buffering();
        self.begin_epoch(None);
        self.set_state(PlayerState::Stopped);
    }

    fn seek(&mut self, seconds: f64) {
        let prior = self.state();
        self.set_state(PlayerState::Seeking);

        // The target is expressed in device frames.
        if let Err(e) = self.ensure_output() {
            self.fail(e);
            return;
        }

        let seconds = if seconds.is_finite() { seconds.max(0.0) } else { 0.0 };
        let rate = self.shared.sample_rate.load(Ordering::Acquire);
        let target = (seconds * f64::from(rate)).round() as i64;
        info!("Seeking to {seconds:.3}s (frame {target})");

        self.stop_output_and_reset_clock();
        self.shared.render_offset.store(target, Ordering::Release);
        if let Err(e) = self.wait_decode_idle(DecodeMode::Paused) {
            self.fail(e);
            return;
        }
        self.reset_buffering();
        self.begin_epoch(Some(target));

        if prior == PlayerState::Paused {
            self.commit_paused();
        } else {
            self.start_playback(false);
        }
    }

    fn restart_from_zero(&mut self) {
        self.set_state(PlayerState::Starting);
        self.stop_output_and_reset_clock();
        self.shared.render_offset.store(0, Ordering::Release);
        if self.output.is_initialized() {
            if let Err(e) = self.wait_decode_idle(DecodeMode::Paused) {
                self.fail(e);
                return;
            }
            self.reset_buffering();
        }
        self.begin_epoch(Some(0));
        self.start_playback(false);
    }

    fn commit_paused(&mut self) {
        // Buffered audio is retained.
        self.output.stop();
        self.shared.control.set_mode(DecodeMode::Paused);
        self.set_state(PlayerState::Paused);
    }

    fn quit(&mut self) {
        info!("Playback engine shutting down");
        self.shared.control.set_mode(DecodeMode::Quit);
        self.shared.control.begin_epoch(None);
        self.output.shutdown();
        self.set_state(PlayerState::Stopped);
    }

    /// Open the output and bind the transport on first use.
    fn ensure_output(&mut self) -> Result<()> {
        if self.output.is_initialized() {
            return Ok(());
        }

        self.output.init()?;
        let rate = self.output.sample_rate();
        let channels = self.output.channels();
        if rate == 0 || channels == 0 {
            self.output.shutdown();
            return Err(Error::Initialization(format!(
                "invalid device format: {rate} Hz, {channels} channels"
            )));
        }

        let capacity = self.config.ring_capacity_frames(rate);
        let ring = Arc::clone(
            self.shared
                .ring
                .get_or_init(|| shared_ring_buffer(capacity, usize::from(channels))),
        );
        if ring.channels() != usize::from(channels) {
            self.output.shutdown();
            return Err(Error::UnsupportedFormat(format!(
                "device channel count changed from {} to {channels}",
                ring.channels()
            )));
        }
        debug!(
            "Transport: {} frames x {} channels",
            ring.capacity(),
            ring.channels()
        );

        self.shared.sample_rate.store(rate, Ordering::Release);
        self.shared.channels.store(channels, Ordering::Release);

        if let Err(e) = self.wait_decode_idle(DecodeMode::Paused) {
            self.output.shutdown();
            return Err(e);
        }
        self.reset_buffering();
        self.output.set_ring_buffer(ring)?;
        self.shared.render_offset.store(0, Ordering::Release);
        self.output.reset_rendered_frames();
        Ok(())
    }

    /// Enter Starting, prime the transport and start the output.
    fn start_playback(&mut self, resume: bool) {
        self.set_state(PlayerState::Starting);
        match self.try_start(resume) {
            Ok(()) => self.set_state(PlayerState::Playing),
            Err(e) => self.fail(e),
        }
    }

    fn try_start(&mut self, resume: bool) -> Result<()> {
        self.ensure_output()?;
        let ring = self
            .transport()
            .ok_or_else(|| Error::InvalidState("transport not created".into()))?;

        self.shared.control.set_mode(DecodeMode::Running);
        let rate = self.shared.sample_rate.load(Ordering::Acquire);
        let threshold = self.config.prime_frames(rate, resume).min(ring.capacity());
        self.prime(&ring, threshold, resume);
        self.output.start()
    }

    /// Wait until `threshold` frames are buffered, the source ends, or the
    /// priming timeout expires. With `allow_empty`, an empty transport starts
    /// at once.
    fn prime(&self, ring: &RingBuffer, threshold: usize, allow_empty: bool) {
        let deadline = Instant::now() + self.config.prime_timeout();
        loop {
            let available = ring.available_to_read();
            if available >= threshold || (allow_empty && available == 0) {
                return;
            }
            if self.shared.end_of_stream.load(Ordering::Acquire) {
                debug!("Source ended while priming ({available} frames buffered)");
                return;
            }
            if Instant::now() >= deadline {
                warn!("Priming timed out with {available}/{threshold} frames buffered, starting anyway");
                return;
            }
            std::thread::sleep(self.config.prime_poll());
        }
    }

    fn fail(&mut self, e: Error) {
        error!("Playback failed: {e}");
        self.shared.control.set_mode(DecodeMode::Paused);
        let message = e.to_string();
        *self.shared.last_error.lock() = Some(message.clone());
        let _ = self.event_tx.send(EngineEvent::Error(message));
        self.set_state(PlayerState::Error);
    }

    fn stop_output_and_reset_clock(&mut self) {
        self.output.stop();
        self.output.reset_rendered_frames();
    }

    /// Publish an idle `mode` and wait for the decode thread to acknowledge
    /// it, after which the engine may touch the producer side. On timeout the
    /// producer may still be live, so the transport must be left alone.
    fn wait_decode_idle(&self, mode: DecodeMode) -> Result<()> {
        let seq = self.shared.control.set_mode(mode);
        let timeout = self.config.decode_idle_timeout();
        if self.shared.control.wait_idle(seq, timeout) {
            Ok(())
        } else {
            Err(Error::InvalidState(format!(
                "decode thread did not go idle within {timeout:?}"
            )))
        }
    }

    /// Empty the transport. Both sides must be idle.
    fn reset_buffering(&mut self) {
        if let Some(ring) = self.transport() {
            ring.reset();
        }
        self.watch = TransportWatch::default();
        *self.shared.buffered_seconds.write() = 0.0;
    }

    /// Redirect the decode thread. The transport must already be reset.
    fn begin_epoch(&self, target: Option<i64>) {
        self.shared.end_of_stream.store(false, Ordering::Release);
        let epoch = self.shared.control.begin_epoch(target);
        debug!("Decode epoch {epoch}, target {target:?}");
    }

    fn update_bookkeeping(&mut self) {
        let Some(ring) = self.transport() else {
            return;
        };
        let rate = self.shared.sample_rate.load(Ordering::Acquire);
        let available = ring.available_to_read();
        let buffered = if rate > 0 {
            available as f64 / f64::from(rate)
        } else {
            0.0
        };
        *self.shared.buffered_seconds.write() = buffered;

        for condition in self.watch.poll(&ring) {
            if condition.is_recoverable() {
                debug!("Transport: {condition}");
            } else {
                error!("Transport: {condition}");
            }
        }

        if self.state() == PlayerState::Playing
            && available == 0
            && self.shared.end_of_stream.load(Ordering::Acquire)
        {
            info!("Playback finished");
            self.output.stop();
            self.shared.control.set_mode(DecodeMode::Paused);
            self.set_state(PlayerState::Finished);
        }
    }

    fn transport(&self) -> Option<SharedRingBuffer> {
        self.shared.ring().cloned()
    }

    fn state(&self) -> PlayerState {
        *self.shared.state.read()
    }

    fn set_state(&self, next: PlayerState) {
        let mut state = self.shared.state.write();
        if *state == next {
            return;
        }
        debug!("State: {} -> {next}", *state);
        *state = next;
        // Sent under the lock: anyone who reads the new state can also
        // receive its event.
        let _ = self.event_tx.send(EngineEvent::StateChanged(next));
    }
}
