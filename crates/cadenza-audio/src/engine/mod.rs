//! Playback engine: command queue, state machine and decode coordination.
//!
//! Three threads cooperate:
//!
//! - the engine thread applies commands one at a time and owns the output,
//! - the decode thread fills the ring transport from a [`FrameSource`],
//! - the render thread drains the transport into the device.
//!
//! The engine steers the decode thread through [`DecodeControl`] only; the
//! transport itself is lock-free.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

mod command;
mod control;
mod decode;
mod source;
mod worker;

pub use command::{Command, EngineEvent};
pub use control::{DecodeControl, NO_TARGET};
pub use source::{FrameSource, Silence, Tone};

use crate::buffer::SharedRingBuffer;
use crate::output::{AudioHost, RenderCounters};
use cadenza_core::{DecodeMode, EngineConfig, Error, PlaybackStatus, PlayerState, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use decode::DecodeWorker;
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, error, info};
use worker::EngineWorker;

/// State shared between the engine handle and its threads.
pub(crate) struct Shared {
    pub(crate) control: DecodeControl,
    /// Created once, on the first successful output initialization.
    pub(crate) ring: OnceCell<SharedRingBuffer>,
    pub(crate) sample_rate: AtomicU32,
    pub(crate) channels: AtomicU16,
    pub(crate) state: RwLock<PlayerState>,
    pub(crate) buffered_seconds: RwLock<f64>,
    /// Frame position the render clock counts from.
    pub(crate) render_offset: AtomicI64,
    pub(crate) dropped_frames: AtomicU64,
    pub(crate) produced_frames: AtomicU64,
    pub(crate) decode_cursor: AtomicI64,
    pub(crate) end_of_stream: AtomicBool,
    pub(crate) last_error: Mutex<Option<String>>,
    pub(crate) counters: Arc<RenderCounters>,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            control: DecodeControl::new(),
            ring: OnceCell::new(),
            sample_rate: AtomicU32::new(0),
            channels: AtomicU16::new(0),
            state: RwLock::new(PlayerState::Idle),
            buffered_seconds: RwLock::new(0.0),
            render_offset: AtomicI64::new(0),
            dropped_frames: AtomicU64::new(0),
            produced_frames: AtomicU64::new(0),
            decode_cursor: AtomicI64::new(0),
            end_of_stream: AtomicBool::new(false),
            last_error: Mutex::new(None),
            counters: Arc::new(RenderCounters::default()),
        }
    }

    pub(crate) fn ring(&self) -> Option<&SharedRingBuffer> {
        self.ring.get()
    }

    /// Rendered frames plus the seek offset, in seconds.
    pub(crate) fn position_seconds(&self) -> f64 {
        let rate = self.sample_rate.load(Ordering::Acquire);
        if rate == 0 {
            return 0.0;
        }
        let frames = self.counters.rendered_frames() as i64
            + self.render_offset.load(Ordering::Acquire);
        frames.max(0) as f64 / f64::from(rate)
    }

    fn status(&self) -> PlaybackStatus {
        let ring = self.ring();
        PlaybackStatus {
            state: *self.state.read(),
            position_seconds: self.position_seconds(),
            buffered_seconds: *self.buffered_seconds.read(),
            underrun_count: ring.map_or(0, |r| r.underrun_count()),
            overrun_count: ring.map_or(0, |r| r.overrun_count()),
            underrun_wakes: self.counters.underrun_wakes(),
            underrun_frames: self.counters.underrun_frames(),
            dropped_frames: self.dropped_frames.load(Ordering::Acquire),
            decode_epoch: self.control.epoch(),
            decode_mode: self.control.mode(),
            seek_target_frame: self.control.target(),
            decoded_frame_cursor: self.decode_cursor.load(Ordering::Acquire),
            produced_frames_total: self.produced_frames.load(Ordering::Acquire),
            sample_rate: self.sample_rate.load(Ordering::Acquire),
            channels: self.channels.load(Ordering::Acquire),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// Handle to a running playback engine.
///
/// Commands are queued and applied in order on the engine thread; this
/// handle only reads snapshots.
pub struct PlayerEngine {
    shared: Arc<Shared>,
    command_tx: Sender<Command>,
    event_rx: Receiver<EngineEvent>,
    quit_sent: AtomicBool,
    engine_thread: Mutex<Option<JoinHandle<()>>>,
    decode_thread: Mutex<Option<JoinHandle<()>>>,
}

impl PlayerEngine {
    /// Spawn the engine and decode threads.
    ///
    /// The output device is opened lazily by the first command that needs
    /// it, on the engine thread.
    pub fn new(
        host: Box<dyn AudioHost>,
        source: Box<dyn FrameSource>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared::new());
        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();

        let decoder = DecodeWorker::new(
            Arc::clone(&shared),
            source,
            config.decode_chunk_frames,
            config.decode_idle(),
        );
        let decode_thread = std::thread::Builder::new()
            .name("cadenza-decode".to_string())
            .spawn(move || decoder.run())
            .map_err(|e| Error::Initialization(format!("Failed to spawn decode thread: {e}")))?;

        let worker_shared = Arc::clone(&shared);
        let spawned = std::thread::Builder::new()
            .name("cadenza-engine".to_string())
            .spawn(move || {
                // The output is created here: device clients stay on this thread.
                EngineWorker::new(worker_shared, config, host, command_rx, event_tx).run();
            });

        let engine_thread = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                shared.control.set_mode(DecodeMode::Quit);
                let _ = decode_thread.join();
                return Err(Error::Initialization(format!(
                    "Failed to spawn engine thread: {e}"
                )));
            }
        };

        debug!("Playback engine threads spawned");
        Ok(Self {
            shared,
            command_tx,
            event_rx,
            quit_sent: AtomicBool::new(false),
            engine_thread: Mutex::new(Some(engine_thread)),
            decode_thread: Mutex::new(Some(decode_thread)),
        })
    }

    /// Queue a command. `Quit` behaves like [`Self::quit`].
    pub fn send_command(&self, command: Command) -> Result<()> {
        if command == Command::Quit {
            return self.quit();
        }
        if self.quit_sent.load(Ordering::Acquire) {
            return Err(Error::EngineUnavailable);
        }
        self.command_tx
            .send(command)
            .map_err(|_| Error::EngineUnavailable)
    }

    pub fn play(&self) -> Result<()> {
        self.send_command(Command::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send_command(Command::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send_command(Command::Resume)
    }

    pub fn stop(&self) -> Result<()> {
        self.send_command(Command::Stop)
    }

    /// Seek to a position in seconds. Negative positions clamp to zero.
    pub fn seek(&self, seconds: f64) -> Result<()> {
        self.send_command(Command::Seek(seconds))
    }

    pub fn replay(&self) -> Result<()> {
        self.send_command(Command::Replay)
    }

    /// Shut the engine down and join its threads. Safe to call repeatedly.
    pub fn quit(&self) -> Result<()> {
        if !self.quit_sent.swap(true, Ordering::AcqRel) {
            info!("Quitting playback engine");
            if self.command_tx.send(Command::Quit).is_err() {
                // The engine thread is gone; release the decode thread directly.
                self.shared.control.set_mode(DecodeMode::Quit);
            }
        }
        self.join_threads();
        Ok(())
    }

    fn join_threads(&self) {
        for (name, slot) in [
            ("engine", &self.engine_thread),
            ("decode", &self.decode_thread),
        ] {
            if let Some(handle) = slot.lock().take() {
                if handle.join().is_err() {
                    error!("The {name} thread panicked");
                }
            }
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.shared.status()
    }

    pub fn state(&self) -> PlayerState {
        *self.shared.state.read()
    }

    /// Current position in seconds, derived from rendered frames.
    pub fn position(&self) -> f64 {
        self.shared.position_seconds()
    }

    /// Try to receive an event without blocking.
    pub fn try_recv_event(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }
}

impl Drop for PlayerEngine {
    fn drop(&mut self) {
        let _ = self.quit();
    }
}
