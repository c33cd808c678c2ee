//! Control block shared by the engine and decode threads.
//!
//! The engine is the only writer of mode, epoch and target. The decode thread
//! polls them once per chunk and reports idleness back through atomics,
//! tagged with the mode sequence it observed. The mutex only pairs with the
//! condvars; neither side holds it while touching shared state.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use cadenza_core::DecodeMode;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::time::{Duration, Instant};

/// Target published when no explicit frame is requested. The decode thread
/// resynchronizes to the start of the stream, matching a zero position offset.
pub const NO_TARGET: i64 = -1;

/// Mode, epoch and target atomics plus the idle handshake.
#[derive(Debug)]
pub struct DecodeControl {
    epoch: AtomicU64,
    mode: AtomicU8,
    target: AtomicI64,
    mode_seq: AtomicU64,
    idle: AtomicBool,
    /// Mode sequence the decode thread had observed when it last went idle.
    acked_seq: AtomicU64,
    lock: Mutex<()>,
    /// Signalled when the decode thread reports idle.
    idle_cond: Condvar,
    /// Signalled when the engine publishes something the decode thread
    /// should act on.
    wake_cond: Condvar,
}

impl Default for DecodeControl {
    fn default() -> Self {
        Self {
            epoch: AtomicU64::new(0),
            mode: AtomicU8::new(DecodeMode::Stopped.as_u8()),
            target: AtomicI64::new(NO_TARGET),
            mode_seq: AtomicU64::new(0),
            idle: AtomicBool::new(false),
            acked_seq: AtomicU64::new(0),
            lock: Mutex::new(()),
            idle_cond: Condvar::new(),
            wake_cond: Condvar::new(),
        }
    }
}

impl DecodeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> DecodeMode {
        DecodeMode::from_u8(self.mode.load(Ordering::Acquire))
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn target(&self) -> i64 {
        self.target.load(Ordering::Acquire)
    }

    /// Sequence number of the latest mode publication. Load this before
    /// [`Self::mode`] so an idle report never claims a newer mode than the
    /// one acted on.
    pub fn mode_seq(&self) -> u64 {
        self.mode_seq.load(Ordering::Acquire)
    }

    /// Publish `mode` and return its sequence number. Engine only.
    pub fn set_mode(&self, mode: DecodeMode) -> u64 {
        self.mode.store(mode.as_u8(), Ordering::Release);
        let seq = self.mode_seq.fetch_add(1, Ordering::AcqRel) + 1;
        self.wake();
        seq
    }

    /// Invalidate in-flight decode work and redirect the cursor. The target
    /// is stored before the epoch bump, so whoever sees the new epoch sees
    /// the new target. Engine only.
    pub fn begin_epoch(&self, target: Option<i64>) -> u64 {
        self.target
            .store(target.unwrap_or(NO_TARGET), Ordering::Release);
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        self.wake();
        epoch
    }

    /// Report idle after acting on mode sequence `seq`. Decode thread only.
    pub fn publish_idle(&self, seq: u64) {
        if self.idle.load(Ordering::Acquire) && self.acked_seq.load(Ordering::Acquire) == seq {
            return;
        }
        // Sequence first: a waiter that sees the flag also sees its sequence.
        self.acked_seq.store(seq, Ordering::Release);
        self.idle.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.idle_cond.notify_all();
    }

    /// Report that decoding is in progress. Decode thread only.
    pub fn publish_busy(&self) {
        self.idle.store(false, Ordering::Release);
    }

    /// Wait until the decode thread is idle having observed mode sequence
    /// `seq` or later. Returns false on timeout.
    pub fn wait_idle(&self, seq: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !self.acknowledged(seq) {
            if self.idle_cond.wait_until(&mut guard, deadline).timed_out() {
                return self.acknowledged(seq);
            }
        }
        true
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load(Ordering::Acquire)
    }

    fn acknowledged(&self, seq: u64) -> bool {
        self.idle.load(Ordering::Acquire) && self.acked_seq.load(Ordering::Acquire) >= seq
    }

    /// Block the decode thread for up to `timeout`, returning early once the
    /// mode sequence or epoch differs from the values it last acted on.
    pub fn park(&self, seen_seq: u64, seen_epoch: u64, timeout: Duration) {
        let mut guard = self.lock.lock();
        if self.mode_seq() != seen_seq || self.epoch() != seen_epoch {
            return;
        }
        self.wake_cond.wait_for(&mut guard, timeout);
    }

    fn wake(&self) {
        // Publications happen before this lock, parked checks happen under it.
        let _guard = self.lock.lock();
        self.wake_cond.notify_all();
    }
}
