//! Lock-free frame ring for audio streaming.
//!
//! One decode thread writes interleaved frames and one render thread reads
//! them. Positions are monotonically increasing 64-bit frame counters; the
//! physical slot is the position modulo the capacity, so the capacity does not
//! need to be a power of two.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Lock-free single-producer, single-consumer ring of interleaved `f32` frames.
///
/// Designed for real-time audio where allocations in the hot path are forbidden.
/// The producer owns `write_pos`, the consumer owns `read_pos`; each side loads
/// the other's position with acquire ordering and publishes its own with
/// release ordering.
pub struct RingBuffer {
    /// Interleaved sample storage, `capacity * channels` long.
    storage: Box<[UnsafeCell<f32>]>,
    /// Capacity in frames.
    capacity: u64,
    channels: usize,
    write_pos: AtomicU64,
    read_pos: AtomicU64,
    underruns: AtomicU64,
    overruns: AtomicU64,
    invariant_violations: AtomicU64,
}

impl RingBuffer {
    /// Create a ring holding `capacity_frames` frames of `channels` samples.
    ///
    /// Zero arguments are raised to one.
    pub fn new(capacity_frames: usize, channels: usize) -> Self {
        let capacity_frames = capacity_frames.max(1);
        let channels = channels.max(1);
        let storage = (0..capacity_frames * channels)
            .map(|_| UnsafeCell::new(0.0f32))
            .collect();

        Self {
            storage,
            capacity: capacity_frames as u64,
            channels,
            write_pos: AtomicU64::new(0),
            read_pos: AtomicU64::new(0),
            underruns: AtomicU64::new(0),
            overruns: AtomicU64::new(0),
            invariant_violations: AtomicU64::new(0),
        }
    }

    /// Capacity in frames.
    pub const fn capacity(&self) -> usize {
        self.capacity as usize
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Frames that can be written without overrun. Producer side.
    pub fn available_to_write(&self) -> usize {
        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        (self.capacity - self.used(write, read)) as usize
    }

    /// Frames that can be read without underrun. Consumer side.
    pub fn available_to_read(&self) -> usize {
        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);
        self.used(write, read) as usize
    }

    /// Fraction of the capacity currently holding unread frames.
    #[allow(clippy::cast_precision_loss)]
    pub fn fill_level(&self) -> f32 {
        self.available_to_read() as f32 / self.capacity as f32
    }

    pub fn underrun_count(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    pub fn overrun_count(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    pub fn invariant_violation_count(&self) -> u64 {
        self.invariant_violations.load(Ordering::Relaxed)
    }

    /// Raw `(write, read)` positions.
    pub fn positions(&self) -> (u64, u64) {
        (
            self.write_pos.load(Ordering::Acquire),
            self.read_pos.load(Ordering::Acquire),
        )
    }

    /// Occupied frames between two positions, clamped into `0..=capacity`.
    fn used(&self, write: u64, read: u64) -> u64 {
        let in_range = write >= read && write - read <= self.capacity;
        debug_assert!(
            in_range,
            "ring positions out of range: write={write} read={read} capacity={}",
            self.capacity
        );
        if in_range {
            write - read
        } else {
            self.invariant_violations.fetch_add(1, Ordering::Relaxed);
            if write < read {
                0
            } else {
                self.capacity
            }
        }
    }

    /// Write the whole frames contained in `src`.
    ///
    /// Returns the number of frames written. A short write counts one overrun.
    /// Must only be called from the producer thread.
    pub fn write(&self, src: &[f32]) -> usize {
        let requested = (src.len() / self.channels) as u64;
        if requested == 0 {
            return 0;
        }

        let write = self.write_pos.load(Ordering::Relaxed);
        let read = self.read_pos.load(Ordering::Acquire);
        let free = self.capacity - self.used(write, read);
        let frames = requested.min(free);

        if frames < requested {
            self.overruns.fetch_add(1, Ordering::Relaxed);
        }
        if frames == 0 {
            return 0;
        }

        let start = (write % self.capacity) as usize;
        let first = (frames as usize).min(self.capacity as usize - start);
        let second = frames as usize - first;
        let ch = self.channels;
        let base = self.base_ptr();

        // SAFETY: slots [write, write + frames) are free, so the consumer does
        // not touch them until the release store below publishes them. Both
        // pieces lie inside `storage`.
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::copy_nonoverlapping(src.as_ptr(), base.add(start * ch), first * ch);
            if second > 0 {
                std::ptr::copy_nonoverlapping(src.as_ptr().add(first * ch), base, second * ch);
            }
        }

        self.write_pos.store(write + frames, Ordering::Release);
        frames as usize
    }

    /// Read whole frames into `dst`.
    ///
    /// Returns the number of frames read; the rest of `dst` is left untouched.
    /// A short read counts one underrun. Must only be called from the consumer
    /// thread.
    pub fn read(&self, dst: &mut [f32]) -> usize {
        let requested = (dst.len() / self.channels) as u64;
        if requested == 0 {
            return 0;
        }

        let read = self.read_pos.load(Ordering::Relaxed);
        let write = self.write_pos.load(Ordering::Acquire);
        let frames = requested.min(self.used(write, read));

        if frames < requested {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        if frames == 0 {
            return 0;
        }

        let start = (read % self.capacity) as usize;
        let first = (frames as usize).min(self.capacity as usize - start);
        let second = frames as usize - first;
        let ch = self.channels;
        let base = self.base_ptr();

        // SAFETY: slots [read, read + frames) were published by the producer's
        // release store, observed through the acquire load above, and are not
        // rewritten until `read_pos` moves past them.
        #[allow(unsafe_code)]
        unsafe {
            std::ptr::copy_nonoverlapping(base.add(start * ch), dst.as_mut_ptr(), first * ch);
            if second > 0 {
                std::ptr::copy_nonoverlapping(base, dst.as_mut_ptr().add(first * ch), second * ch);
            }
        }

        self.read_pos.store(read + frames, Ordering::Release);
        frames as usize
    }

    /// Clear positions and all counters.
    ///
    /// Only valid while neither the producer nor the consumer is active.
    pub fn reset(&self) {
        self.write_pos.store(0, Ordering::Release);
        self.read_pos.store(0, Ordering::Release);
        self.underruns.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.invariant_violations.store(0, Ordering::Relaxed);
    }

    fn base_ptr(&self) -> *mut f32 {
        UnsafeCell::raw_get(self.storage.as_ptr())
    }

    #[cfg(test)]
    fn slot(&self, frame: usize, channel: usize) -> f32 {
        // SAFETY: tests inspect storage with no concurrent writer.
        #[allow(unsafe_code)]
        unsafe {
            *self.storage[frame * self.channels + channel].get()
        }
    }

    #[cfg(test)]
    fn force_positions(&self, write: u64, read: u64) {
        self.write_pos.store(write, Ordering::Release);
        self.read_pos.store(read, Ordering::Release);
    }
}

// SAFETY: storage slots are only accessed by the single producer (free region)
// or the single consumer (published region), and the regions never overlap
// while the acquire/release position protocol is respected.
#[allow(unsafe_code)]
unsafe impl Send for RingBuffer {}
#[allow(unsafe_code)]
unsafe impl Sync for RingBuffer {}

/// Thread-safe reference to a ring buffer.
pub type SharedRingBuffer = Arc<RingBuffer>;

/// Create a new shared ring buffer.
pub fn shared_ring_buffer(capacity_frames: usize, channels: usize) -> SharedRingBuffer {
    Arc::new(RingBuffer::new(capacity_frames, channels))
}
