//! Lock-free frame transport between the decode and render threads.

pub mod ring;

pub use ring::{shared_ring_buffer, RingBuffer, SharedRingBuffer};
