//! Readiness and stop signals for the render thread.
//!
//! Readiness is auto-reset: one wait consumes one notification. Stop is
//! manual-reset: it stays raised until [`RenderSignal::clear_stop`] and wins
//! over a pending readiness notification.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Outcome of a render-thread wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Ready,
    Stop,
    Timeout,
}

#[derive(Debug, Default)]
struct Flags {
    ready: bool,
    stop: bool,
}

/// Pair of events the render thread blocks on.
#[derive(Debug, Default)]
pub struct RenderSignal {
    flags: Mutex<Flags>,
    cond: Condvar,
}

impl RenderSignal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Handle given to the device so it can raise readiness.
    pub fn ready_handle(self: &Arc<Self>) -> ReadySignal {
        ReadySignal(Arc::clone(self))
    }

    pub fn notify_ready(&self) {
        self.flags.lock().ready = true;
        self.cond.notify_one();
    }

    pub fn request_stop(&self) {
        self.flags.lock().stop = true;
        self.cond.notify_all();
    }

    /// Lower the stop flag and drop any stale readiness before a new run.
    pub fn clear_stop(&self) {
        let mut flags = self.flags.lock();
        flags.stop = false;
        flags.ready = false;
    }

    /// Block until readiness, stop, or `timeout` elapses.
    pub fn wait(&self, timeout: Duration) -> Wake {
        let deadline = Instant::now() + timeout;
        let mut flags = self.flags.lock();
        loop {
            if flags.stop {
                return Wake::Stop;
            }
            if flags.ready {
                flags.ready = false;
                return Wake::Ready;
            }
            if self.cond.wait_until(&mut flags, deadline).timed_out() {
                return if flags.stop {
                    Wake::Stop
                } else if std::mem::take(&mut flags.ready) {
                    Wake::Ready
                } else {
                    Wake::Timeout
                };
            }
        }
    }
}

/// Device-side handle for raising readiness.
#[derive(Debug, Clone)]
pub struct ReadySignal(Arc<RenderSignal>);

impl ReadySignal {
    pub fn notify(&self) {
        self.0.notify_ready();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_is_auto_reset() {
        let signal = RenderSignal::new();
        signal.ready_handle().notify();
        assert_eq!(signal.wait(Duration::from_millis(10)), Wake::Ready);
        assert_eq!(signal.wait(Duration::from_millis(10)), Wake::Timeout);
    }

    #[test]
    fn test_stop_is_manual_reset_and_wins() {
        let signal = RenderSignal::new();
        signal.notify_ready();
        signal.request_stop();
        assert_eq!(signal.wait(Duration::from_millis(10)), Wake::Stop);
        assert_eq!(signal.wait(Duration::from_millis(10)), Wake::Stop);

        signal.clear_stop();
        assert_eq!(signal.wait(Duration::from_millis(10)), Wake::Timeout);
    }

    #[test]
    fn test_wakes_waiting_thread() {
        let signal = RenderSignal::new();
        let waiter = Arc::clone(&signal);
        let handle = std::thread::spawn(move || waiter.wait(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(20));
        signal.request_stop();
        assert_eq!(handle.join().unwrap(), Wake::Stop);
    }
}
