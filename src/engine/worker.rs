//! Flags shared between threads

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Quit flag of one worker thread, behind its own lock
#[derive(Debug, Default)]
pub struct WorkerState {
    quit: Mutex<bool>,
}

impl WorkerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_quit(&self) {
        *self.quit.lock() = true;
    }

    pub fn should_quit(&self) -> bool {
        *self.quit.lock()
    }
}

/// Thread-safe handle to a worker's state
pub type SharedWorkerState = Arc<WorkerState>;

/// External stop request polled by the receive loop
///
/// Setting it is a single atomic store, so it is safe to call from a signal
/// handler.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Runtime switch for per-packet diagnostics
#[derive(Debug, Clone, Default)]
pub struct Verbosity(Arc<AtomicBool>);

impl Verbosity {
    pub fn new(enabled: bool) -> Self {
        Self(Arc::new(AtomicBool::new(enabled)))
    }

    pub fn is_enabled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, enabled: bool) {
        self.0.store(enabled, Ordering::Relaxed);
    }

    /// Flip the switch, returning the new state
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_quit() {
        let state = WorkerState::new();
        assert!(!state.should_quit());
        state.request_quit();
        assert!(state.should_quit());
    }

    #[test]
    fn test_stop_signal_is_shared() {
        let stop = StopSignal::new();
        let handle = stop.clone();
        handle.request();
        assert!(stop.is_requested());
    }

    #[test]
    fn test_verbosity_toggle() {
        let verbose = Verbosity::new(false);
        assert!(verbose.toggle());
        assert!(verbose.is_enabled());
        assert!(!verbose.toggle());
        assert!(!verbose.is_enabled());
    }
}
