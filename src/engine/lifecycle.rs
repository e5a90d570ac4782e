//! Shutdown sequencing
//!
//! Capture stops first so nothing new is sent while playback drains; playback
//! stops second, after which the sockets and the queue can be released. Each
//! phase is entered exactly once and only from its predecessor.

use std::fmt;

use tracing::debug;

use super::capture::{CaptureStats, CaptureWorker};
use super::playback::{PlaybackStats, PlaybackWorker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    Running,
    CaptureStopping,
    CaptureStopped,
    PlaybackStopping,
    PlaybackStopped,
}

impl ShutdownPhase {
    /// The phase that must follow this one, if any
    pub fn next(self) -> Option<Self> {
        match self {
            Self::Running => Some(Self::CaptureStopping),
            Self::CaptureStopping => Some(Self::CaptureStopped),
            Self::CaptureStopped => Some(Self::PlaybackStopping),
            Self::PlaybackStopping => Some(Self::PlaybackStopped),
            Self::PlaybackStopped => None,
        }
    }
}

impl fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::CaptureStopping => "capture stopping",
            Self::CaptureStopped => "capture stopped",
            Self::PlaybackStopping => "playback stopping",
            Self::PlaybackStopped => "playback stopped",
        };
        f.write_str(name)
    }
}

/// Records progress through the shutdown phases
#[derive(Debug, Clone)]
pub struct ShutdownProtocol {
    history: Vec<ShutdownPhase>,
}

impl ShutdownProtocol {
    pub fn new() -> Self {
        Self {
            history: vec![ShutdownPhase::Running],
        }
    }

    pub fn phase(&self) -> ShutdownPhase {
        self.history
            .last()
            .copied()
            .unwrap_or(ShutdownPhase::Running)
    }

    /// Every phase entered so far, in order
    pub fn history(&self) -> &[ShutdownPhase] {
        &self.history
    }

    pub fn is_complete(&self) -> bool {
        self.phase() == ShutdownPhase::PlaybackStopped
    }

    /// Move to the next phase; a no-op once shutdown is complete
    pub fn advance(&mut self) -> ShutdownPhase {
        if let Some(next) = self.phase().next() {
            debug!("Shutdown: {}", next);
            self.history.push(next);
        }
        self.phase()
    }
}

impl Default for ShutdownProtocol {
    fn default() -> Self {
        Self::new()
    }
}

/// Final counters of both workers and the phases shutdown walked through
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub capture: CaptureStats,
    pub playback: PlaybackStats,
    pub phases: Vec<ShutdownPhase>,
}

/// Stop capture, then playback, walking `protocol` through every phase
pub fn shut_down(
    protocol: &mut ShutdownProtocol,
    capture: Option<CaptureWorker>,
    playback: Option<PlaybackWorker>,
) -> ShutdownReport {
    let mut report = ShutdownReport::default();

    protocol.advance();
    if let Some(capture) = capture {
        capture.request_stop();
        report.capture = capture.join();
    }
    protocol.advance();

    protocol.advance();
    if let Some(playback) = playback {
        playback.request_stop();
        report.playback = playback.join();
    }
    protocol.advance();

    report.phases = protocol.history().to_vec();
    report
}
