//! Playback queue between the receive loop and the playback thread
//!
//! A FIFO of owned entries guarded by a mutex, with a condition variable so
//! the consumer can sleep until data arrives or a timeout elapses. The empty
//! check and the wait happen under the same lock, so a push racing the
//! consumer's transition into the wait is never lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex};

/// Owned block of raw PCM ready for the output device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBlock {
    /// Interleaved little-endian PCM
    pub pcm: Bytes,
    /// Sender sample-clock position, when the block came from a framed stream
    pub timestamp: Option<u32>,
}

impl AudioBlock {
    pub fn new(pcm: Bytes) -> Self {
        Self {
            pcm,
            timestamp: None,
        }
    }

    pub fn with_timestamp(pcm: Bytes, timestamp: u32) -> Self {
        Self {
            pcm,
            timestamp: Some(timestamp),
        }
    }

    /// Block of `samples` zeroed 16-bit samples
    pub fn silence(samples: usize, timestamp: u32) -> Self {
        Self::with_timestamp(Bytes::from(vec![0u8; samples * 2]), timestamp)
    }

    /// Convert decoded i16 samples into a little-endian PCM block
    pub fn from_samples(samples: &[i16], timestamp: u32) -> Self {
        let mut pcm = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            pcm.extend_from_slice(&sample.to_le_bytes());
        }
        Self::with_timestamp(Bytes::from(pcm), timestamp)
    }

    pub fn len(&self) -> usize {
        self.pcm.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}

/// What the receive loop hands to the playback thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEntry {
    /// PCM to write as-is (raw mode)
    Block(AudioBlock),
    /// One frame is due from the jitter buffer (codec mode)
    FrameDue,
}

/// Result of one consumer wait
#[derive(Debug)]
pub enum Batch<T> {
    /// Everything queued at wake-up, in insertion order
    Entries(VecDeque<T>),
    /// The wait timed out with nothing queued
    Starved,
    /// The quit check passed to the wait reported true
    Quit,
}

/// Unbounded FIFO with a blocking, timed consumer side
pub struct PlaybackQueue<T> {
    entries: Mutex<VecDeque<T>>,
    ready: Condvar,
    pushed: AtomicU64,
    starved: AtomicU64,
}

impl<T> PlaybackQueue<T> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
            ready: Condvar::new(),
            pushed: AtomicU64::new(0),
            starved: AtomicU64::new(0),
        }
    }

    /// Append to the tail and wake a waiting consumer
    pub fn push(&self, entry: T) {
        let mut entries = self.entries.lock();
        entries.push_back(entry);
        self.pushed.fetch_add(1, Ordering::Relaxed);
        self.ready.notify_one();
    }

    /// Pop the head, waiting up to `timeout` if the queue is empty
    ///
    /// `None` on timeout is not an error; a push may have raced the timeout,
    /// so callers simply try again.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<T> {
        let mut entries = self.entries.lock();
        if entries.is_empty() {
            let result = self.ready.wait_for(&mut entries, timeout);
            if result.timed_out() && entries.is_empty() {
                self.starved.fetch_add(1, Ordering::Relaxed);
            }
        }
        entries.pop_front()
    }

    /// Wait for entries, then take all of them at once
    ///
    /// `quit` is evaluated before and after the wait with the queue lock
    /// held, so a [`wake`](Self::wake) issued after the quit flag is set is
    /// never missed. Entries still queued when `quit` returns true stay
    /// queued.
    pub fn wait_batch(&self, timeout: Duration, quit: impl Fn() -> bool) -> Batch<T> {
        let mut entries = self.entries.lock();
        let mut timed_out = false;
        if entries.is_empty() && !quit() {
            timed_out = self.ready.wait_for(&mut entries, timeout).timed_out();
        }

        if quit() {
            return Batch::Quit;
        }

        if entries.is_empty() {
            if timed_out {
                self.starved.fetch_add(1, Ordering::Relaxed);
            }
            return Batch::Starved;
        }

        Batch::Entries(std::mem::take(&mut *entries))
    }

    /// Wake the consumer without queueing anything
    pub fn wake(&self) {
        let _entries = self.entries.lock();
        self.ready.notify_all();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Total entries ever pushed
    pub fn pushed_count(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Waits that ended with nothing to play
    pub fn starved_count(&self) -> u64 {
        self.starved.load(Ordering::Relaxed)
    }
}

impl<T> Default for PlaybackQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe handle to the playback queue
pub type SharedPlaybackQueue = Arc<PlaybackQueue<QueueEntry>>;

/// Create a new shared playback queue
pub fn create_shared_queue() -> SharedPlaybackQueue {
    Arc::new(PlaybackQueue::new())
}
