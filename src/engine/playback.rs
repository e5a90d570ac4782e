//! Playback worker
//!
//! Drains the playback queue in batches and writes each entry to the sink.
//! Raw blocks are written as they are; a `FrameDue` marker pulls one frame
//! from the jitter buffer. The sink write happens outside the queue lock, so
//! the receive loop never waits on the audio device.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use super::worker::{SharedWorkerState, Verbosity, WorkerState};
use crate::audio::buffer::{Batch, QueueEntry, SharedPlaybackQueue};
use crate::audio::jitter::SharedJitter;
use crate::audio::sink::AudioSink;
use crate::error::{Error, Result};

/// Playback-side counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlaybackStats {
    pub blocks_written: u64,
    pub bytes_written: u64,
    pub write_failures: u64,
    pub starvations: u64,
}

/// Handle to the running playback thread
pub struct PlaybackWorker {
    state: SharedWorkerState,
    queue: SharedPlaybackQueue,
    thread_handle: Option<JoinHandle<PlaybackStats>>,
}

impl PlaybackWorker {
    pub fn spawn(
        queue: SharedPlaybackQueue,
        jitter: Option<SharedJitter>,
        sink: Box<dyn AudioSink>,
        starvation_timeout: Duration,
        verbose: Verbosity,
    ) -> Result<Self> {
        let state = SharedWorkerState::new(WorkerState::new());
        let mut playback = PlaybackLoop {
            queue: queue.clone(),
            jitter,
            sink,
            starvation_timeout,
            verbose,
            stats: PlaybackStats::default(),
        };

        let loop_state = state.clone();
        let handle = thread::Builder::new()
            .name("playback".to_string())
            .spawn(move || playback.run(&loop_state))
            .map_err(|source| Error::Spawn {
                name: "playback",
                source,
            })?;

        Ok(Self {
            state,
            queue,
            thread_handle: Some(handle),
        })
    }

    /// Set the quit flag and wake the thread if it is waiting on the queue
    pub fn request_stop(&self) {
        self.state.request_quit();
        self.queue.wake();
    }

    /// Wait for the thread to exit
    pub fn join(mut self) -> PlaybackStats {
        self.join_inner()
    }

    fn join_inner(&mut self) -> PlaybackStats {
        match self.thread_handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                error!("Playback thread panicked");
                PlaybackStats::default()
            }
            None => PlaybackStats::default(),
        }
    }
}

impl Drop for PlaybackWorker {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.request_stop();
            self.join_inner();
        }
    }
}

struct PlaybackLoop {
    queue: SharedPlaybackQueue,
    jitter: Option<SharedJitter>,
    sink: Box<dyn AudioSink>,
    starvation_timeout: Duration,
    verbose: Verbosity,
    stats: PlaybackStats,
}

impl PlaybackLoop {
    fn run(&mut self, state: &WorkerState) -> PlaybackStats {
        loop {
            match self
                .queue
                .wait_batch(self.starvation_timeout, || state.should_quit())
            {
                Batch::Quit => break,
                Batch::Starved => {
                    self.stats.starvations += 1;
                    if self.verbose.is_enabled() {
                        info!("Output thread is starving...");
                    } else {
                        trace!("Nothing to play for {:?}", self.starvation_timeout);
                    }
                }
                Batch::Entries(entries) => {
                    for entry in entries {
                        self.play(entry);
                    }
                }
            }
        }

        debug!("Playback thread exiting");
        self.stats.clone()
    }

    fn play(&mut self, entry: QueueEntry) {
        let block = match entry {
            QueueEntry::Block(block) => block,
            QueueEntry::FrameDue => match &self.jitter {
                Some(jitter) => jitter.get(),
                None => {
                    debug!("Frame marker without a jitter buffer");
                    return;
                }
            },
        };

        match self.sink.write(&block.pcm) {
            Ok(()) => {
                self.stats.blocks_written += 1;
                self.stats.bytes_written += block.len() as u64;
            }
            Err(e) => {
                self.stats.write_failures += 1;
                warn!("Playback write failed: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{create_shared_queue, AudioBlock};
    use crate::audio::jitter::{JitterBuffer, JitterConfig, SharedJitterBuffer};
    use crate::codec::Linear16;
    use crate::error::AudioError;
    use bytes::Bytes;
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use std::sync::Arc;
    use std::time::Instant;

    struct ChannelSink(Sender<Vec<u8>>);

    impl AudioSink for ChannelSink {
        fn write(&mut self, pcm: &[u8]) -> std::result::Result<(), AudioError> {
            self.0.send(pcm.to_vec()).map_err(|_| AudioError::SinkClosed)
        }
    }

    fn sink() -> (Box<dyn AudioSink>, Receiver<Vec<u8>>) {
        let (tx, rx) = unbounded();
        (Box::new(ChannelSink(tx)), rx)
    }

    #[test]
    fn test_blocks_written_in_order() {
        let queue = create_shared_queue();
        let (sink, written) = sink();
        let worker = PlaybackWorker::spawn(
            queue.clone(),
            None,
            sink,
            Duration::from_millis(50),
            Verbosity::new(false),
        )
        .unwrap();

        for i in 0..5u8 {
            queue.push(QueueEntry::Block(AudioBlock::new(Bytes::from(vec![i; 4]))));
        }
        for i in 0..5u8 {
            assert_eq!(written.recv_timeout(Duration::from_secs(2)).unwrap(), vec![i; 4]);
        }

        worker.request_stop();
        let stats = worker.join();
        assert_eq!(stats.blocks_written, 5);
    }

    #[test]
    fn test_frame_marker_pulls_from_jitter() {
        let queue = create_shared_queue();
        let jitter = Arc::new(SharedJitterBuffer::new(JitterBuffer::new(
            Box::new(Linear16::new(2)),
            JitterConfig {
                frame_size: 2,
                capacity: 8,
                delay_frames: 0,
                resync_after: 0,
            },
        )));
        jitter.put(Bytes::from_static(&[5, 0, 6, 0]), 0);

        let (sink, written) = sink();
        let worker = PlaybackWorker::spawn(
            queue.clone(),
            Some(jitter),
            sink,
            Duration::from_millis(50),
            Verbosity::new(false),
        )
        .unwrap();

        queue.push(QueueEntry::FrameDue);
        queue.push(QueueEntry::FrameDue);
        assert_eq!(written.recv_timeout(Duration::from_secs(2)).unwrap(), vec![5, 0, 6, 0]);
        // Nothing buffered for the second frame: silence
        assert_eq!(written.recv_timeout(Duration::from_secs(2)).unwrap(), vec![0; 4]);

        worker.request_stop();
        worker.join();
    }

    #[test]
    fn test_stop_interrupts_starvation_wait() {
        let queue = create_shared_queue();
        let (sink, _written) = sink();
        let worker = PlaybackWorker::spawn(
            queue,
            None,
            sink,
            Duration::from_secs(30),
            Verbosity::new(true),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(20));
        let started = Instant::now();
        worker.request_stop();
        worker.join();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_starvation_is_counted() {
        let queue = create_shared_queue();
        let (sink, _written) = sink();
        let worker = PlaybackWorker::spawn(
            queue,
            None,
            sink,
            Duration::from_millis(10),
            Verbosity::new(false),
        )
        .unwrap();

        thread::sleep(Duration::from_millis(100));
        worker.request_stop();
        assert!(worker.join().starvations >= 1);
    }
}
