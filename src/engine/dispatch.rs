//! Receive/dispatch loop
//!
//! Runs on the caller's thread. Each iteration checks the stop signal, waits
//! briefly for a datagram and routes it: raw PCM straight into the playback
//! queue, codec frames into the jitter buffer followed by one `FrameDue`
//! marker per frame that became due.

use std::net::SocketAddr;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use super::worker::{StopSignal, Verbosity};
use crate::audio::buffer::{AudioBlock, QueueEntry, SharedPlaybackQueue};
use crate::audio::jitter::{PutOutcome, SharedJitter};
use crate::network::InboundSocket;
use crate::protocol;

/// Where received datagrams go
pub enum Route {
    Raw {
        queue: SharedPlaybackQueue,
    },
    Codec {
        jitter: SharedJitter,
        queue: SharedPlaybackQueue,
    },
}

/// Fate of one datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatched {
    /// Raw block queued for playback
    Queued,
    /// Codec frame handed to the jitter buffer
    Framed { outcome: PutOutcome, due: u32 },
    /// Header failed validation; dropped
    Malformed,
    /// Zero-length datagram; dropped
    Empty,
}

/// Receive-side counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub datagrams: u64,
    pub bytes: u64,
    pub malformed: u64,
    pub frames_due: u64,
    pub receive_errors: u64,
}

pub struct Dispatcher {
    socket: InboundSocket,
    route: Route,
    buf: Vec<u8>,
    verbose: Verbosity,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(socket: InboundSocket, route: Route, max_datagram: usize, verbose: Verbosity) -> Self {
        Self {
            socket,
            route,
            buf: vec![0u8; max_datagram],
            verbose,
            stats: DispatchStats::default(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.local_addr().ok()
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Receive until `stop` is requested
    pub fn run(&mut self, stop: &StopSignal) -> DispatchStats {
        loop {
            if stop.is_requested() {
                if self.verbose.is_enabled() {
                    info!("Interrupted, exiting...");
                }
                break;
            }
            self.poll_once();
        }
        self.stats.clone()
    }

    /// Wait up to the socket's poll interval for one datagram and route it
    pub fn poll_once(&mut self) -> Option<Dispatched> {
        let (len, from) = match self.socket.recv(&mut self.buf) {
            Ok(Some(received)) => received,
            Ok(None) => return None,
            Err(e) => {
                self.stats.receive_errors += 1;
                warn!("{}", e);
                return None;
            }
        };

        self.stats.datagrams += 1;
        self.stats.bytes += len as u64;
        if self.verbose.is_enabled() {
            info!("Received {} bytes from {}", len, from.ip());
        } else {
            trace!("Received {} bytes from {}", len, from);
        }

        let datagram = Bytes::copy_from_slice(&self.buf[..len]);
        Some(self.dispatch(datagram))
    }

    /// Route one datagram
    pub fn dispatch(&mut self, datagram: Bytes) -> Dispatched {
        if datagram.is_empty() {
            return Dispatched::Empty;
        }

        match &self.route {
            Route::Raw { queue } => {
                queue.push(QueueEntry::Block(AudioBlock::new(datagram)));
                Dispatched::Queued
            }
            Route::Codec { jitter, queue } => {
                let (timestamp, payload) = match protocol::decode(&datagram) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        self.stats.malformed += 1;
                        debug!("Dropping datagram: {}", e);
                        return Dispatched::Malformed;
                    }
                };

                let frame = datagram.slice_ref(payload);
                let (outcome, due) = jitter.put(frame, timestamp);
                for _ in 0..due {
                    queue.push(QueueEntry::FrameDue);
                }
                self.stats.frames_due += due as u64;
                Dispatched::Framed { outcome, due }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::create_shared_queue;
    use crate::audio::jitter::{JitterBuffer, JitterConfig, SharedJitterBuffer};
    use crate::codec::Linear16;
    use crate::network::bind_inbound;
    use std::sync::Arc;
    use std::time::Duration;

    fn socket() -> InboundSocket {
        bind_inbound(0, Duration::from_millis(5)).unwrap()
    }

    fn codec_dispatcher() -> (Dispatcher, SharedPlaybackQueue, SharedJitter) {
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
        let route = Route::Codec {
            jitter: jitter.clone(),
            queue: queue.clone(),
        };
        (
            Dispatcher::new(socket(), route, 1500, Verbosity::new(false)),
            queue,
            jitter,
        )
    }

    #[test]
    fn test_raw_datagram_is_queued_verbatim() {
        let queue = create_shared_queue();
        let route = Route::Raw {
            queue: queue.clone(),
        };
        let mut dispatcher = Dispatcher::new(socket(), route, 1500, Verbosity::new(false));

        let pcm = Bytes::from_static(&[1, 2, 3, 4, 5]);
        assert_eq!(dispatcher.dispatch(pcm.clone()), Dispatched::Queued);
        assert_eq!(
            queue.pop_blocking(Duration::from_millis(1)),
            Some(QueueEntry::Block(AudioBlock::new(pcm)))
        );
    }

    #[test]
    fn test_codec_frame_goes_through_jitter() {
        let (mut dispatcher, queue, jitter) = codec_dispatcher();

        let packet = protocol::encode(&[7, 0, 8, 0], 0);
        assert_eq!(
            dispatcher.dispatch(packet),
            Dispatched::Framed {
                outcome: PutOutcome::Accepted,
                due: 1
            }
        );
        assert_eq!(queue.len(), 1);

        let block = jitter.get();
        assert_eq!(&block.pcm[..], &[7, 0, 8, 0]);
    }

    #[test]
    fn test_malformed_never_reaches_jitter() {
        let (mut dispatcher, queue, jitter) = codec_dispatcher();

        assert_eq!(
            dispatcher.dispatch(Bytes::from_static(&[0xCA, 0xFE])),
            Dispatched::Malformed
        );
        let mut bad = protocol::encode(&[1, 0, 1, 0], 0).to_vec();
        bad[3] ^= 0xFF;
        assert_eq!(dispatcher.dispatch(Bytes::from(bad)), Dispatched::Malformed);
        assert_eq!(dispatcher.dispatch(Bytes::new()), Dispatched::Empty);

        assert!(queue.is_empty());
        assert_eq!(jitter.stats().received, 0);
        assert_eq!(dispatcher.stats().malformed, 2);
    }

    #[test]
    fn test_run_returns_once_stopped() {
        let (mut dispatcher, _, _) = codec_dispatcher();
        let stop = StopSignal::new();
        stop.request();
        assert_eq!(dispatcher.run(&stop).datagrams, 0);
    }
}
