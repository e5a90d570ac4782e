//! Capture/send worker
//!
//! Reads PCM from the capture source and sends it to the peer. Raw mode
//! forwards each read verbatim and then pauses; codec mode accumulates whole
//! frames, encodes them and prefixes each with the packet header.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, error, warn};

use super::worker::{SharedWorkerState, WorkerState};
use crate::audio::source::CaptureSource;
use crate::codec::{samples_from_le_bytes, FrameEncoder};
use crate::error::{Error, Result};
use crate::network::OutboundSocket;
use crate::protocol;

/// How captured PCM becomes datagrams
pub enum CaptureMode {
    Raw {
        chunk_bytes: usize,
        send_delay: Duration,
    },
    Codec {
        encoder: Box<dyn FrameEncoder>,
    },
}

/// Send-side counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStats {
    pub datagrams_sent: u64,
    pub bytes_sent: u64,
    pub send_failures: u64,
    pub encode_failures: u64,
    pub read_failures: u64,
}

/// Handle to the running capture thread
pub struct CaptureWorker {
    state: SharedWorkerState,
    thread_handle: Option<JoinHandle<CaptureStats>>,
}

impl CaptureWorker {
    pub fn spawn(
        source: Box<dyn CaptureSource>,
        socket: OutboundSocket,
        mode: CaptureMode,
        poll: Duration,
    ) -> Result<Self> {
        let state = SharedWorkerState::new(WorkerState::new());
        let mut capture = CaptureLoop {
            source,
            socket,
            mode,
            poll,
            timestamp: 0,
            pending: BytesMut::new(),
            stats: CaptureStats::default(),
        };

        let loop_state = state.clone();
        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || capture.run(&loop_state))
            .map_err(|source| Error::Spawn {
                name: "capture",
                source,
            })?;

        Ok(Self {
            state,
            thread_handle: Some(handle),
        })
    }

    /// Ask the thread to exit at its next loop iteration
    pub fn request_stop(&self) {
        self.state.request_quit();
    }

    /// Wait for the thread to exit
    pub fn join(mut self) -> CaptureStats {
        self.join_inner()
    }

    fn join_inner(&mut self) -> CaptureStats {
        match self.thread_handle.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                error!("Capture thread panicked");
                CaptureStats::default()
            }
            None => CaptureStats::default(),
        }
    }
}

impl Drop for CaptureWorker {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.request_stop();
            self.join_inner();
        }
    }
}

struct CaptureLoop {
    source: Box<dyn CaptureSource>,
    socket: OutboundSocket,
    mode: CaptureMode,
    poll: Duration,
    /// Sample clock of the next codec frame
    timestamp: u32,
    /// Codec mode: bytes short of a whole frame
    pending: BytesMut,
    stats: CaptureStats,
}

impl CaptureLoop {
    fn run(&mut self, state: &WorkerState) -> CaptureStats {
        let mut buf = vec![0u8; self.read_size()];

        while !state.should_quit() {
            let n = match self.source.read(&mut buf, self.poll) {
                Ok(n) => n,
                Err(e) => {
                    self.stats.read_failures += 1;
                    warn!("Capture read failed: {}", e);
                    thread::sleep(self.poll);
                    continue;
                }
            };
            if n == 0 {
                continue;
            }

            match self.mode {
                CaptureMode::Raw { send_delay, .. } => {
                    let datagram = Bytes::copy_from_slice(&buf[..n]);
                    self.send(&datagram);
                    thread::sleep(send_delay);
                }
                CaptureMode::Codec { .. } => {
                    self.pending.extend_from_slice(&buf[..n]);
                    self.send_frames();
                }
            }
        }

        debug!("Capture thread exiting");
        self.stats.clone()
    }

    fn read_size(&self) -> usize {
        match &self.mode {
            CaptureMode::Raw { chunk_bytes, .. } => (*chunk_bytes).max(1),
            CaptureMode::Codec { encoder } => encoder.frame_size() * 2,
        }
    }

    /// Encode and send every whole frame accumulated so far
    fn send_frames(&mut self) {
        let CaptureMode::Codec { encoder } = &mut self.mode else {
            return;
        };
        let frame_size = encoder.frame_size();
        let frame_bytes = frame_size * 2;

        let mut packets = Vec::new();
        while self.pending.len() >= frame_bytes {
            let frame = self.pending.split_to(frame_bytes);
            let samples = samples_from_le_bytes(&frame);
            let timestamp = self.timestamp;
            // The clock advances even when encoding fails; the gap is
            // concealed on the far side.
            self.timestamp = self.timestamp.wrapping_add(frame_size as u32);

            match encoder.encode(&samples) {
                Ok(payload) => packets.push(protocol::encode(&payload, timestamp)),
                Err(e) => {
                    self.stats.encode_failures += 1;
                    warn!("Dropping frame {}: {}", timestamp, e);
                }
            }
        }

        for packet in packets {
            self.send(&packet);
        }
    }

    fn send(&mut self, datagram: &Bytes) {
        match self.socket.send(datagram) {
            Ok(sent) => {
                self.stats.datagrams_sent += 1;
                self.stats.bytes_sent += sent as u64;
            }
            Err(e) => {
                self.stats.send_failures += 1;
                warn!("{}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Linear16;
    use crate::network::{bind_inbound, bind_outbound};
    use std::io;
    use std::time::Instant;

    /// Serves a fixed script of chunks, then reports nothing available
    struct ScriptedSource {
        chunks: Vec<Vec<u8>>,
    }

    impl CaptureSource for ScriptedSource {
        fn read(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<usize> {
            if self.chunks.is_empty() {
                thread::sleep(wait);
                return Ok(0);
            }
            let chunk = self.chunks.remove(0);
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        }
    }

    fn receive_n(inbound: &crate::network::InboundSocket, n: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut buf = [0u8; 2048];
        let deadline = Instant::now() + Duration::from_secs(5);
        while out.len() < n && Instant::now() < deadline {
            if let Some((len, _)) = inbound.recv(&mut buf).unwrap() {
                out.push(buf[..len].to_vec());
            }
        }
        out
    }

    #[test]
    fn test_raw_mode_sends_reads_verbatim() {
        let inbound = bind_inbound(0, Duration::from_millis(10)).unwrap();
        let port = inbound.local_addr().unwrap().port();
        let outbound = bind_outbound(([127, 0, 0, 1], port).into()).unwrap();

        let source = ScriptedSource {
            chunks: vec![vec![1, 2, 3], vec![4, 5]],
        };
        let worker = CaptureWorker::spawn(
            Box::new(source),
            outbound,
            CaptureMode::Raw {
                chunk_bytes: 16,
                send_delay: Duration::from_millis(1),
            },
            Duration::from_millis(5),
        )
        .unwrap();

        let received = receive_n(&inbound, 2);
        worker.request_stop();
        let stats = worker.join();

        assert_eq!(received, vec![vec![1, 2, 3], vec![4, 5]]);
        assert_eq!(stats.datagrams_sent, 2);
    }

    #[test]
    fn test_codec_mode_frames_whole_frames_only() {
        let inbound = bind_inbound(0, Duration::from_millis(10)).unwrap();
        let port = inbound.local_addr().unwrap().port();
        let outbound = bind_outbound(([127, 0, 0, 1], port).into()).unwrap();

        // Two frames of two samples, split awkwardly across reads
        let source = ScriptedSource {
            chunks: vec![vec![1, 0, 2], vec![0, 3, 0], vec![4, 0, 9]],
        };
        let worker = CaptureWorker::spawn(
            Box::new(source),
            outbound,
            CaptureMode::Codec {
                encoder: Box::new(Linear16::new(2)),
            },
            Duration::from_millis(5),
        )
        .unwrap();

        let received = receive_n(&inbound, 2);
        worker.request_stop();
        worker.join();

        assert_eq!(received.len(), 2);
        let (ts0, payload0) = protocol::decode(&received[0]).unwrap();
        let (ts1, payload1) = protocol::decode(&received[1]).unwrap();
        assert_eq!((ts0, payload0), (0, &[1u8, 0, 2, 0][..]));
        assert_eq!((ts1, payload1), (2, &[3u8, 0, 4, 0][..]));
    }

    #[test]
    fn test_stop_is_prompt_when_idle() {
        let inbound = bind_inbound(0, Duration::from_millis(10)).unwrap();
        let port = inbound.local_addr().unwrap().port();
        let outbound = bind_outbound(([127, 0, 0, 1], port).into()).unwrap();

        let worker = CaptureWorker::spawn(
            Box::new(ScriptedSource { chunks: Vec::new() }),
            outbound,
            CaptureMode::Raw {
                chunk_bytes: 16,
                send_delay: Duration::from_millis(50),
            },
            Duration::from_millis(5),
        )
        .unwrap();

        let started = Instant::now();
        worker.request_stop();
        let stats = worker.join();
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(stats, CaptureStats::default());
    }
}
