//! Capture sources
//!
//! A capture source is a stream of raw PCM bytes. Reads never block longer
//! than the caller's poll interval, which is what lets the capture thread
//! notice a stop request promptly.

use std::io::{self, Read};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use tracing::{debug, info, warn};

/// Chunks buffered between the reader thread and the capture thread
const READ_AHEAD_CHUNKS: usize = 64;

/// Readable stream of raw PCM
pub trait CaptureSource: Send {
    /// Copy available PCM into `buf`, waiting at most `wait` for some to
    /// arrive. `Ok(0)` means nothing was available.
    fn read(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<usize>;
}

/// Capture source backed by any blocking reader (stdin, a file, a pipe)
///
/// A dedicated thread performs the blocking reads and hands chunks over a
/// bounded channel; the capture side only ever waits on the channel.
pub struct ReaderSource {
    chunks: Receiver<Bytes>,
    /// Remainder of a chunk larger than the caller's buffer
    pending: Bytes,
    exhausted: bool,
    // Detached on drop: a blocking read cannot be interrupted. The thread
    // exits on its next read once the receiver is gone.
    _reader: JoinHandle<()>,
}

impl ReaderSource {
    /// Start reading `reader` in `chunk_size` pieces
    pub fn spawn<R>(mut reader: R, chunk_size: usize) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = bounded::<Bytes>(READ_AHEAD_CHUNKS);
        let chunk_size = chunk_size.max(1);

        let handle = thread::Builder::new()
            .name("capture-reader".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; chunk_size];
                loop {
                    match reader.read(&mut buf) {
                        Ok(0) => {
                            debug!("Capture input reached end of stream");
                            break;
                        }
                        Ok(n) => {
                            if tx.send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                                break;
                            }
                        }
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => {
                            warn!("Capture input read failed: {}", e);
                            break;
                        }
                    }
                }
            })?;

        Ok(Self {
            chunks: rx,
            pending: Bytes::new(),
            exhausted: false,
            _reader: handle,
        })
    }

    /// Capture from the process's standard input
    pub fn stdin(chunk_size: usize) -> io::Result<Self> {
        Self::spawn(io::stdin(), chunk_size)
    }

    fn drain_pending(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.pending.len());
        buf[..n].copy_from_slice(&self.pending.split_to(n));
        n
    }
}

impl CaptureSource for ReaderSource {
    fn read(&mut self, buf: &mut [u8], wait: Duration) -> io::Result<usize> {
        if !self.pending.is_empty() {
            return Ok(self.drain_pending(buf));
        }

        if self.exhausted {
            thread::sleep(wait);
            return Ok(0);
        }

        match self.chunks.recv_timeout(wait) {
            Ok(chunk) => {
                self.pending = chunk;
                Ok(self.drain_pending(buf))
            }
            Err(RecvTimeoutError::Timeout) => Ok(0),
            Err(RecvTimeoutError::Disconnected) => {
                info!("Capture source exhausted, sending nothing further");
                self.exhausted = true;
                Ok(0)
            }
        }
    }
}
