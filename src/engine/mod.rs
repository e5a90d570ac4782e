//! Real-time transport engine
//!
//! A [`Session`] owns every subsystem handle of one call: the sockets, the
//! playback queue, the jitter buffer and both worker threads. The receive
//! loop runs on whichever thread calls [`Session::run`].

pub mod capture;
pub mod dispatch;
pub mod lifecycle;
pub mod playback;
#[cfg(unix)]
pub mod signals;
pub mod worker;

use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info};

pub use capture::{CaptureMode, CaptureStats, CaptureWorker};
pub use dispatch::{DispatchStats, Dispatched, Dispatcher, Route};
pub use lifecycle::{ShutdownPhase, ShutdownProtocol, ShutdownReport};
pub use playback::{PlaybackStats, PlaybackWorker};
#[cfg(unix)]
pub use signals::VerboseSignal;
pub use worker::{StopSignal, Verbosity, WorkerState};

use crate::audio::buffer::{create_shared_queue, SharedPlaybackQueue};
use crate::audio::jitter::{JitterBuffer, JitterConfig, JitterStats, SharedJitter, SharedJitterBuffer};
use crate::audio::sink::AudioSink;
use crate::audio::source::CaptureSource;
use crate::codec::{FrameDecoder, FrameEncoder};
use crate::config::{AppConfig, LinkMode};
use crate::error::{ConfigError, Result};
use crate::network::{bind_inbound, bind_outbound, resolve_remote};

/// Endpoints handed to a session at startup
pub struct SessionParts {
    pub source: Box<dyn CaptureSource>,
    pub sink: Box<dyn AudioSink>,
    /// Required in codec mode, ignored in raw mode
    pub codec: Option<(Box<dyn FrameEncoder>, Box<dyn FrameDecoder>)>,
}

impl SessionParts {
    pub fn new(source: Box<dyn CaptureSource>, sink: Box<dyn AudioSink>) -> Self {
        Self {
            source,
            sink,
            codec: None,
        }
    }

    pub fn with_codec(
        mut self,
        encoder: Box<dyn FrameEncoder>,
        decoder: Box<dyn FrameDecoder>,
    ) -> Self {
        self.codec = Some((encoder, decoder));
        self
    }
}

/// One running voice link
pub struct Session {
    config: AppConfig,
    dispatcher: Dispatcher,
    queue: SharedPlaybackQueue,
    jitter: Option<SharedJitter>,
    capture: Option<CaptureWorker>,
    playback: Option<PlaybackWorker>,
    stop: StopSignal,
    verbose: Verbosity,
    protocol: ShutdownProtocol,
    remote: SocketAddr,
}

impl Session {
    /// Validate `config`, set up the sockets and start both workers
    ///
    /// Any failure here is setup-fatal: nothing has been started that the
    /// caller needs to tear down.
    pub fn start(config: AppConfig, parts: SessionParts) -> Result<Self> {
        config.validate()?;

        let remote = resolve_remote(&config.network.remote_host, config.network.remote_port)?;
        let inbound = bind_inbound(config.network.local_port, config.network.recv_poll())?;
        let outbound = bind_outbound(remote)?;

        let verbose = Verbosity::new(config.verbose);
        let queue = create_shared_queue();
        let SessionParts {
            source,
            sink,
            codec,
        } = parts;

        let (mode, jitter, route) = match config.codec.mode {
            LinkMode::Raw => (
                CaptureMode::Raw {
                    chunk_bytes: config.capture.raw_chunk_bytes,
                    send_delay: config.capture.raw_send_delay(),
                },
                None,
                Route::Raw {
                    queue: queue.clone(),
                },
            ),
            LinkMode::Codec => {
                let (encoder, decoder) = codec.ok_or_else(|| {
                    ConfigError::Invalid("codec mode needs an encoder and a decoder".into())
                })?;
                let jitter: SharedJitter = Arc::new(SharedJitterBuffer::new(JitterBuffer::new(
                    decoder,
                    JitterConfig::from_app(&config),
                )));
                (
                    CaptureMode::Codec { encoder },
                    Some(jitter.clone()),
                    Route::Codec {
                        jitter,
                        queue: queue.clone(),
                    },
                )
            }
        };

        let dispatcher = Dispatcher::new(
            inbound,
            route,
            config.network.max_datagram,
            verbose.clone(),
        );

        let playback = PlaybackWorker::spawn(
            queue.clone(),
            jitter.clone(),
            sink,
            config.playback.starvation_timeout(),
            verbose.clone(),
        )?;
        // A failed capture spawn drops `playback`, which stops and joins it
        let capture = CaptureWorker::spawn(source, outbound, mode, config.capture.poll())?;

        debug!(
            "Session started: {:?} mode, sending to {}, listening on port {}",
            config.codec.mode, remote, config.network.local_port
        );

        Ok(Self {
            config,
            dispatcher,
            queue,
            jitter,
            capture: Some(capture),
            playback: Some(playback),
            stop: StopSignal::new(),
            verbose,
            protocol: ShutdownProtocol::new(),
            remote,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.dispatcher.local_addr()
    }

    /// Handle that ends [`run`](Self::run) when requested
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Handle to the runtime verbosity switch
    pub fn verbosity(&self) -> Verbosity {
        self.verbose.clone()
    }

    /// Flip per-packet diagnostics, returning the new state
    pub fn toggle_verbose(&self) -> bool {
        let enabled = self.verbose.toggle();
        info!("Verbose {}", if enabled { "on" } else { "off" });
        enabled
    }

    /// Entries waiting for the playback thread
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn jitter_stats(&self) -> Option<JitterStats> {
        self.jitter.as_ref().map(|jitter| jitter.stats())
    }

    pub fn shutdown_phase(&self) -> ShutdownPhase {
        self.protocol.phase()
    }

    /// Run the receive loop until the stop signal is requested
    pub fn run(&mut self) -> DispatchStats {
        self.dispatcher.run(&self.stop)
    }

    /// Stop both workers in order and release every resource
    pub fn shutdown(mut self) -> ShutdownReport {
        self.stop_workers()
    }

    fn stop_workers(&mut self) -> ShutdownReport {
        let report = lifecycle::shut_down(
            &mut self.protocol,
            self.capture.take(),
            self.playback.take(),
        );
        debug!("Session closed after {:?}", self.protocol.history());
        report
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.protocol.is_complete() {
            self.stop_workers();
        }
    }
}
