//! # Voice Link
//!
//! Bidirectional real-time point-to-point voice over UDP.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               SESSION                                │
//! │                                                                      │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐                    │
//! │  │  Capture   │──▶│  Encoder   │──▶│  Framer    │──▶ UDP ──▶ peer    │
//! │  │  Source    │   │ (optional) │   │ sig|ts|pay │                    │
//! │  └────────────┘   └────────────┘   └────────────┘                    │
//! │        ▲  Capture Worker thread                                      │
//! │                                                                      │
//! │  peer ──▶ UDP ──▶ Receive/Dispatch Loop (caller's thread)            │
//! │                        │                                             │
//! │          raw mode      │      codec mode                             │
//! │        ┌───────────────┴──────────────┐                              │
//! │        ▼                              ▼                              │
//! │  ┌────────────┐                 ┌────────────┐                       │
//! │  │  Playback  │◀── FrameDue ────│   Jitter   │                       │
//! │  │   Queue    │                 │   Buffer   │                       │
//! │  └─────┬──────┘                 └─────▲──────┘                       │
//! │        │   Playback Worker thread     │ get() per FrameDue           │
//! │        ▼                              │                              │
//! │  ┌────────────┐◀──────────────────────┘                              │
//! │  │ Audio Sink │                                                      │
//! │  └────────────┘                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod network;
pub mod protocol;

pub use config::{AppConfig, LinkMode};
pub use engine::{Session, SessionParts};
pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    /// Default sample rate for capture and playback
    pub const DEFAULT_SAMPLE_RATE: u32 = 16000;

    /// Default channel count (mono)
    pub const DEFAULT_CHANNELS: u16 = 1;

    /// Default sample width
    pub const DEFAULT_BITS_PER_SAMPLE: u16 = 16;

    /// Default codec frame duration, 320 samples at 16 kHz
    pub const DEFAULT_FRAME_MS: u32 = 20;

    /// Default encoder bitrate in bits per second
    pub const DEFAULT_BITRATE: u32 = 28_000;

    /// Default UDP port
    pub const DEFAULT_UDP_PORT: u16 = 5000;

    /// Frame signature at the start of every codec datagram
    pub const PACKET_SIGNATURE: u32 = 0xCAFE_BABE;

    /// Receive buffer size
    pub const MAX_PACKET_SIZE: usize = 8192;

    /// Largest payload an IPv4 UDP datagram can carry
    pub const MAX_UDP_PAYLOAD: usize = 65_507;

    /// Largest compressed frame the encoder may produce
    pub const MAX_COMPRESSED_FRAME: usize = 1500;

    /// PCM chunk size read and sent per datagram in raw mode
    pub const RAW_CHUNK_BYTES: usize = 8192;

    /// Pause after each raw-mode send
    pub const RAW_SEND_DELAY_MS: u64 = 50;

    /// Poll interval for capture reads and socket receives
    pub const DEFAULT_POLL_MS: u64 = 10;

    /// Playback wait bound when nothing is queued
    pub const DEFAULT_STARVATION_TIMEOUT_MS: u64 = 3000;

    /// Frames the jitter buffer accepts ahead of its cursor
    pub const DEFAULT_JITTER_CAPACITY: usize = 64;

    /// Playout delay applied when a stream is first heard, 40 ms at defaults
    pub const DEFAULT_JITTER_DELAY_FRAMES: u32 = 2;

    /// Consecutive late frames before the jitter buffer re-latches
    pub const DEFAULT_JITTER_RESYNC_FRAMES: u32 = 50;

    /// Sample rates libopus accepts
    pub const OPUS_SAMPLE_RATES: [u32; 5] = [8000, 12000, 16000, 24000, 48000];

    /// Frame durations libopus accepts (whole milliseconds)
    pub const OPUS_FRAME_MS: [u32; 5] = [5, 10, 20, 40, 60];
}
