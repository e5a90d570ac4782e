//! Link configuration
//!
//! All settings live in [`AppConfig`], which can be loaded from a TOML file
//! and then overridden from the command line. Defaults follow the classic
//! 16-bit / 16 kHz / mono voice profile.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::ConfigError;
use crate::protocol::PacketHeader;

/// Transport mode of the link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkMode {
    /// PCM blocks sent verbatim, no header
    Raw,
    /// Framed codec packets fed through the jitter buffer
    Codec,
}

/// Frame codec used in [`LinkMode::Codec`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    Opus,
    /// Uncompressed little-endian i16 frames
    Linear16,
}

/// PCM format shared by capture source and output device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub bits_per_sample: u16,
    pub sample_rate: u32,
    pub channels: u16,
    /// Output device name override; `None` picks the host default
    pub device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            bits_per_sample: DEFAULT_BITS_PER_SAMPLE,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
            device: None,
        }
    }
}

impl AudioConfig {
    /// Bytes occupied by one sample across all channels
    pub fn bytes_per_frame(&self) -> usize {
        (self.bits_per_sample as usize / 8) * self.channels as usize
    }
}

/// Peer addressing and socket behaviour
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub remote_host: String,
    pub remote_port: u16,
    pub local_port: u16,
    /// Longest time a receive call waits for a datagram before returning
    pub recv_poll_ms: u64,
    /// Receive buffer size; larger datagrams are truncated by the OS
    pub max_datagram: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            remote_host: "127.0.0.1".to_string(),
            remote_port: DEFAULT_UDP_PORT,
            local_port: DEFAULT_UDP_PORT,
            recv_poll_ms: DEFAULT_POLL_MS,
            max_datagram: MAX_PACKET_SIZE,
        }
    }
}

impl NetworkConfig {
    pub fn recv_poll(&self) -> Duration {
        Duration::from_millis(self.recv_poll_ms.max(1))
    }
}

/// Codec settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodecConfig {
    pub mode: LinkMode,
    pub kind: CodecKind,
    /// Frame duration in milliseconds
    pub frame_ms: u32,
    /// Target bitrate in bits per second
    pub bitrate: u32,
    /// In-band forward error correction
    pub fec: bool,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            mode: LinkMode::Codec,
            kind: CodecKind::Opus,
            frame_ms: DEFAULT_FRAME_MS,
            bitrate: DEFAULT_BITRATE,
            fec: false,
        }
    }
}

impl CodecConfig {
    /// Calculate frame size in samples from a duration
    pub fn frame_size_from_ms(sample_rate: u32, ms: u32) -> usize {
        (sample_rate as u64 * ms as u64 / 1000) as usize
    }
}

/// Receive-side playback settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Upper bound on a single playback wait when no audio is queued
    pub starvation_timeout_ms: u64,
    /// Frames the jitter buffer holds ahead of its cursor
    pub jitter_capacity: usize,
    /// Playout delay, in frames, applied when a stream is first heard
    pub jitter_delay_frames: u32,
    /// Consecutive late frames before the jitter buffer re-latches; 0 disables
    pub jitter_resync_frames: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            starvation_timeout_ms: DEFAULT_STARVATION_TIMEOUT_MS,
            jitter_capacity: DEFAULT_JITTER_CAPACITY,
            jitter_delay_frames: DEFAULT_JITTER_DELAY_FRAMES,
            jitter_resync_frames: DEFAULT_JITTER_RESYNC_FRAMES,
        }
    }
}

impl PlaybackConfig {
    pub fn starvation_timeout(&self) -> Duration {
        Duration::from_millis(self.starvation_timeout_ms)
    }
}

/// Capture-side settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Largest PCM chunk sent per datagram in raw mode
    pub raw_chunk_bytes: usize,
    /// Pause after every raw-mode send
    pub raw_send_delay_ms: u64,
    /// Longest time one capture read waits for input
    pub poll_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            raw_chunk_bytes: RAW_CHUNK_BYTES,
            raw_send_delay_ms: RAW_SEND_DELAY_MS,
            poll_ms: DEFAULT_POLL_MS,
        }
    }
}

impl CaptureConfig {
    pub fn raw_send_delay(&self) -> Duration {
        Duration::from_millis(self.raw_send_delay_ms)
    }

    pub fn poll(&self) -> Duration {
        Duration::from_millis(self.poll_ms.max(1))
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub network: NetworkConfig,
    pub codec: CodecConfig,
    pub playback: PlaybackConfig,
    pub capture: CaptureConfig,
    /// Per-packet diagnostics at startup
    pub verbose: bool,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Per-user config file location, if the platform has one
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "voicelink")
            .map(|dirs| dirs.config_dir().join("voicelink.toml"))
    }

    /// Samples per channel in one codec frame
    pub fn frame_size(&self) -> usize {
        CodecConfig::frame_size_from_ms(self.audio.sample_rate, self.codec.frame_ms)
    }

    /// Bytes of PCM in one codec frame
    pub fn frame_bytes(&self) -> usize {
        self.frame_size() * self.audio.bytes_per_frame()
    }

    /// Reject configurations the engine cannot run
    /// Largest datagram the sender can emit in the configured mode
    pub fn max_packet_bytes(&self) -> usize {
        match self.codec.mode {
            LinkMode::Raw => self.capture.raw_chunk_bytes,
            LinkMode::Codec => {
                let payload = match self.codec.kind {
                    CodecKind::Opus => MAX_COMPRESSED_FRAME,
                    CodecKind::Linear16 => self.frame_bytes(),
                };
                PacketHeader::SIZE + payload
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let audio = &self.audio;

        if !matches!(audio.bits_per_sample, 8 | 16 | 24 | 32) {
            return Err(ConfigError::UnsupportedBits(audio.bits_per_sample));
        }
        if audio.channels == 0 {
            return Err(ConfigError::UnsupportedChannels(audio.channels));
        }
        if audio.sample_rate == 0 {
            return Err(ConfigError::UnsupportedRate(audio.sample_rate));
        }
        if self.network.remote_port == 0 {
            return Err(ConfigError::Invalid("remote port must be non-zero".into()));
        }
        if self.network.local_port == 0 {
            return Err(ConfigError::Invalid("local port must be non-zero".into()));
        }
        if self.network.max_datagram > MAX_UDP_PAYLOAD {
            return Err(ConfigError::Invalid(format!(
                "receive buffer of {} bytes exceeds the {}-byte UDP limit",
                self.network.max_datagram, MAX_UDP_PAYLOAD
            )));
        }

        match self.codec.mode {
            LinkMode::Raw => {
                if self.capture.raw_chunk_bytes == 0 {
                    return Err(ConfigError::Invalid("raw chunk size must be non-zero".into()));
                }
                if self.capture.raw_chunk_bytes > self.network.max_datagram {
                    return Err(ConfigError::Invalid(format!(
                        "raw chunk of {} bytes exceeds the {}-byte receive buffer",
                        self.capture.raw_chunk_bytes, self.network.max_datagram
                    )));
                }
            }
            LinkMode::Codec => {
                if audio.channels != 1 {
                    return Err(ConfigError::UnsupportedChannels(audio.channels));
                }
                if audio.bits_per_sample != 16 {
                    return Err(ConfigError::UnsupportedBits(audio.bits_per_sample));
                }
                if self.playback.jitter_capacity == 0 {
                    return Err(ConfigError::Invalid("jitter capacity must be non-zero".into()));
                }
                if self.playback.jitter_delay_frames as usize >= self.playback.jitter_capacity {
                    return Err(ConfigError::Invalid(
                        "jitter delay must be shorter than the jitter capacity".into(),
                    ));
                }
                if self.codec.kind == CodecKind::Opus {
                    if !OPUS_SAMPLE_RATES.contains(&audio.sample_rate) {
                        return Err(ConfigError::UnsupportedRate(audio.sample_rate));
                    }
                    if !OPUS_FRAME_MS.contains(&self.codec.frame_ms) {
                        return Err(ConfigError::UnsupportedFrame(self.codec.frame_ms));
                    }
                }
                if self.frame_size() == 0 {
                    return Err(ConfigError::UnsupportedFrame(self.codec.frame_ms));
                }
                if self.max_packet_bytes() > self.network.max_datagram {
                    return Err(ConfigError::Invalid(format!(
                        "codec packets of up to {} bytes exceed the {}-byte receive buffer",
                        self.max_packet_bytes(),
                        self.network.max_datagram
                    )));
                }
            }
        }

        Ok(())
    }
}
