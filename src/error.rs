//! Error types for the voice link

use thiserror::Error;

/// Main error type for the library
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Packet format error: {0}")]
    Format(#[from] FormatError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio subsystem errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to open stream: {0}")]
    StreamError(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Output device closed")]
    SinkClosed,

    #[error("cpal error: {0}")]
    CpalError(String),
}

/// Codec errors
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Encoder initialization failed: {0}")]
    EncoderInit(String),

    #[error("Decoder initialization failed: {0}")]
    DecoderInit(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Invalid frame size: {0}")]
    InvalidFrameSize(usize),

    #[error("Codec not available in this build: {0}")]
    Unavailable(&'static str),
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Address resolution failed for {addr}: {reason}")]
    Resolve { addr: String, reason: String },

    #[error("Socket bind failed on port {port}: {source}")]
    BindFailed {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket setup failed: {0}")]
    Socket(#[source] std::io::Error),

    #[error("Send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    #[error("Receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),
}

/// Wire framing errors, one kind per reason a datagram is rejected
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    #[error("datagram truncated: {len} bytes, header needs {needed}")]
    Truncated { len: usize, needed: usize },

    #[error("bad signature: {found:#010x}")]
    BadSignature { found: u32 },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unsupported number of channels: {0}")]
    UnsupportedChannels(u16),

    #[error("Unsupported bits per sample: {0}")]
    UnsupportedBits(u16),

    #[error("Unsupported sample rate for the selected codec: {0}")]
    UnsupportedRate(u32),

    #[error("Unsupported frame duration: {0} ms")]
    UnsupportedFrame(u32),

    #[error("Invalid value: {0}")]
    Invalid(String),

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
