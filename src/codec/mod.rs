//! Frame codecs
//!
//! The engine treats the codec as a pluggable transform between fixed-size
//! frames of 16-bit PCM and opaque compressed payloads. Opus is the default;
//! `Linear16` carries the samples uncompressed.

#[cfg(feature = "opus-codec")]
pub mod decoder;
#[cfg(feature = "opus-codec")]
pub mod encoder;
pub mod linear;

#[cfg(feature = "opus-codec")]
pub use decoder::OpusDecoder;
#[cfg(feature = "opus-codec")]
pub use encoder::OpusEncoder;
pub use linear::Linear16;

use bytes::Bytes;

use crate::config::{AppConfig, CodecKind};
use crate::error::CodecError;

/// PCM frame to compressed payload
pub trait FrameEncoder: Send {
    /// Encode exactly [`frame_size`](Self::frame_size) samples
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError>;

    /// Samples per frame
    fn frame_size(&self) -> usize;
}

/// Compressed payload to PCM frame
pub trait FrameDecoder: Send {
    /// Decode one received payload
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>, CodecError>;

    /// Synthesize one frame when nothing arrived in time
    fn conceal(&mut self) -> Result<Vec<i16>, CodecError>;

    /// Samples per frame
    fn frame_size(&self) -> usize;
}

/// Build the encoder/decoder pair selected by the configuration
pub fn build_codec(
    config: &AppConfig,
) -> Result<(Box<dyn FrameEncoder>, Box<dyn FrameDecoder>), CodecError> {
    let frame_size = config.frame_size();
    match config.codec.kind {
        CodecKind::Linear16 => Ok((
            Box::new(Linear16::new(frame_size)),
            Box::new(Linear16::new(frame_size)),
        )),
        #[cfg(feature = "opus-codec")]
        CodecKind::Opus => {
            let encoder = OpusEncoder::new(config)?;
            let decoder = OpusDecoder::new(config.audio.sample_rate, frame_size)?;
            Ok((Box::new(encoder), Box::new(decoder)))
        }
        #[cfg(not(feature = "opus-codec"))]
        CodecKind::Opus => Err(CodecError::Unavailable("opus")),
    }
}

/// Reinterpret little-endian PCM bytes as i16 samples
pub fn samples_from_le_bytes(pcm: &[u8]) -> Vec<i16> {
    pcm.chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}
