//! Opus encoder wrapper
//!
//! Mono VoIP encoding of fixed-size 16-bit frames.

use bytes::Bytes;
use opus::{Application, Channels, Encoder};

use super::FrameEncoder;
use crate::config::AppConfig;
use crate::constants::MAX_COMPRESSED_FRAME;
use crate::error::CodecError;

/// Opus encoder wrapper with voice settings
pub struct OpusEncoder {
    encoder: Encoder,
    frame_size: usize,
    /// Encoding buffer (reused to avoid allocations)
    encode_buffer: Vec<u8>,
    frames_encoded: u64,
    bytes_produced: u64,
}

impl OpusEncoder {
    /// Create an encoder for the configured sample rate, frame and bitrate
    pub fn new(config: &AppConfig) -> Result<Self, CodecError> {
        if config.audio.channels != 1 {
            return Err(CodecError::EncoderInit(format!(
                "Unsupported channel count: {}",
                config.audio.channels
            )));
        }

        let mut encoder = Encoder::new(config.audio.sample_rate, Channels::Mono, Application::Voip)
            .map_err(|e| CodecError::EncoderInit(e.to_string()))?;

        encoder
            .set_bitrate(opus::Bitrate::Bits(config.codec.bitrate as i32))
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set bitrate: {}", e)))?;

        // Constant bitrate keeps datagram sizes predictable
        encoder
            .set_vbr(false)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set VBR: {}", e)))?;

        encoder
            .set_inband_fec(config.codec.fec)
            .map_err(|e| CodecError::EncoderInit(format!("Failed to set FEC: {}", e)))?;

        Ok(Self {
            encoder,
            frame_size: config.frame_size(),
            encode_buffer: vec![0u8; MAX_COMPRESSED_FRAME],
            frames_encoded: 0,
            bytes_produced: 0,
        })
    }

    pub fn stats(&self) -> EncoderStats {
        EncoderStats {
            frames_encoded: self.frames_encoded,
            bytes_produced: self.bytes_produced,
        }
    }
}

impl FrameEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.frame_size {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }

        let size = self
            .encoder
            .encode(pcm, &mut self.encode_buffer)
            .map_err(|e| CodecError::EncodingFailed(e.to_string()))?;

        self.frames_encoded += 1;
        self.bytes_produced += size as u64;

        Ok(Bytes::copy_from_slice(&self.encode_buffer[..size]))
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Encoder statistics
#[derive(Debug, Clone)]
pub struct EncoderStats {
    pub frames_encoded: u64,
    pub bytes_produced: u64,
}
