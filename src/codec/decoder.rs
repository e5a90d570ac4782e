//! Opus decoder wrapper
//!
//! Provides Opus decoding with packet loss concealment.

use opus::{Channels, Decoder};

use super::FrameDecoder;
use crate::error::CodecError;

/// Opus decoder wrapper
pub struct OpusDecoder {
    decoder: Decoder,
    frame_size: usize,
    /// Decoding buffer (reused to avoid allocations)
    decode_buffer: Vec<i16>,
    frames_decoded: u64,
    frames_lost: u64,
}

impl OpusDecoder {
    /// Create a mono decoder producing `frame_size` samples per frame
    pub fn new(sample_rate: u32, frame_size: usize) -> Result<Self, CodecError> {
        let decoder = Decoder::new(sample_rate, Channels::Mono)
            .map_err(|e| CodecError::DecoderInit(e.to_string()))?;

        // 120ms is the longest packet Opus can carry
        let decode_buffer = vec![0i16; sample_rate as usize * 120 / 1000];

        Ok(Self {
            decoder,
            frame_size,
            decode_buffer,
            frames_decoded: 0,
            frames_lost: 0,
        })
    }

    /// Trim or pad decoder output to exactly one frame
    fn frame_from_buffer(&self, samples: usize) -> Vec<i16> {
        let mut frame = self.decode_buffer[..samples.min(self.frame_size)].to_vec();
        frame.resize(self.frame_size, 0);
        frame
    }

    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            frames_decoded: self.frames_decoded,
            frames_lost: self.frames_lost,
        }
    }
}

impl FrameDecoder for OpusDecoder {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>, CodecError> {
        let samples = self
            .decoder
            .decode(frame, &mut self.decode_buffer, false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        self.frames_decoded += 1;
        Ok(self.frame_from_buffer(samples))
    }

    /// An empty packet asks libopus for packet loss concealment
    fn conceal(&mut self) -> Result<Vec<i16>, CodecError> {
        let samples = self
            .decoder
            .decode(&[], &mut self.decode_buffer[..self.frame_size], false)
            .map_err(|e| CodecError::DecodingFailed(e.to_string()))?;

        self.frames_lost += 1;
        Ok(self.frame_from_buffer(samples))
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

/// Decoder statistics
#[derive(Debug, Clone)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub frames_lost: u64,
}
