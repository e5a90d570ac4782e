//! Uncompressed frame codec
//!
//! Carries 16-bit little-endian samples verbatim. Useful on links with
//! bandwidth to spare and for exercising the framed path bit-exactly.

use bytes::{BufMut, Bytes, BytesMut};

use super::{samples_from_le_bytes, FrameDecoder, FrameEncoder};
use crate::error::CodecError;

#[derive(Debug, Clone)]
pub struct Linear16 {
    frame_size: usize,
    frames_concealed: u64,
}

impl Linear16 {
    pub fn new(frame_size: usize) -> Self {
        Self {
            frame_size,
            frames_concealed: 0,
        }
    }

    pub fn frames_concealed(&self) -> u64 {
        self.frames_concealed
    }
}

impl FrameEncoder for Linear16 {
    fn encode(&mut self, pcm: &[i16]) -> Result<Bytes, CodecError> {
        if pcm.len() != self.frame_size {
            return Err(CodecError::InvalidFrameSize(pcm.len()));
        }
        let mut buf = BytesMut::with_capacity(pcm.len() * 2);
        for &sample in pcm {
            buf.put_i16_le(sample);
        }
        Ok(buf.freeze())
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

impl FrameDecoder for Linear16 {
    fn decode(&mut self, frame: &[u8]) -> Result<Vec<i16>, CodecError> {
        if frame.len() != self.frame_size * 2 {
            return Err(CodecError::DecodingFailed(format!(
                "expected {} bytes, got {}",
                self.frame_size * 2,
                frame.len()
            )));
        }
        Ok(samples_from_le_bytes(frame))
    }

    fn conceal(&mut self) -> Result<Vec<i16>, CodecError> {
        self.frames_concealed += 1;
        Ok(vec![0; self.frame_size])
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_is_little_endian() {
        let mut codec = Linear16::new(2);
        let encoded = codec.encode(&[1, -2]).unwrap();
        assert_eq!(&encoded[..], &[0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(codec.decode(&encoded).unwrap(), vec![1, -2]);
    }

    #[test]
    fn test_wrong_sizes_rejected() {
        let mut codec = Linear16::new(4);
        assert!(matches!(
            codec.encode(&[0; 3]),
            Err(CodecError::InvalidFrameSize(3))
        ));
        assert!(codec.decode(&[0; 7]).is_err());
    }

    #[test]
    fn test_conceal_is_silence() {
        let mut codec = Linear16::new(320);
        let samples = codec.conceal().unwrap();
        assert_eq!(samples.len(), 320);
        assert!(samples.iter().all(|&s| s == 0));
        assert_eq!(codec.frames_concealed(), 1);
    }
}
