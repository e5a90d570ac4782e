//! Wire framing for codec-mode datagrams
//!
//! ```text
//! 0        4        8
//! ┌────────┬────────┬──────────────┐
//! │  sig   │   ts   │   payload    │
//! │ u32 BE │ u32 LE │ codec frame  │
//! └────────┴────────┴──────────────┘
//! ```
//!
//! The timestamp is the sender's sample-clock position of the frame's first
//! sample. Receivers only compare it against other timestamps from the same
//! peer, so it is treated as an opaque counter.

use bytes::{BufMut, Bytes, BytesMut};

use crate::constants::PACKET_SIGNATURE;
use crate::error::FormatError;

/// Fixed header in front of every codec payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub signature: u32,
    pub timestamp: u32,
}

impl PacketHeader {
    /// Header size in bytes
    pub const SIZE: usize = 8;

    pub fn new(timestamp: u32) -> Self {
        Self {
            signature: PACKET_SIGNATURE,
            timestamp,
        }
    }

    pub fn write_to(&self, buf: &mut impl BufMut) {
        buf.put_u32(self.signature);
        buf.put_u32_le(self.timestamp);
    }

    /// Parse and validate the header at the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < Self::SIZE {
            return Err(FormatError::Truncated {
                len: bytes.len(),
                needed: Self::SIZE,
            });
        }

        let signature = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        if signature != PACKET_SIGNATURE {
            return Err(FormatError::BadSignature { found: signature });
        }
        let timestamp = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);

        Ok(Self {
            signature,
            timestamp,
        })
    }
}

/// Prepend the header to `payload` in one contiguous buffer
pub fn encode(payload: &[u8], timestamp: u32) -> Bytes {
    let mut buf = BytesMut::with_capacity(PacketHeader::SIZE + payload.len());
    PacketHeader::new(timestamp).write_to(&mut buf);
    buf.put_slice(payload);
    buf.freeze()
}

/// Split a datagram into its timestamp and a view of the payload
pub fn decode(bytes: &[u8]) -> Result<(u32, &[u8]), FormatError> {
    let header = PacketHeader::parse(bytes)?;
    Ok((header.timestamp, &bytes[PacketHeader::SIZE..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_header_layout() {
        let packet = encode(&[0xAA, 0xBB], 0x0102_0304);
        assert_eq!(packet.len(), PacketHeader::SIZE + 2);
        assert_eq!(&packet[..4], &[0xCA, 0xFE, 0xBA, 0xBE]);
        assert_eq!(&packet[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&packet[8..], &[0xAA, 0xBB]);
    }

    #[test]
    fn test_empty_payload() {
        let packet = encode(&[], 640);
        let (timestamp, payload) = decode(&packet).unwrap();
        assert_eq!(timestamp, 640);
        assert!(payload.is_empty());
    }

    #[test]
    fn test_truncated() {
        assert_eq!(
            decode(&[0xCA, 0xFE, 0xBA]),
            Err(FormatError::Truncated { len: 3, needed: 8 })
        );
        assert_eq!(
            decode(&[]),
            Err(FormatError::Truncated { len: 0, needed: 8 })
        );
    }

    #[test]
    fn test_bad_signature() {
        let mut packet = encode(&[1, 2, 3], 0).to_vec();
        packet[0] = 0xDE;
        assert_eq!(
            decode(&packet),
            Err(FormatError::BadSignature { found: 0xDEFE_BABE })
        );
    }

    proptest! {
        #[test]
        fn prop_roundtrip(payload in proptest::collection::vec(any::<u8>(), 0..1500), ts in any::<u32>()) {
            let packet = encode(&payload, ts);
            let (timestamp, decoded) = decode(&packet).unwrap();
            prop_assert_eq!(timestamp, ts);
            prop_assert_eq!(decoded, &payload[..]);
        }

        #[test]
        fn prop_short_buffers_never_yield_payload(bytes in proptest::collection::vec(any::<u8>(), 0..PacketHeader::SIZE)) {
            let is_truncated = matches!(decode(&bytes), Err(FormatError::Truncated { .. }));
            prop_assert!(is_truncated);
        }
    }
}
