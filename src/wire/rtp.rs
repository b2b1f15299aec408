//! Transport packet header codec.
//!
//! A transport packet is a 10-byte header followed by
//! `pack_samples * channels * byte_depth` interleaved PCM bytes. The ssrc
//! field carries the session ID so packets arriving on the shared receive
//! socket can be routed without per-session sockets.

use crate::error::{AoipError, AoipResult};

/// Transport header size in bytes (seq + timestamp + ssrc).
pub const RTP_HEADER_SIZE: usize = 2 + 4 + 4;

/// Sequenced, timestamped transport packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    /// Wraps at 2^16; gaps signal loss, never retransmission.
    pub seq: u16,
    /// Sample-clock position of the first sample in the payload.
    pub timestamp: u32,
    /// Session ID of the originating transmit session.
    pub ssrc: u32,
}

impl RtpHeader {
    /// Appends the wire form to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
    }

    /// Decodes the header and returns it with the payload slice.
    pub fn decode(buf: &[u8]) -> AoipResult<(Self, &[u8])> {
        if buf.len() < RTP_HEADER_SIZE {
            return Err(AoipError::MalformedPacket {
                actual: buf.len(),
                required: RTP_HEADER_SIZE,
            });
        }
        let header = Self {
            seq: u16::from_be_bytes([buf[0], buf[1]]),
            timestamp: u32::from_be_bytes([buf[2], buf[3], buf[4], buf[5]]),
            ssrc: u32::from_be_bytes([buf[6], buf[7], buf[8], buf[9]]),
        };
        Ok((header, &buf[RTP_HEADER_SIZE..]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_with_payload() {
        let header = RtpHeader {
            seq: 0xFFFF,
            timestamp: 48_000,
            ssrc: 0xDEADBEEF,
        };
        let mut wire = Vec::new();
        header.encode(&mut wire);
        wire.extend_from_slice(&[1, 2, 3, 4]);

        let (decoded, payload) = RtpHeader::decode(&wire).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn truncated_header_is_malformed() {
        assert!(matches!(
            RtpHeader::decode(&[0u8; 9]),
            Err(AoipError::MalformedPacket {
                actual: 9,
                required: RTP_HEADER_SIZE
            })
        ));
    }
}
