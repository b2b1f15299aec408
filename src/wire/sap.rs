//! SAP announcement header codec.
//!
//! The flags byte is read and written through explicit bit-mask constants so
//! the on-wire layout is identical on every host, regardless of byte order.

use std::net::Ipv4Addr;

use crate::error::{AoipError, AoipResult};

/// SAP header size in bytes (flags + auth_len + hash + src_ip + type).
pub const SAP_HEADER_SIZE: usize = 1 + 1 + 2 + 4 + 16;

/// The one protocol version this engine speaks.
pub const SAP_VERSION: u8 = 1;

/// Payload type string carried in the fixed 16-byte `type` field.
pub const PAYLOAD_TYPE: &[u8] = b"application/sdp";

/// Flags byte of the SAP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SapFlags(u8);

impl SapFlags {
    /// Payload is compressed. Reserved, never set by this engine.
    pub const COMPRESSED: u8 = 1 << 0;

    /// Payload is encrypted. Reserved, never set by this engine.
    pub const ENCRYPTED: u8 = 1 << 1;

    /// Message type: set = session deletion, clear = session announcement.
    pub const MSG_DELETE: u8 = 1 << 2;

    /// Reserved bit, must be zero.
    pub const RESERVED: u8 = 1 << 3;

    /// Address type: set = IPv6 originator. This engine is IPv4-only.
    pub const ADDR_V6: u8 = 1 << 4;

    const VERSION_SHIFT: u8 = 5;
    const VERSION_MASK: u8 = 0b111 << Self::VERSION_SHIFT;

    /// Creates flags for an announcement (add) message at [`SAP_VERSION`].
    #[must_use]
    pub const fn announce() -> Self {
        Self((SAP_VERSION << Self::VERSION_SHIFT) & Self::VERSION_MASK)
    }

    /// Creates flags for a deletion message at [`SAP_VERSION`].
    #[must_use]
    pub const fn delete() -> Self {
        Self(Self::announce().0 | Self::MSG_DELETE)
    }

    /// Creates flags from a raw wire byte.
    #[must_use]
    pub const fn from_raw(raw: u8) -> Self {
        Self(raw)
    }

    /// Returns the raw wire byte.
    #[must_use]
    pub const fn raw(self) -> u8 {
        self.0
    }

    /// Extracts the 3-bit version field.
    #[must_use]
    pub const fn version(self) -> u8 {
        (self.0 & Self::VERSION_MASK) >> Self::VERSION_SHIFT
    }

    /// Returns `true` for a deletion message.
    #[must_use]
    pub const fn is_delete(self) -> bool {
        self.0 & Self::MSG_DELETE != 0
    }

    /// Returns `true` if the encrypted bit is set.
    #[must_use]
    pub const fn is_encrypted(self) -> bool {
        self.0 & Self::ENCRYPTED != 0
    }

    /// Returns `true` if the compressed bit is set.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        self.0 & Self::COMPRESSED != 0
    }
}

/// Decoded SAP announcement envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SapHeader {
    pub flags: SapFlags,
    pub auth_len: u8,
    /// CRC-16 fingerprint of the SDP body (see [`super::body_hash`]).
    pub hash: u16,
    pub src_ip: Ipv4Addr,
    /// Payload type, NUL-padded to 16 bytes on the wire.
    pub payload_type: [u8; 16],
}

impl SapHeader {
    /// Builds a header for the given message flags, body hash and source.
    pub fn new(flags: SapFlags, hash: u16, src_ip: Ipv4Addr) -> Self {
        let mut payload_type = [0u8; 16];
        payload_type[..PAYLOAD_TYPE.len()].copy_from_slice(PAYLOAD_TYPE);
        Self {
            flags,
            auth_len: 0,
            hash,
            src_ip,
            payload_type,
        }
    }

    /// Appends the 24-byte wire form to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.flags.raw());
        out.push(self.auth_len);
        out.extend_from_slice(&self.hash.to_be_bytes());
        out.extend_from_slice(&self.src_ip.octets());
        out.extend_from_slice(&self.payload_type);
    }

    /// Decodes a header from the front of `buf`, validating length and the
    /// 3-bit version field.
    pub fn decode(buf: &[u8]) -> AoipResult<Self> {
        if buf.len() < SAP_HEADER_SIZE {
            return Err(AoipError::MalformedPacket {
                actual: buf.len(),
                required: SAP_HEADER_SIZE,
            });
        }

        let flags = SapFlags::from_raw(buf[0]);
        if flags.version() != SAP_VERSION {
            return Err(AoipError::VersionUnsupported {
                found: flags.version(),
            });
        }

        let mut payload_type = [0u8; 16];
        payload_type.copy_from_slice(&buf[8..24]);

        Ok(Self {
            flags,
            auth_len: buf[1],
            hash: u16::from_be_bytes([buf[2], buf[3]]),
            src_ip: Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]),
            payload_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_pack_version_and_type_bit() {
        let add = SapFlags::announce();
        assert_eq!(add.version(), SAP_VERSION);
        assert!(!add.is_delete());

        let del = SapFlags::delete();
        assert_eq!(del.version(), SAP_VERSION);
        assert!(del.is_delete());
        assert_eq!(del.raw() & SapFlags::MSG_DELETE, SapFlags::MSG_DELETE);
    }

    #[test]
    fn header_round_trip() {
        let header = SapHeader::new(SapFlags::announce(), 0xBEEF, Ipv4Addr::new(192, 168, 1, 40));
        let mut wire = Vec::new();
        header.encode(&mut wire);
        assert_eq!(wire.len(), SAP_HEADER_SIZE);

        let decoded = SapHeader::decode(&wire).unwrap();
        assert_eq!(decoded, header);
        assert_eq!(&decoded.payload_type[..PAYLOAD_TYPE.len()], PAYLOAD_TYPE);
    }

    #[test]
    fn truncated_header_is_malformed() {
        let err = SapHeader::decode(&[0u8; 10]).unwrap_err();
        assert_eq!(
            err,
            crate::error::AoipError::MalformedPacket {
                actual: 10,
                required: SAP_HEADER_SIZE
            }
        );
    }

    #[test]
    fn unknown_version_is_rejected() {
        let header = SapHeader::new(SapFlags::announce(), 0, Ipv4Addr::UNSPECIFIED);
        let mut wire = Vec::new();
        header.encode(&mut wire);
        wire[0] = (wire[0] & !SapFlags::VERSION_MASK) | (5 << SapFlags::VERSION_SHIFT);

        assert_eq!(
            SapHeader::decode(&wire).unwrap_err(),
            crate::error::AoipError::VersionUnsupported { found: 5 }
        );
    }
}
