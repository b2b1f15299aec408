//! Wire codecs for the announcement and transport protocols.
//!
//! Everything here is a byte-exact, endianness-explicit layout: the SAP
//! announcement envelope ([`sap`]), the SDP session body ([`sdp`]) and the
//! RTP-like transport packet ([`rtp`]). All multi-byte fields are big-endian
//! and the SAP flags byte is packed through explicit bit masks, never native
//! bit-field layout.

pub mod rtp;
pub mod sap;
pub mod sdp;

pub use rtp::{RtpHeader, RTP_HEADER_SIZE};
pub use sap::{SapFlags, SapHeader, SAP_HEADER_SIZE, SAP_VERSION};
pub use sdp::SdpBody;

/// Maximum size of a full SAP+SDP announcement packet.
pub const MAX_ANNOUNCEMENT: usize = 1024;

/// Maximum total samples carried by one transport packet.
pub const MAX_SAMPLES: usize = 384;

/// CRC-16/CCITT-FALSE, used as the announcement body fingerprint.
///
/// Computed over the SDP body only, never the SAP header, so an unchanged
/// session always yields the same hash across announcement cycles.
pub fn body_hash(body: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in body {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}
