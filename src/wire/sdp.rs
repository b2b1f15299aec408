//! SDP session body codec.
//!
//! A fixed binary block (identity, transport, media description,
//! packetization control) followed by two length-prefixed strings for the
//! device name and originator location. The announcement hash is computed
//! over these bytes only.

use std::net::Ipv4Addr;

use crate::error::{AoipError, AoipResult};
use crate::wire::{MAX_ANNOUNCEMENT, SAP_HEADER_SIZE};

/// Fixed-field prefix length, before the two string fields.
const FIXED_LEN: usize = 4 + 4 + 4 + 2 + 4 + 4 + 1 + 1 + 1 + 1 + 1;

/// Minimum body length: fixed fields plus two zero-length strings.
const MIN_BODY: usize = FIXED_LEN + 2;

/// Session description carried inside a SAP announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpBody {
    pub session_id: u32,
    /// Monotonic description version; receivers discard lower-or-equal.
    pub session_ver: u32,
    pub transmitter_ip: Ipv4Addr,
    pub transmitter_port: u16,
    pub multicast_group: Ipv4Addr,
    pub sample_rate: u32,
    pub channels: u8,
    /// Sample width in bytes, at most 3.
    pub byte_depth: u8,
    pub pack_samples: u8,
    pub frame_samples: u8,
    /// First channel in the absolute channel space.
    pub channel_offset: u8,
    pub device_name: String,
    pub session_loc: String,
}

impl SdpBody {
    /// Encodes the body, enforcing the whole-announcement size cap.
    pub fn encode(&self) -> AoipResult<Vec<u8>> {
        let name = self.device_name.as_bytes();
        let loc = self.session_loc.as_bytes();
        if name.len() > u8::MAX as usize || loc.len() > u8::MAX as usize {
            return Err(AoipError::ConfigurationInvalid {
                reason: "device name or session location exceeds 255 bytes",
            });
        }

        let body_len = FIXED_LEN + 1 + name.len() + 1 + loc.len();
        if SAP_HEADER_SIZE + body_len > MAX_ANNOUNCEMENT {
            return Err(AoipError::ConfigurationInvalid {
                reason: "announcement exceeds the 1024-byte packet cap",
            });
        }

        let mut out = Vec::with_capacity(body_len);
        out.extend_from_slice(&self.session_id.to_be_bytes());
        out.extend_from_slice(&self.session_ver.to_be_bytes());
        out.extend_from_slice(&self.transmitter_ip.octets());
        out.extend_from_slice(&self.transmitter_port.to_be_bytes());
        out.extend_from_slice(&self.multicast_group.octets());
        out.extend_from_slice(&self.sample_rate.to_be_bytes());
        out.push(self.channels);
        out.push(self.byte_depth);
        out.push(self.pack_samples);
        out.push(self.frame_samples);
        out.push(self.channel_offset);
        out.push(name.len() as u8);
        out.extend_from_slice(name);
        out.push(loc.len() as u8);
        out.extend_from_slice(loc);
        Ok(out)
    }

    /// Decodes a body, validating length at every variable-size step.
    pub fn decode(buf: &[u8]) -> AoipResult<Self> {
        if buf.len() < MIN_BODY {
            return Err(AoipError::MalformedPacket {
                actual: buf.len(),
                required: MIN_BODY,
            });
        }

        let session_id = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let session_ver = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let transmitter_ip = Ipv4Addr::new(buf[8], buf[9], buf[10], buf[11]);
        let transmitter_port = u16::from_be_bytes([buf[12], buf[13]]);
        let multicast_group = Ipv4Addr::new(buf[14], buf[15], buf[16], buf[17]);
        let sample_rate = u32::from_be_bytes([buf[18], buf[19], buf[20], buf[21]]);
        let channels = buf[22];
        let byte_depth = buf[23];
        let pack_samples = buf[24];
        let frame_samples = buf[25];
        let channel_offset = buf[26];

        let mut cursor = FIXED_LEN;
        let device_name = read_string(buf, &mut cursor)?;
        let session_loc = read_string(buf, &mut cursor)?;

        Ok(Self {
            session_id,
            session_ver,
            transmitter_ip,
            transmitter_port,
            multicast_group,
            sample_rate,
            channels,
            byte_depth,
            pack_samples,
            frame_samples,
            channel_offset,
            device_name,
            session_loc,
        })
    }
}

fn read_string(buf: &[u8], cursor: &mut usize) -> AoipResult<String> {
    let len_at = *cursor;
    if len_at >= buf.len() {
        return Err(AoipError::MalformedPacket {
            actual: buf.len(),
            required: len_at + 1,
        });
    }
    let len = buf[len_at] as usize;
    let end = len_at + 1 + len;
    if end > buf.len() {
        return Err(AoipError::MalformedPacket {
            actual: buf.len(),
            required: end,
        });
    }
    *cursor = end;
    Ok(String::from_utf8_lossy(&buf[len_at + 1..end]).into_owned())
}
