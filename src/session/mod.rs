//! Session model: lifecycle states, descriptors and the live session record.

pub mod registry;

use std::net::{Ipv4Addr, UdpSocket};
use std::time::Instant;

pub use registry::{SessionRegistry, RX_CAPACITY, TX_CAPACITY};

use crate::wire::{self, SapFlags, SapHeader, SdpBody};

/// Which fixed-capacity pool a session lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Remote sessions we may receive from (capacity 128).
    Receive,
    /// Locally-originated sessions we announce and transmit (capacity 16).
    Transmit,
}

/// Session lifecycle state.
///
/// `PendingConfig` is a side-state out of `WaitOpen`, entered when a received
/// description is incomplete and a follow-up announcement is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Invalid,
    PendingInit,
    WaitOpen,
    Open,
    WaitClose,
    Closed,
    PendingConfig,
}

impl SessionState {
    /// States that count as live pool occupancy.
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Invalid | Self::Closed)
    }
}

/// Stable handle into a session pool. Slots are reused, so handles are
/// indices, never addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle {
    pub pool: PoolKind,
    pub index: usize,
}

/// Parameters needed to create a session.
#[derive(Debug, Clone)]
pub struct SessionDescriptor {
    pub device_name: String,
    pub session_id: u32,
    pub session_ver: u32,
    pub session_loc: String,
    pub transmitter_ip: Ipv4Addr,
    pub transmitter_port: u16,
    pub multicast_group: Ipv4Addr,
    pub sample_rate: u32,
    pub channels: u8,
    pub byte_depth: u8,
    pub pack_samples: u8,
    pub channel_offset: u8,
}

impl SessionDescriptor {
    /// Builds a descriptor from a received SDP body.
    pub fn from_sdp(body: &SdpBody) -> Self {
        Self {
            device_name: body.device_name.clone(),
            session_id: body.session_id,
            session_ver: body.session_ver,
            session_loc: body.session_loc.clone(),
            transmitter_ip: body.transmitter_ip,
            transmitter_port: body.transmitter_port,
            multicast_group: body.multicast_group,
            sample_rate: body.sample_rate,
            channels: body.channels,
            byte_depth: body.byte_depth,
            pack_samples: body.pack_samples,
            channel_offset: body.channel_offset,
        }
    }
}

/// One live or discovered stream session.
pub struct Session {
    // Identity
    pub device_name: String,
    pub session_id: u32,
    pub session_ver: u32,
    pub session_loc: String,

    // Transport
    pub transmitter_ip: Ipv4Addr,
    pub transmitter_port: u16,
    pub multicast_group: Ipv4Addr,
    pub socket: Option<UdpSocket>,

    // Media description
    pub sample_rate: u32,
    pub channels: u8,
    pub byte_depth: u8,

    // Packetization control
    pub pack_samples: u8,
    pub frame_samples: u8,
    pub packet_per_frame: u8,
    pub packet_index: u8,

    // Streaming cursor
    pub seq: u16,
    /// Receive side: next expected sequence number. `None` until the first
    /// packet syncs the cursor to wherever the transmitter is.
    pub expected_seq: Option<u16>,
    pub sample_index: u16,
    pub timestamp: u32,

    pub state: SessionState,
    pub channel_offset: u8,

    /// Receive side: the application has opted into this stream.
    pub subscribed: bool,

    // Raw caches: last built/parsed announcement bytes and their hash,
    // so re-announcement and change detection skip re-encoding.
    pub cached_announcement: Vec<u8>,
    pub cached_hash: u16,

    // Loss accounting, logged but never retried.
    pub seq_gaps: u64,
    pub stale_drops: u64,

    pub last_announced: Option<Instant>,
    pub announced_at: Option<Instant>,
}

impl Session {
    pub fn from_descriptor(desc: &SessionDescriptor) -> Self {
        Self {
            device_name: desc.device_name.clone(),
            session_id: desc.session_id,
            session_ver: desc.session_ver,
            session_loc: desc.session_loc.clone(),
            transmitter_ip: desc.transmitter_ip,
            transmitter_port: desc.transmitter_port,
            multicast_group: desc.multicast_group,
            socket: None,
            sample_rate: desc.sample_rate,
            channels: desc.channels,
            byte_depth: desc.byte_depth,
            pack_samples: desc.pack_samples,
            frame_samples: 0,
            packet_per_frame: 0,
            packet_index: 0,
            seq: 0,
            expected_seq: None,
            sample_index: 0,
            timestamp: 0,
            state: SessionState::PendingInit,
            channel_offset: desc.channel_offset,
            subscribed: false,
            cached_announcement: Vec::new(),
            cached_hash: 0,
            seq_gaps: 0,
            stale_drops: 0,
            last_announced: None,
            announced_at: None,
        }
    }

    /// A description is complete when every field the depacketizer needs is
    /// present and self-consistent.
    pub fn media_complete(&self) -> bool {
        self.channels > 0
            && (1..=3).contains(&self.byte_depth)
            && self.pack_samples > 0
            && self.sample_rate > 0
            && self.channel_offset as u16 + self.channels as u16 <= 128
    }

    /// Replaces the media description from a newer announcement and resets
    /// the derived packetization fields.
    pub fn apply_description(&mut self, body: &SdpBody) {
        self.session_ver = body.session_ver;
        self.session_loc = body.session_loc.clone();
        self.transmitter_ip = body.transmitter_ip;
        self.transmitter_port = body.transmitter_port;
        self.multicast_group = body.multicast_group;
        self.sample_rate = body.sample_rate;
        self.channels = body.channels;
        self.byte_depth = body.byte_depth;
        self.pack_samples = body.pack_samples;
        self.frame_samples = body.frame_samples;
        self.channel_offset = body.channel_offset;
        self.packet_per_frame = 0;
        self.packet_index = 0;
        self.expected_seq = None;
    }

    /// Derives `packet_per_frame` from the announced frame and pack sizes.
    /// Returns `false` when the frame does not slice into whole packets,
    /// leaving the session unusable for the depacketizer.
    pub fn derive_packetization(&mut self) -> bool {
        if self.pack_samples == 0
            || self.frame_samples == 0
            || self.frame_samples % self.pack_samples != 0
        {
            self.packet_per_frame = 0;
            return false;
        }
        self.packet_per_frame = self.frame_samples / self.pack_samples;
        true
    }

    /// Current description as an SDP body.
    pub fn sdp_body(&self) -> SdpBody {
        SdpBody {
            session_id: self.session_id,
            session_ver: self.session_ver,
            transmitter_ip: self.transmitter_ip,
            transmitter_port: self.transmitter_port,
            multicast_group: self.multicast_group,
            sample_rate: self.sample_rate,
            channels: self.channels,
            byte_depth: self.byte_depth,
            pack_samples: self.pack_samples,
            frame_samples: self.frame_samples,
            channel_offset: self.channel_offset,
            device_name: self.device_name.clone(),
            session_loc: self.session_loc.clone(),
        }
    }

    /// Builds (or reuses) the full SAP+SDP announcement for this session.
    ///
    /// The add-message bytes are cached; a change in the description must
    /// bump `session_ver` and call [`Self::invalidate_announcement`].
    pub fn announcement(
        &mut self,
        local_ip: Ipv4Addr,
        delete: bool,
    ) -> crate::error::AoipResult<Vec<u8>> {
        if !delete && !self.cached_announcement.is_empty() {
            return Ok(self.cached_announcement.clone());
        }

        let body = self.sdp_body().encode()?;
        let hash = wire::body_hash(&body);
        let flags = if delete {
            SapFlags::delete()
        } else {
            SapFlags::announce()
        };

        let mut packet = Vec::with_capacity(wire::SAP_HEADER_SIZE + body.len());
        SapHeader::new(flags, hash, local_ip).encode(&mut packet);
        packet.extend_from_slice(&body);

        if !delete {
            self.cached_hash = hash;
            self.cached_announcement = packet.clone();
        }
        Ok(packet)
    }

    pub fn invalidate_announcement(&mut self) {
        self.cached_announcement.clear();
        self.cached_hash = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> SessionDescriptor {
        SessionDescriptor {
            device_name: "console".into(),
            session_id: 7,
            session_ver: 1,
            session_loc: "aoip://console/0".into(),
            transmitter_ip: Ipv4Addr::new(10, 0, 0, 2),
            transmitter_port: 5004,
            multicast_group: Ipv4Addr::new(239, 69, 83, 7),
            sample_rate: 48_000,
            channels: 16,
            byte_depth: 3,
            pack_samples: 16,
            channel_offset: 0,
        }
    }

    #[test]
    fn new_session_starts_pending_init() {
        let session = Session::from_descriptor(&descriptor());
        assert_eq!(session.state, SessionState::PendingInit);
        assert!(session.media_complete());
    }

    #[test]
    fn out_of_range_channels_are_incomplete() {
        let mut desc = descriptor();
        desc.channel_offset = 120;
        desc.channels = 16;
        let session = Session::from_descriptor(&desc);
        assert!(!session.media_complete());
    }

    #[test]
    fn announcement_is_cached_until_invalidated() {
        let mut session = Session::from_descriptor(&descriptor());
        let ip = Ipv4Addr::new(10, 0, 0, 2);

        let first = session.announcement(ip, false).unwrap();
        let again = session.announcement(ip, false).unwrap();
        assert_eq!(first, again);
        assert_ne!(session.cached_hash, 0);

        session.session_ver += 1;
        session.invalidate_announcement();
        let rebuilt = session.announcement(ip, false).unwrap();
        assert_ne!(first, rebuilt);
    }

    #[test]
    fn delete_announcement_does_not_disturb_cache() {
        let mut session = Session::from_descriptor(&descriptor());
        let ip = Ipv4Addr::new(10, 0, 0, 2);
        let add = session.announcement(ip, false).unwrap();
        let del = session.announcement(ip, true).unwrap();
        assert_ne!(add, del);
        assert_eq!(session.announcement(ip, false).unwrap(), add);
    }
}
