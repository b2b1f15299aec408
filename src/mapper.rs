//! Device/channel mapping operations.
//!
//! The application-facing surface for wiring streams: registering named
//! transmit streams, subscribing to discovered remote streams, and the
//! read-only discovery snapshot.

use std::net::Ipv4Addr;

use tracing::info;

use crate::context::AoipContext;
use crate::engine::RTP_PORT;
use crate::error::{AoipError, AoipResult};
use crate::session::{PoolKind, SessionDescriptor, SessionHandle, SessionState};

/// Read-only view of one receive-pool session for discovery UIs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdpStreamInfo {
    pub device_name: String,
    pub session_id: u32,
    pub session_ver: u32,
    pub channels: u8,
    pub channel_offset: u8,
    pub sample_rate: u32,
    pub state: SessionState,
    pub subscribed: bool,
}

impl AoipContext {
    /// Sets the name this endpoint announces itself under.
    pub fn set_device_name(&self, name: &str) {
        self.set_device_name_inner(name);
    }

    /// Sets the first octet used for generated multicast groups.
    pub fn set_ip_prefix(&self, prefix: u8) {
        self.set_ip_prefix_inner(prefix);
    }

    /// Registers a named transmit stream with an explicit channel range.
    ///
    /// The session enters the transmit pool in `PendingInit`; the SAP
    /// announcer picks it up on its next cycle. When no multicast group is
    /// given, one is derived from the configured IP prefix and the channel
    /// offset.
    pub fn create_stream(
        &self,
        name: &str,
        channel_offset: u8,
        channels: u8,
        pack_samples: u8,
        sample_rate: u32,
        multicast_group: Option<Ipv4Addr>,
    ) -> AoipResult<SessionHandle> {
        let group = multicast_group
            .unwrap_or_else(|| Ipv4Addr::new(self.ip_prefix(), 69, 83, channel_offset));

        let desc = SessionDescriptor {
            device_name: name.to_owned(),
            session_id: rand::random::<u32>(),
            session_ver: 1,
            session_loc: format!("aoip://{}/{}", self.device_name(), name),
            transmitter_ip: self.local_ip(),
            transmitter_port: RTP_PORT,
            multicast_group: group,
            sample_rate,
            channels,
            byte_depth: 3,
            pack_samples,
            channel_offset,
        };

        let mut registry = self.registry();
        let handle = registry.create_session(PoolKind::Transmit, &desc)?;
        info!(
            "Transmit stream {name:?} registered: channels [{channel_offset}, {}) -> {group}",
            channel_offset as u16 + channels as u16
        );
        Ok(handle)
    }

    /// Subscribes to a discovered stream by name and absolute channel
    /// offset, promoting it into the actively-buffered set.
    pub fn add_stream(&self, name: &str, channel_offset: u8) -> AoipResult<SessionHandle> {
        let mut registry = self.registry();
        let Some(handle) = registry.find_session(PoolKind::Receive, name, channel_offset) else {
            return Err(AoipError::SessionNotFound {
                name: name.to_owned(),
                channel_offset,
            });
        };
        let session = registry.get_mut(handle).expect("live handle");
        session.subscribed = true;
        info!("Subscribed to {name:?}@{channel_offset}");
        Ok(handle)
    }

    /// Releases every transmit session, used on reconfiguration.
    ///
    /// With an announcer running the sessions drain through `WaitClose` so
    /// listeners get their delete packet; otherwise the slots are reclaimed
    /// immediately.
    pub fn clear_transmission_streams(&self) {
        let drain = self.announcer_running();
        let mut registry = self.registry();
        for handle in registry.live_handles(PoolKind::Transmit) {
            if drain {
                if let Some(session) = registry.get_mut(handle) {
                    session.state = SessionState::WaitClose;
                }
            } else {
                registry.release_session(handle);
            }
        }
        info!(
            "Cleared transmit streams ({})",
            if drain { "draining" } else { "released" }
        );
    }

    /// Snapshot of the receive pool for discovery UIs.
    pub fn sdp_streams(&self) -> Vec<SdpStreamInfo> {
        let registry = self.registry();
        registry
            .live_handles(PoolKind::Receive)
            .into_iter()
            .filter_map(|h| registry.get(h))
            .map(|s| SdpStreamInfo {
                device_name: s.device_name.clone(),
                session_id: s.session_id,
                session_ver: s.session_ver,
                channels: s.channels,
                channel_offset: s.channel_offset,
                sample_rate: s.sample_rate,
                state: s.state,
                subscribed: s.subscribed,
            })
            .collect()
    }

    /// Number of live receive sessions.
    pub fn sdp_count(&self) -> usize {
        self.registry().count(PoolKind::Receive)
    }
}
