//! Shared engine context.
//!
//! The explicit replacement for process-wide mutable state: one
//! [`AoipContext`] is created per selected interface and shared (via `Arc`)
//! by the SAP listen/announce activities, the streaming engine and the
//! application. Registry structure is guarded by a single mutex; the live
//! channel count is mirrored into an atomic so the real-time path never
//! takes the lock.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU16, Ordering};
use std::sync::{Mutex, MutexGuard};

use dashmap::DashMap;
use tracing::info;

use crate::device::Device;
use crate::iface::Interface;
use crate::session::SessionRegistry;

/// Default first octet for generated multicast groups.
pub const DEFAULT_IP_PREFIX: u8 = 239;

/// Shared state for one AoIP endpoint.
pub struct AoipContext {
    interface: Interface,
    device_name: Mutex<String>,
    ip_prefix: AtomicU8,
    registry: Mutex<SessionRegistry>,
    /// Devices by name, written by the listener, read by discovery UIs.
    pub(crate) devices: DashMap<String, Device>,
    /// Sum of open receive-session channels; the one piece of registry
    /// state the streaming hot path reads without locking.
    channel_count: AtomicU16,
    /// Whether a [`crate::sap::SapAnnouncer`] is active; decides between
    /// draining and immediate release on transmit-stream teardown.
    announcer_running: AtomicBool,
}

impl AoipContext {
    /// Binds the context to a caller-selected local interface.
    pub fn new(interface: Interface) -> Self {
        info!(
            "AoIP context bound to {} ({})",
            interface.name, interface.ip
        );
        Self {
            interface,
            device_name: Mutex::new(String::from("aoip-node")),
            ip_prefix: AtomicU8::new(DEFAULT_IP_PREFIX),
            registry: Mutex::new(SessionRegistry::new()),
            devices: DashMap::new(),
            channel_count: AtomicU16::new(0),
            announcer_running: AtomicBool::new(false),
        }
    }

    pub fn interface(&self) -> &Interface {
        &self.interface
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        self.interface.ip
    }

    pub fn device_name(&self) -> String {
        self.device_name.lock().unwrap().clone()
    }

    pub fn ip_prefix(&self) -> u8 {
        self.ip_prefix.load(Ordering::Relaxed)
    }

    pub(crate) fn set_device_name_inner(&self, name: &str) {
        *self.device_name.lock().unwrap() = name.to_owned();
    }

    pub(crate) fn set_ip_prefix_inner(&self, prefix: u8) {
        self.ip_prefix.store(prefix, Ordering::Relaxed);
    }

    pub(crate) fn set_announcer_running(&self, running: bool) {
        self.announcer_running.store(running, Ordering::Relaxed);
    }

    pub(crate) fn announcer_running(&self) -> bool {
        self.announcer_running.load(Ordering::Relaxed)
    }

    /// Serialized access to the session pools. Hold only for structural
    /// changes or per-packet bookkeeping, never across I/O.
    pub fn registry(&self) -> MutexGuard<'_, SessionRegistry> {
        self.registry.lock().unwrap()
    }

    /// Lock-free snapshot of the live receive channel count.
    pub fn channel_count(&self) -> u16 {
        self.channel_count.load(Ordering::Acquire)
    }

    /// Re-derives the atomic channel count from the registry. Call with the
    /// registry guard still in scope after any state transition.
    pub(crate) fn refresh_channel_count(&self, registry: &SessionRegistry) {
        self.channel_count
            .store(registry.open_rx_channels(), Ordering::Release);
    }

    /// Snapshot of known remote devices for discovery UIs.
    pub fn devices(&self) -> Vec<Device> {
        self.devices.iter().map(|d| d.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{PoolKind, SessionState};

    #[test]
    fn channel_count_tracks_open_receive_sessions() {
        let ctx = AoipContext::new(Interface::loopback());
        assert_eq!(ctx.channel_count(), 0);

        let handle = {
            let mut registry = ctx.registry();
            let handle = registry
                .create_session(
                    PoolKind::Receive,
                    &crate::session::SessionDescriptor {
                        device_name: "a".into(),
                        session_id: 1,
                        session_ver: 1,
                        session_loc: String::new(),
                        transmitter_ip: Ipv4Addr::LOCALHOST,
                        transmitter_port: 5004,
                        multicast_group: Ipv4Addr::new(239, 0, 0, 1),
                        sample_rate: 48_000,
                        channels: 12,
                        byte_depth: 3,
                        pack_samples: 16,
                        channel_offset: 0,
                    },
                )
                .unwrap();
            ctx.refresh_channel_count(&registry);
            handle
        };
        assert_eq!(ctx.channel_count(), 0);

        let mut registry = ctx.registry();
        registry.get_mut(handle).unwrap().state = SessionState::Open;
        ctx.refresh_channel_count(&registry);
        drop(registry);
        assert_eq!(ctx.channel_count(), 12);
    }
}
