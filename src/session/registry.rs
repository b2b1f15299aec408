//! Fixed-capacity session pools with free-list slot reuse.
//!
//! The registry is the one structure shared by the announce, listen and
//! streaming activities; all structural mutation happens under a single
//! registry-wide lock held by the caller ([`crate::context::AoipContext`]).
//! Pool sizes are small and bounded, so identity lookup is a linear scan.

use crate::error::{AoipError, AoipResult};
use crate::session::{PoolKind, Session, SessionDescriptor, SessionHandle, SessionState};

/// Receive pool capacity.
pub const RX_CAPACITY: usize = 128;

/// Transmit pool capacity.
pub const TX_CAPACITY: usize = 16;

struct Pool {
    slots: Vec<Option<Session>>,
    free: Vec<usize>,
}

impl Pool {
    fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            free: (0..capacity).rev().collect(),
        }
    }

    fn live(&self) -> impl Iterator<Item = (usize, &Session)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|s| (i, s)))
            .filter(|(_, s)| s.state.is_live())
    }
}

/// The two fixed session pools.
pub struct SessionRegistry {
    rx: Pool,
    tx: Pool,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            rx: Pool::new(RX_CAPACITY),
            tx: Pool::new(TX_CAPACITY),
        }
    }

    fn pool(&self, kind: PoolKind) -> &Pool {
        match kind {
            PoolKind::Receive => &self.rx,
            PoolKind::Transmit => &self.tx,
        }
    }

    fn pool_mut(&mut self, kind: PoolKind) -> &mut Pool {
        match kind {
            PoolKind::Receive => &mut self.rx,
            PoolKind::Transmit => &mut self.tx,
        }
    }

    /// Allocates a slot for `desc`, validating capacity and that its
    /// absolute channel range does not intersect any live session in the
    /// same pool. On failure no state is mutated.
    pub fn create_session(
        &mut self,
        kind: PoolKind,
        desc: &SessionDescriptor,
    ) -> AoipResult<SessionHandle> {
        let pool = self.pool_mut(kind);

        if pool.free.is_empty() {
            return Err(AoipError::CapacityExceeded {
                pool: kind,
                capacity: pool.slots.len(),
            });
        }

        let new_start = desc.channel_offset as u16;
        let new_end = new_start + desc.channels as u16;
        for (_, session) in pool.live() {
            let start = session.channel_offset as u16;
            let end = start + session.channels as u16;
            if new_start < end && start < new_end {
                return Err(AoipError::OverlappingChannelRange {
                    offset: desc.channel_offset,
                    count: desc.channels,
                });
            }
        }

        let index = pool.free.pop().expect("checked non-empty above");
        pool.slots[index] = Some(Session::from_descriptor(desc));
        Ok(SessionHandle { pool: kind, index })
    }

    /// Linear identity scan by device name and absolute channel offset.
    pub fn find_session(
        &self,
        kind: PoolKind,
        name: &str,
        channel_offset: u8,
    ) -> Option<SessionHandle> {
        self.pool(kind)
            .live()
            .find(|(_, s)| s.device_name == name && s.channel_offset == channel_offset)
            .map(|(index, _)| SessionHandle { pool: kind, index })
    }

    /// Marks the session `Closed`, clears its identity and returns the slot
    /// to the free set.
    pub fn release_session(&mut self, handle: SessionHandle) {
        let pool = self.pool_mut(handle.pool);
        if let Some(slot) = pool.slots.get_mut(handle.index)
            && let Some(session) = slot.as_mut()
        {
            session.state = SessionState::Closed;
            *slot = None;
            pool.free.push(handle.index);
        }
    }

    /// Number of live slots in a pool.
    pub fn count(&self, kind: PoolKind) -> usize {
        self.pool(kind).live().count()
    }

    pub fn get(&self, handle: SessionHandle) -> Option<&Session> {
        self.pool(handle.pool)
            .slots
            .get(handle.index)
            .and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, handle: SessionHandle) -> Option<&mut Session> {
        self.pool_mut(handle.pool)
            .slots
            .get_mut(handle.index)
            .and_then(|s| s.as_mut())
    }

    /// Handles of all live sessions in a pool.
    pub fn live_handles(&self, kind: PoolKind) -> Vec<SessionHandle> {
        self.pool(kind)
            .live()
            .map(|(index, _)| SessionHandle { pool: kind, index })
            .collect()
    }

    /// Sum of channel counts of open receive sessions; mirrored into the
    /// context's atomic counter for the lock-free streaming read.
    pub fn open_rx_channels(&self) -> u16 {
        self.rx
            .live()
            .filter(|(_, s)| s.state == SessionState::Open)
            .map(|(_, s)| s.channels as u16)
            .sum()
    }

    /// Locates a live receive session by its wire ssrc (session ID).
    pub fn find_rx_by_ssrc(&self, ssrc: u32) -> Option<SessionHandle> {
        self.rx
            .live()
            .find(|(_, s)| s.session_id == ssrc)
            .map(|(index, _)| SessionHandle {
                pool: PoolKind::Receive,
                index,
            })
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn descriptor(name: &str, offset: u8, channels: u8) -> SessionDescriptor {
        SessionDescriptor {
            device_name: name.into(),
            session_id: offset as u32 + 1,
            session_ver: 1,
            session_loc: String::new(),
            transmitter_ip: Ipv4Addr::new(10, 0, 0, 2),
            transmitter_port: 5004,
            multicast_group: Ipv4Addr::new(239, 69, 83, 1),
            sample_rate: 48_000,
            channels,
            byte_depth: 3,
            pack_samples: 16,
            channel_offset: offset,
        }
    }

    #[test]
    fn receive_pool_boundary_is_128() {
        let mut registry = SessionRegistry::new();
        for i in 0..RX_CAPACITY {
            let desc = descriptor(&format!("dev-{i}"), i as u8, 1);
            registry.create_session(PoolKind::Receive, &desc).unwrap();
        }
        assert_eq!(registry.count(PoolKind::Receive), RX_CAPACITY);

        // 129th create is rejected and leaves the pool unchanged.
        let overflow = descriptor("dev-overflow", 0, 1);
        assert_eq!(
            registry
                .create_session(PoolKind::Receive, &overflow)
                .unwrap_err(),
            AoipError::CapacityExceeded {
                pool: PoolKind::Receive,
                capacity: RX_CAPACITY
            }
        );
        assert_eq!(registry.count(PoolKind::Receive), RX_CAPACITY);
    }

    #[test]
    fn transmit_pool_boundary_is_16() {
        let mut registry = SessionRegistry::new();
        for i in 0..TX_CAPACITY {
            let desc = descriptor("local", i as u8, 1);
            registry.create_session(PoolKind::Transmit, &desc).unwrap();
        }

        let overflow = descriptor("local", 100, 1);
        assert_eq!(
            registry
                .create_session(PoolKind::Transmit, &overflow)
                .unwrap_err(),
            AoipError::CapacityExceeded {
                pool: PoolKind::Transmit,
                capacity: TX_CAPACITY
            }
        );
        assert_eq!(registry.count(PoolKind::Transmit), TX_CAPACITY);
    }

    #[test]
    fn overlapping_ranges_rejected_adjacent_accepted() {
        let mut registry = SessionRegistry::new();
        registry
            .create_session(PoolKind::Receive, &descriptor("a", 0, 32))
            .unwrap();

        let overlap = descriptor("b", 16, 32);
        assert_eq!(
            registry
                .create_session(PoolKind::Receive, &overlap)
                .unwrap_err(),
            AoipError::OverlappingChannelRange {
                offset: 16,
                count: 32
            }
        );

        // Adjacent is fine: [0,32) then [32,64).
        registry
            .create_session(PoolKind::Receive, &descriptor("c", 32, 32))
            .unwrap();
        assert_eq!(registry.count(PoolKind::Receive), 2);
    }

    #[test]
    fn overlap_is_scoped_per_pool() {
        let mut registry = SessionRegistry::new();
        registry
            .create_session(PoolKind::Transmit, &descriptor("local", 0, 8))
            .unwrap();
        // Loopback: receiving the same absolute range is allowed.
        registry
            .create_session(PoolKind::Receive, &descriptor("local", 0, 8))
            .unwrap();
    }

    #[test]
    fn release_returns_slot_and_find_reports_absent() {
        let mut registry = SessionRegistry::new();
        let handle = registry
            .create_session(PoolKind::Receive, &descriptor("a", 0, 8))
            .unwrap();
        assert!(registry.find_session(PoolKind::Receive, "a", 0).is_some());

        registry.release_session(handle);
        assert!(registry.find_session(PoolKind::Receive, "a", 0).is_none());
        assert_eq!(registry.count(PoolKind::Receive), 0);

        // The slot is reusable.
        let again = registry
            .create_session(PoolKind::Receive, &descriptor("b", 0, 8))
            .unwrap();
        assert_eq!(again.index, handle.index);
    }

    #[test]
    fn open_rx_channels_counts_only_open() {
        let mut registry = SessionRegistry::new();
        let a = registry
            .create_session(PoolKind::Receive, &descriptor("a", 0, 8))
            .unwrap();
        registry
            .create_session(PoolKind::Receive, &descriptor("b", 8, 4))
            .unwrap();

        assert_eq!(registry.open_rx_channels(), 0);
        registry.get_mut(a).unwrap().state = SessionState::Open;
        assert_eq!(registry.open_rx_channels(), 8);
    }
}
