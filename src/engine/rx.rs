//! Receive-side depacketization and the scoped RTP receive activity.

use std::collections::HashSet;
use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use super::RTP_PORT;
use super::buffer::SampleRing;
use crate::context::AoipContext;
use crate::error::{AoipError, AoipResult};
use crate::session::{PoolKind, Session, SessionState};
use crate::wire::RtpHeader;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);
const MEMBERSHIP_INTERVAL: Duration = Duration::from_secs(1);

/// Where an accepted packet's payload lands in the ring.
#[derive(Debug, Clone, Copy)]
pub struct PacketSlot {
    pub channel_offset: u8,
    pub channels: u8,
    pub byte_depth: u8,
}

/// Validates one transport packet against a receive session's cursor and
/// advances it.
///
/// Sequence handling favors continuity over completeness: an in-order
/// packet advances the cursor, a forward gap within one frame window is
/// accepted with the loss counted (the skipped region is left as-is, never
/// retransmitted), and anything behind the cursor is dropped as stale. The
/// first packet after subscribing syncs the cursor wherever the
/// transmitter currently is.
pub fn accept_packet(
    session: &mut Session,
    header: &RtpHeader,
    payload_len: usize,
) -> AoipResult<PacketSlot> {
    let stride = session.channels as usize * session.byte_depth as usize;
    if stride == 0 || payload_len % stride != 0 {
        return Err(AoipError::MalformedPacket {
            actual: payload_len,
            required: stride.max(1),
        });
    }

    let window = session.packet_per_frame.max(1) as u16;
    if let Some(expected) = session.expected_seq {
        let delta = header.seq.wrapping_sub(expected);
        if delta >= window {
            session.stale_drops += 1;
            return Err(AoipError::SequenceStale {
                expected,
                received: header.seq,
            });
        }
        if delta > 0 {
            session.seq_gaps += delta as u64;
            debug!(
                "Sequence gap of {delta} on session {} ({} total)",
                session.session_id, session.seq_gaps
            );
        }
    }

    session.expected_seq = Some(header.seq.wrapping_add(1));
    session.timestamp = header.timestamp.wrapping_add(session.pack_samples as u32);
    session.sample_index = session
        .sample_index
        .wrapping_add(session.pack_samples as u16);
    Ok(PacketSlot {
        channel_offset: session.channel_offset,
        channels: session.channels,
        byte_depth: session.byte_depth,
    })
}

/// Writes one transport packet into the ring for a receive session.
pub fn depacketize(
    session: &mut Session,
    header: &RtpHeader,
    payload: &[u8],
    ring: &SampleRing,
) -> AoipResult<()> {
    let slot = accept_packet(session, header, payload.len())?;
    ring.write_samples(
        header.timestamp,
        slot.channel_offset,
        slot.channels,
        slot.byte_depth,
        payload,
    )
}

/// Scoped RTP receive activity.
///
/// One shared socket on the RTP port; group memberships follow the set of
/// open, subscribed receive sessions. Per-packet failures are logged and
/// the loop continues.
pub struct RtpReceiver {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RtpReceiver {
    pub fn start(ctx: Arc<AoipContext>, ring: Arc<SampleRing>) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .context("Failed to create RTP socket")?;
        socket
            .set_reuse_address(true)
            .context("Failed to set reuse address")?;
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, RTP_PORT));
        socket
            .bind(&bind_addr.into())
            .context("Failed to bind RTP socket")?;
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .context("Failed to set read timeout")?;

        info!("RTP receiver listening on port {RTP_PORT}");

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let handle = thread::spawn(move || run(socket.into(), ctx, ring, thread_shutdown));

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stops the receive loop; any in-flight packet write completes before
    /// the thread exits.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("RTP receiver stopped");
    }
}

impl Drop for RtpReceiver {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(socket: UdpSocket, ctx: Arc<AoipContext>, ring: Arc<SampleRing>, shutdown: Arc<AtomicBool>) {
    let mut buf = [0u8; 2048];
    let mut joined: HashSet<Ipv4Addr> = HashSet::new();
    let mut last_membership = Instant::now() - MEMBERSHIP_INTERVAL;

    while !shutdown.load(Ordering::Relaxed) {
        if last_membership.elapsed() >= MEMBERSHIP_INTERVAL {
            sync_memberships(&socket, &ctx, &mut joined);
            last_membership = Instant::now();
        }

        match socket.recv_from(&mut buf) {
            Ok((size, _)) => {
                if let Err(e) = handle_packet(&ctx, &ring, &buf[..size]) {
                    match e {
                        AoipError::SequenceStale { .. } => debug!("{e}"),
                        _ => warn!("Dropping transport packet: {e}"),
                    }
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => warn!("RTP receive error: {e}"),
        }
    }
}

fn handle_packet(ctx: &AoipContext, ring: &SampleRing, packet: &[u8]) -> AoipResult<()> {
    let (header, payload) = RtpHeader::decode(packet)?;

    // Sequencing and cursor bookkeeping under the registry lock; the ring
    // write happens after the guard is dropped so the announce and mapper
    // paths never wait behind a sample memcpy.
    let slot = {
        let mut registry = ctx.registry();
        let Some(handle) = registry.find_rx_by_ssrc(header.ssrc) else {
            // Traffic for a stream nobody subscribed to; not an error.
            return Ok(());
        };
        let session = registry.get_mut(handle).expect("live handle");
        if session.state != SessionState::Open || !session.subscribed {
            return Ok(());
        }
        accept_packet(session, &header, payload.len())?
    };

    ring.write_samples(
        header.timestamp,
        slot.channel_offset,
        slot.channels,
        slot.byte_depth,
        payload,
    )
}

fn sync_memberships(socket: &UdpSocket, ctx: &AoipContext, joined: &mut HashSet<Ipv4Addr>) {
    let local_ip = ctx.local_ip();
    let wanted: HashSet<Ipv4Addr> = {
        let registry = ctx.registry();
        registry
            .live_handles(PoolKind::Receive)
            .into_iter()
            .filter_map(|h| registry.get(h))
            .filter(|s| s.subscribed && s.state == SessionState::Open)
            .map(|s| s.multicast_group)
            .collect()
    };

    for group in wanted.difference(joined) {
        match socket.join_multicast_v4(group, &local_ip) {
            Ok(()) => info!("Joined transport group {group}"),
            Err(e) => warn!("Failed to join {group}: {e}"),
        }
    }
    for group in joined.difference(&wanted) {
        if let Err(e) = socket.leave_multicast_v4(group, &local_ip) {
            warn!("Failed to leave {group}: {e}");
        }
    }
    *joined = wanted;
}
