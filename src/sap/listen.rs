//! SAP listen loop and announcement state machine.

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, info, warn};

use super::{CONFIRM_WINDOW, DEVICE_TIMEOUT, SAP_MULTICAST, SAP_PORT, decode_announcement};
use crate::context::AoipContext;
use crate::device::Device;
use crate::error::{AoipError, AoipResult};
use crate::session::{PoolKind, SessionDescriptor, SessionState};
use crate::wire::{SapHeader, SdpBody};

const RECV_TIMEOUT: Duration = Duration::from_millis(200);
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(1);

/// Scoped SAP listen activity.
///
/// [`SapListener::stop`] joins the listen thread; no packet processing
/// outlives it.
pub struct SapListener {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SapListener {
    /// Joins the SAP multicast group on the context's interface and starts
    /// the listen thread.
    pub fn start(ctx: Arc<AoipContext>) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .context("Failed to create SAP socket")?;
        socket
            .set_reuse_address(true)
            .context("Failed to set reuse address")?;
        let bind_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, SAP_PORT));
        socket
            .bind(&bind_addr.into())
            .context("Failed to bind SAP socket")?;
        socket
            .join_multicast_v4(&SAP_MULTICAST, &ctx.local_ip())
            .context("Failed to join SAP multicast group")?;
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .context("Failed to set read timeout")?;

        info!("SAP listener joined {}:{}", SAP_MULTICAST, SAP_PORT);

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let handle = thread::spawn(move || run(socket.into(), ctx, thread_shutdown));

        Ok(Self {
            shutdown,
            handle: Some(handle),
        })
    }

    /// Stops the listen loop and waits for the thread to exit.
    pub fn stop(mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("SAP listener stopped");
    }
}

impl Drop for SapListener {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run(socket: UdpSocket, ctx: Arc<AoipContext>, shutdown: Arc<AtomicBool>) {
    let mut buf = [0u8; 2048];
    let mut last_housekeeping = Instant::now();

    while !shutdown.load(Ordering::Relaxed) {
        match socket.recv_from(&mut buf) {
            Ok((size, source)) => {
                if source.ip() == ctx.local_ip() {
                    // Our own announcements loop back on the group.
                } else if let Err(e) = handle_packet(&ctx, &buf[..size]) {
                    match e {
                        AoipError::StaleVersion { .. } => debug!("{e}"),
                        _ => warn!("Dropping SAP packet from {source}: {e}"),
                    }
                }
            }
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => warn!("SAP receive error: {e}"),
        }

        if last_housekeeping.elapsed() >= HOUSEKEEPING_INTERVAL {
            promote_confirmed(&ctx);
            cleanup_stale_devices(&ctx, DEVICE_TIMEOUT);
            last_housekeeping = Instant::now();
        }
    }
}

fn handle_packet(ctx: &AoipContext, packet: &[u8]) -> AoipResult<()> {
    let (header, body) = decode_announcement(packet)?;
    apply_announcement(ctx, &header, &body)
}

/// Core state machine, applied once per parsed announcement.
///
/// Delete messages close and release the matching receive session. Add
/// messages create or update a session: an unchanged hash short-circuits,
/// a lower-or-equal version is dropped as stale, a higher version replaces
/// the cached description and re-evaluates completeness.
pub(crate) fn apply_announcement(
    ctx: &AoipContext,
    header: &SapHeader,
    body: &SdpBody,
) -> AoipResult<()> {
    if header.flags.is_delete() {
        return apply_delete(ctx, body);
    }

    ctx.devices
        .entry(body.device_name.clone())
        .and_modify(|device| {
            device.last_seen = Instant::now();
            device.channels = body.channels;
            device.channel_offset = body.channel_offset;
        })
        .or_insert_with(|| {
            info!(
                "Discovered device {:?} at {} ({} channels @ offset {})",
                body.device_name, body.transmitter_ip, body.channels, body.channel_offset
            );
            Device {
                name: body.device_name.clone(),
                ip: body.transmitter_ip,
                channels: body.channels,
                channel_offset: body.channel_offset,
                last_seen: Instant::now(),
            }
        });

    let mut registry = ctx.registry();

    let Some(handle) =
        registry.find_session(PoolKind::Receive, &body.device_name, body.channel_offset)
    else {
        let desc = SessionDescriptor::from_sdp(body);
        let handle = registry.create_session(PoolKind::Receive, &desc)?;
        let session = registry.get_mut(handle).expect("just created");
        session.frame_samples = body.frame_samples;
        session.cached_hash = header.hash;
        session.announced_at = Some(Instant::now());
        session.state = if session.media_complete() && session.derive_packetization() {
            SessionState::WaitOpen
        } else {
            SessionState::PendingConfig
        };
        debug!(
            "New receive session {:?}@{} -> {:?}",
            body.device_name, body.channel_offset, session.state
        );
        ctx.refresh_channel_count(&registry);
        return Ok(());
    };

    let session = registry.get_mut(handle).expect("live handle");

    // Unchanged re-announcement: the hash check dominates steady state and
    // skips the field-by-field comparison entirely.
    if header.hash == session.cached_hash {
        session.last_announced = Some(Instant::now());
        return Ok(());
    }

    if body.session_id == session.session_id && body.session_ver <= session.session_ver {
        return Err(AoipError::StaleVersion {
            session_id: body.session_id,
            cached: session.session_ver,
            received: body.session_ver,
        });
    }

    session.session_id = body.session_id;
    session.apply_description(body);
    session.cached_hash = header.hash;
    session.announced_at = Some(Instant::now());
    session.state = if session.media_complete() && session.derive_packetization() {
        SessionState::WaitOpen
    } else {
        SessionState::PendingConfig
    };
    debug!(
        "Updated receive session {:?}@{} to version {} -> {:?}",
        body.device_name, body.channel_offset, body.session_ver, session.state
    );
    ctx.refresh_channel_count(&registry);
    Ok(())
}

fn apply_delete(ctx: &AoipContext, body: &SdpBody) -> AoipResult<()> {
    let mut registry = ctx.registry();
    if let Some(handle) =
        registry.find_session(PoolKind::Receive, &body.device_name, body.channel_offset)
    {
        // WaitClose drains immediately for announcement-driven deletes:
        // nothing is in flight on the receive side, so the slot goes
        // straight through Closed and back to the free set.
        if let Some(session) = registry.get_mut(handle) {
            session.state = SessionState::WaitClose;
        }
        registry.release_session(handle);
        ctx.refresh_channel_count(&registry);
        info!(
            "Receive session {:?}@{} deleted by announcement",
            body.device_name, body.channel_offset
        );
    }
    ctx.devices.remove(&body.device_name);
    Ok(())
}

/// Promotes complete sessions out of `WaitOpen` once the confirmation
/// window has elapsed.
pub(crate) fn promote_confirmed(ctx: &AoipContext) {
    let mut registry = ctx.registry();
    let mut changed = false;
    for handle in registry.live_handles(PoolKind::Receive) {
        let Some(session) = registry.get_mut(handle) else {
            continue;
        };
        if session.state == SessionState::WaitOpen
            && session
                .announced_at
                .is_some_and(|at| at.elapsed() >= CONFIRM_WINDOW)
        {
            session.state = SessionState::Open;
            changed = true;
            debug!(
                "Session {:?}@{} open",
                session.device_name, session.channel_offset
            );
        }
    }
    if changed {
        ctx.refresh_channel_count(&registry);
    }
}

/// Releases devices (and their receive sessions) whose announcements have
/// ceased.
pub(crate) fn cleanup_stale_devices(ctx: &AoipContext, timeout: Duration) {
    let now = Instant::now();
    let mut stale = Vec::new();
    ctx.devices.retain(|name, device| {
        let alive = now.duration_since(device.last_seen) < timeout;
        if !alive {
            info!("Removing stale device {name:?}");
            stale.push(name.clone());
        }
        alive
    });

    if stale.is_empty() {
        return;
    }

    let mut registry = ctx.registry();
    for handle in registry.live_handles(PoolKind::Receive) {
        let Some(session) = registry.get(handle) else {
            continue;
        };
        if stale.contains(&session.device_name) {
            registry.release_session(handle);
        }
    }
    ctx.refresh_channel_count(&registry);
}
