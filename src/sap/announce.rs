//! SAP announce loop for local transmit sessions.

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{info, warn};

use super::{ANNOUNCE_INTERVAL, SAP_MULTICAST, SAP_PORT};
use crate::context::AoipContext;
use crate::session::{PoolKind, SessionHandle, SessionState};

const TICK: Duration = Duration::from_millis(100);
const TTL: u32 = 1;

/// Scoped SAP announce activity.
///
/// While running, every transmit session in `PendingInit`, `WaitOpen` or
/// `Open` is re-announced each cycle; sessions parked in `WaitClose` get one
/// final delete-type packet before their slot is reclaimed.
pub struct SapAnnouncer {
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
    ctx: Arc<AoipContext>,
}

impl SapAnnouncer {
    pub fn start(ctx: Arc<AoipContext>) -> Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .context("Failed to create SAP announce socket")?;
        socket
            .set_multicast_ttl_v4(TTL)
            .context("Failed to set multicast TTL")?;
        socket
            .set_multicast_if_v4(&ctx.local_ip())
            .context("Failed to select announce interface")?;
        let bind_addr = SocketAddr::from((ctx.local_ip(), 0));
        socket
            .bind(&bind_addr.into())
            .context("Failed to bind SAP announce socket")?;

        info!("SAP announcer targeting {}:{}", SAP_MULTICAST, SAP_PORT);

        ctx.set_announcer_running(true);
        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_shutdown = shutdown.clone();
        let thread_ctx = ctx.clone();
        let handle = thread::spawn(move || run(socket.into(), thread_ctx, thread_shutdown));

        Ok(Self {
            shutdown,
            handle: Some(handle),
            ctx,
        })
    }

    /// Stops announcing and waits for the thread to exit. Pending
    /// `WaitClose` sessions are drained (delete sent, slot reclaimed)
    /// before the thread returns.
    pub fn stop(mut self) {
        self.finish();
        info!("SAP announcer stopped");
    }

    fn finish(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.ctx.set_announcer_running(false);
    }
}

impl Drop for SapAnnouncer {
    fn drop(&mut self) {
        self.finish();
    }
}

fn run(socket: UdpSocket, ctx: Arc<AoipContext>, shutdown: Arc<AtomicBool>) {
    let target = SocketAddr::from((SAP_MULTICAST, SAP_PORT));
    let mut last_cycle = Instant::now() - ANNOUNCE_INTERVAL;

    while !shutdown.load(Ordering::Relaxed) {
        if last_cycle.elapsed() >= ANNOUNCE_INTERVAL {
            announce_cycle(&socket, &ctx, target);
            last_cycle = Instant::now();
        }
        thread::sleep(TICK);
    }

    // Final drain so WaitClose sessions still get their delete packet.
    announce_cycle(&socket, &ctx, target);
}

fn announce_cycle(socket: &UdpSocket, ctx: &AoipContext, target: SocketAddr) {
    let local_ip = ctx.local_ip();

    enum Kind {
        Add,
        Delete,
    }

    // Encode everything under the registry lock, then drop the guard so
    // the multicast sends never stall the streaming path.
    let mut outgoing: Vec<(SessionHandle, Kind, Vec<u8>)> = Vec::new();
    {
        let mut registry = ctx.registry();
        for handle in registry.live_handles(PoolKind::Transmit) {
            let Some(session) = registry.get_mut(handle) else {
                continue;
            };
            match session.state {
                SessionState::PendingInit | SessionState::WaitOpen | SessionState::Open => {
                    match session.announcement(local_ip, false) {
                        Ok(packet) => outgoing.push((handle, Kind::Add, packet)),
                        Err(e) => warn!(
                            "Cannot encode announcement for session {}: {e}",
                            session.session_id
                        ),
                    }
                }
                SessionState::WaitClose => match session.announcement(local_ip, true) {
                    Ok(packet) => outgoing.push((handle, Kind::Delete, packet)),
                    Err(e) => {
                        warn!("Cannot encode delete for session {}: {e}", session.session_id);
                        registry.release_session(handle);
                    }
                },
                _ => {}
            }
        }
    }

    let mut sent: Vec<(SessionHandle, Kind, bool)> = Vec::with_capacity(outgoing.len());
    for (handle, kind, packet) in outgoing {
        let ok = match socket.send_to(&packet, target) {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to send announcement: {e}");
                false
            }
        };
        sent.push((handle, kind, ok));
    }

    let mut registry = ctx.registry();
    for (handle, kind, ok) in sent {
        match kind {
            Kind::Add if ok => {
                if let Some(session) = registry.get_mut(handle) {
                    session.last_announced = Some(Instant::now());
                    session.state = match session.state {
                        SessionState::PendingInit => SessionState::WaitOpen,
                        _ => SessionState::Open,
                    };
                }
            }
            Kind::Add => {}
            // The delete slot is reclaimed whether or not the packet made
            // it out; listeners fall back on the device timeout.
            Kind::Delete => registry.release_session(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::Interface;
    use std::net::Ipv4Addr;

    // The announce cycle itself is socket-driven; the state walk it performs
    // is covered here through a bound loopback socket pair.
    #[test]
    fn cycle_walks_pending_init_to_open_and_drains_wait_close() {
        let ctx = AoipContext::new(Interface::loopback());
        ctx.set_device_name("unit");
        let handle = ctx
            .create_stream("unit", 0, 2, 16, 48_000, Some(Ipv4Addr::new(239, 0, 0, 5)))
            .unwrap();

        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        let sink = UdpSocket::bind("127.0.0.1:0").unwrap();
        let target = sink.local_addr().unwrap();

        announce_cycle(&socket, &ctx, target);
        assert_eq!(
            ctx.registry().get(handle).unwrap().state,
            SessionState::WaitOpen
        );

        announce_cycle(&socket, &ctx, target);
        assert_eq!(ctx.registry().get(handle).unwrap().state, SessionState::Open);

        ctx.registry().get_mut(handle).unwrap().state = SessionState::WaitClose;
        announce_cycle(&socket, &ctx, target);
        assert!(ctx.registry().get(handle).is_none());
        assert_eq!(ctx.registry().count(PoolKind::Transmit), 0);
    }
}
