//! Timer-driven streaming engine.
//!
//! A dedicated real-time thread wakes at a fixed interval; each firing
//! packetizes one frame per open transmit session, then invokes the
//! registered handler synchronously with the current live channel count.
//! The handler must not block: a firing that overruns its interval is
//! dropped, never queued.

pub mod buffer;
pub mod rx;
pub mod tx;

use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{info, warn};

pub use buffer::{MIN_BUFFER_LEN, SampleRing, TxFrame};
pub use rx::{RtpReceiver, depacketize};
pub use tx::packetize_frame;

use crate::context::AoipContext;
use crate::error::{AoipError, AoipResult};
use crate::session::{PoolKind, Session, SessionHandle, SessionState, TX_CAPACITY};
use crate::wire::MAX_SAMPLES;

/// Transport port for sample packets.
pub const RTP_PORT: u16 = 5004;

/// The minimum addressable sample quantum; `sample_delay` must be a
/// multiple of this, tied to the channel/byte-depth packing granularity.
pub const SAMPLE_QUANTUM: u16 = 16;

/// Callback invoked once per timer quantum with the live channel count.
pub type TimerCallback = Box<dyn FnMut(u16) + Send>;

/// Streaming engine configuration.
pub struct EngineConfig {
    /// Timer frequency in Hz.
    pub interval_hz: f64,
    /// Engine frame length in samples; must be a non-zero multiple of 16.
    pub sample_delay: u16,
    /// Application-owned sample memory, at least 16x128x3 bytes, held by
    /// the engine for its lifetime.
    pub buffer: Vec<u8>,
}

/// Binds a session to the engine's frame length, deriving and validating
/// its packetization.
pub(crate) fn bind_session(session: &mut Session, frame_samples: u16) -> AoipResult<()> {
    if session.pack_samples == 0 || frame_samples % session.pack_samples as u16 != 0 {
        return Err(AoipError::ConfigurationInvalid {
            reason: "frame samples not divisible by the session's pack samples",
        });
    }
    if session.pack_samples as usize * session.channels as usize > MAX_SAMPLES {
        return Err(AoipError::ConfigurationInvalid {
            reason: "packet would exceed the 384-sample payload cap",
        });
    }
    session.frame_samples = frame_samples as u8;
    session.packet_per_frame = (frame_samples / session.pack_samples as u16) as u8;
    Ok(())
}

/// The timer-driven streaming engine.
pub struct Engine {
    ctx: Arc<AoipContext>,
    ring: Arc<SampleRing>,
    tx_frames: Arc<Vec<TxFrame>>,
    quantum: Arc<AtomicU64>,
    period: Duration,
    sample_delay: u16,
    callback: Option<TimerCallback>,
    shutdown: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl Engine {
    /// Validates the configuration and prepares the engine. Fatal to
    /// startup on any validation failure; nothing is spawned yet.
    pub fn new(
        ctx: Arc<AoipContext>,
        config: EngineConfig,
        callback: TimerCallback,
    ) -> AoipResult<Self> {
        if config.sample_delay == 0 || config.sample_delay % SAMPLE_QUANTUM != 0 {
            return Err(AoipError::ConfigurationInvalid {
                reason: "sample delay must be a non-zero multiple of 16",
            });
        }
        if config.sample_delay > 240 {
            // frame_samples is a single byte on the wire.
            return Err(AoipError::ConfigurationInvalid {
                reason: "sample delay above 240 samples",
            });
        }
        if !(config.interval_hz.is_finite() && config.interval_hz > 0.0) {
            return Err(AoipError::ConfigurationInvalid {
                reason: "interval frequency must be positive",
            });
        }
        let ring = SampleRing::from_buffer(config.buffer)?;
        if (ring.slots() as u16) < config.sample_delay {
            return Err(AoipError::ConfigurationInvalid {
                reason: "sample buffer shorter than one engine frame",
            });
        }

        let period = Duration::from_secs_f64(1.0 / config.interval_hz);
        Ok(Self {
            ctx,
            ring: Arc::new(ring),
            tx_frames: Arc::new(Vec::new()),
            quantum: Arc::new(AtomicU64::new(0)),
            period,
            sample_delay: config.sample_delay,
            callback: Some(callback),
            shutdown: Arc::new(AtomicBool::new(false)),
            handle: None,
        })
    }

    /// The receive-side sample ring, shared with [`RtpReceiver`].
    pub fn sample_ring(&self) -> Arc<SampleRing> {
        self.ring.clone()
    }

    /// Fills the front transmit buffer slot of the transmit session at
    /// `pool_index`. Call from the timer callback; the packetizer drains
    /// the other slot.
    pub fn with_tx_buffer(&self, pool_index: usize, f: impl FnOnce(&mut [u8])) -> AoipResult<()> {
        let Some(frame) = self.tx_frames.get(pool_index) else {
            return Err(AoipError::ConfigurationInvalid {
                reason: "engine not started or transmit index out of range",
            });
        };
        // During quantum q the counter already reads q + 1 and the
        // packetizer drains slot q % 2, so the front slot is the counter
        // value modulo 2: filled now, transmitted next quantum.
        let front = self.quantum.load(Ordering::Acquire) % 2;
        frame.fill(front as usize, f);
        Ok(())
    }

    /// Binds open transmit sessions, opens their sockets and starts the
    /// timer thread.
    pub fn start(&mut self) -> Result<()> {
        let mut frames = Vec::with_capacity(TX_CAPACITY);
        {
            let mut registry = self.ctx.registry();
            for index in 0..TX_CAPACITY {
                let handle = crate::session::SessionHandle {
                    pool: PoolKind::Transmit,
                    index,
                };
                let Some(session) = registry.get_mut(handle) else {
                    frames.push(TxFrame::new(0));
                    continue;
                };
                bind_session(session, self.sample_delay)
                    .context("Transmit session rejects the engine frame length")?;
                if session.socket.is_none() {
                    let socket =
                        UdpSocket::bind((self.ctx.local_ip(), 0)).context("Failed to bind transmit socket")?;
                    socket
                        .set_multicast_ttl_v4(1)
                        .context("Failed to set multicast TTL")?;
                    session.socket = Some(socket);
                }
                let frame_bytes = self.sample_delay as usize
                    * session.channels as usize
                    * session.byte_depth as usize;
                frames.push(TxFrame::new(frame_bytes));
            }
        }
        self.tx_frames = Arc::new(frames);

        let callback = self
            .callback
            .take()
            .ok_or_else(|| anyhow::anyhow!("Engine already started"))?;

        info!(
            "Engine starting: period {:?}, frame {} samples",
            self.period, self.sample_delay
        );

        let ctx = self.ctx.clone();
        let tx_frames = self.tx_frames.clone();
        let quantum = self.quantum.clone();
        let period = self.period;
        let shutdown = self.shutdown.clone();
        self.handle = Some(thread::spawn(move || {
            run_timer(ctx, tx_frames, quantum, period, callback, shutdown);
        }));
        Ok(())
    }

    /// Stops the timer thread; the in-flight quantum completes first.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        info!("Engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_timer(
    ctx: Arc<AoipContext>,
    tx_frames: Arc<Vec<TxFrame>>,
    quantum: Arc<AtomicU64>,
    period: Duration,
    mut callback: TimerCallback,
    shutdown: Arc<AtomicBool>,
) {
    let mut next = Instant::now() + period;

    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now < next {
            thread::sleep(next - now);
        } else if now - next > period {
            // The previous quantum overran; dropped, never queued.
            let behind = (now - next).as_micros() as u64 / period.as_micros().max(1) as u64;
            warn!("Timer overrun, dropping {} frame(s)", behind + 1);
            next = now;
        }
        next += period;

        let q = quantum.fetch_add(1, Ordering::AcqRel);
        transmit_quantum(&ctx, &tx_frames, q);
        callback(ctx.channel_count());
    }
}

/// Packetizes and sends one frame for every open transmit session.
///
/// Packets are built and cursors advanced under the registry lock, then the
/// guard is dropped before any socket I/O so the SAP and mapper paths never
/// wait behind a send.
fn transmit_quantum(ctx: &AoipContext, tx_frames: &[TxFrame], q: u64) {
    let back = (q % 2) as usize;

    struct Outgoing {
        handle: SessionHandle,
        socket: UdpSocket,
        target: SocketAddr,
        packets: Vec<Vec<u8>>,
    }

    let mut outgoing: Vec<Outgoing> = Vec::new();
    {
        let mut registry = ctx.registry();
        for handle in registry.live_handles(PoolKind::Transmit) {
            let Some(session) = registry.get_mut(handle) else {
                continue;
            };
            if session.state != SessionState::Open {
                continue;
            }
            let Some(frame) = tx_frames.get(handle.index) else {
                continue;
            };
            let Some(socket) = session.socket.take() else {
                continue;
            };

            let data = frame.snapshot(back);
            let target = SocketAddr::from((session.multicast_group, RTP_PORT));
            let mut packets = Vec::with_capacity(session.packet_per_frame as usize);
            if let Err(e) = packetize_frame(session, &data, |packet| packets.push(packet.to_vec()))
            {
                warn!("Packetization failed for session {}: {e}", session.session_id);
            }
            outgoing.push(Outgoing {
                handle,
                socket,
                target,
                packets,
            });
        }
    }

    for out in &outgoing {
        for packet in &out.packets {
            if let Err(e) = out.socket.send_to(packet, out.target) {
                warn!("Failed to send transport packet: {e}");
            }
        }
    }

    let mut registry = ctx.registry();
    for out in outgoing {
        if let Some(session) = registry.get_mut(out.handle) {
            session.socket = Some(out.socket);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iface::Interface;
    use crate::session::SessionDescriptor;
    use crate::wire::RtpHeader;
    use std::net::Ipv4Addr;

    fn ctx() -> Arc<AoipContext> {
        Arc::new(AoipContext::new(Interface::loopback()))
    }

    fn noop() -> TimerCallback {
        Box::new(|_| {})
    }

    #[test]
    fn sample_delay_must_be_a_multiple_of_16() {
        let err = Engine::new(
            ctx(),
            EngineConfig {
                interval_hz: 1000.0,
                sample_delay: 17,
                buffer: vec![0u8; MIN_BUFFER_LEN],
            },
            noop(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, AoipError::ConfigurationInvalid { .. }));

        assert!(
            Engine::new(
                ctx(),
                EngineConfig {
                    interval_hz: 1000.0,
                    sample_delay: 32,
                    buffer: vec![0u8; 2 * MIN_BUFFER_LEN],
                },
                noop(),
            )
            .is_ok()
        );
    }

    #[test]
    fn buffer_must_cover_one_frame() {
        // 32-sample frame over a 16-slot ring.
        let err = Engine::new(
            ctx(),
            EngineConfig {
                interval_hz: 1000.0,
                sample_delay: 32,
                buffer: vec![0u8; MIN_BUFFER_LEN],
            },
            noop(),
        )
        .err()
        .unwrap();
        assert_eq!(
            err,
            AoipError::ConfigurationInvalid {
                reason: "sample buffer shorter than one engine frame"
            }
        );
    }

    #[test]
    fn callback_fill_lands_in_the_next_quantum_slot() {
        let mut engine = Engine::new(
            ctx(),
            EngineConfig {
                interval_hz: 1000.0,
                sample_delay: 16,
                buffer: vec![0u8; MIN_BUFFER_LEN],
            },
            noop(),
        )
        .unwrap();
        engine.tx_frames = Arc::new(vec![TxFrame::new(4)]);

        // Quantum 3 is in flight: the packetizer drains slot 3 % 2 = 1 and
        // the counter already reads 4, so the fill must land in slot 0,
        // which quantum 4 drains.
        engine.quantum.store(4, Ordering::Release);
        engine.with_tx_buffer(0, |buf| buf.fill(0x5A)).unwrap();
        assert_eq!(engine.tx_frames[0].snapshot(0), vec![0x5A; 4]);
        assert_eq!(engine.tx_frames[0].snapshot(1), vec![0u8; 4]);
    }

    #[test]
    fn uneven_packetization_is_rejected_at_bind() {
        let mut session = Session::from_descriptor(&SessionDescriptor {
            device_name: "local".into(),
            session_id: 1,
            session_ver: 1,
            session_loc: String::new(),
            transmitter_ip: Ipv4Addr::LOCALHOST,
            transmitter_port: RTP_PORT,
            multicast_group: Ipv4Addr::new(239, 0, 0, 1),
            sample_rate: 48_000,
            channels: 2,
            byte_depth: 3,
            pack_samples: 24,
            channel_offset: 0,
        });
        // 64 % 24 != 0
        assert!(bind_session(&mut session, 64).is_err());
        session.pack_samples = 16;
        bind_session(&mut session, 64).unwrap();
        assert_eq!(session.packet_per_frame, 4);
    }

    #[test]
    fn oversized_packets_are_rejected_at_bind() {
        let mut session = Session::from_descriptor(&SessionDescriptor {
            device_name: "local".into(),
            session_id: 1,
            session_ver: 1,
            session_loc: String::new(),
            transmitter_ip: Ipv4Addr::LOCALHOST,
            transmitter_port: RTP_PORT,
            multicast_group: Ipv4Addr::new(239, 0, 0, 1),
            sample_rate: 48_000,
            channels: 128,
            byte_depth: 3,
            pack_samples: 16,
            channel_offset: 0,
        });
        // 16 * 128 = 2048 samples per packet, over the 384 cap.
        assert!(matches!(
            bind_session(&mut session, 64),
            Err(AoipError::ConfigurationInvalid { .. })
        ));
    }

    /// One frame through the full packetize/depacketize pair: a ramp
    /// pattern written on the transmit side arrives bit-exact in the
    /// receive region, with sequence numbers 0..=3 observed in order.
    #[test]
    fn ramp_frame_survives_the_transport_round_trip() {
        let desc = SessionDescriptor {
            device_name: "loop".into(),
            session_id: 77,
            session_ver: 1,
            session_loc: String::new(),
            transmitter_ip: Ipv4Addr::LOCALHOST,
            transmitter_port: RTP_PORT,
            multicast_group: Ipv4Addr::new(239, 0, 0, 2),
            sample_rate: 48_000,
            channels: 2,
            byte_depth: 3,
            pack_samples: 16,
            channel_offset: 4,
        };

        let mut tx = Session::from_descriptor(&desc);
        bind_session(&mut tx, 64).unwrap();
        tx.state = SessionState::Open;

        let mut rx = Session::from_descriptor(&desc);
        bind_session(&mut rx, 64).unwrap();
        rx.state = SessionState::Open;
        rx.subscribed = true;

        let stride = 2 * 3usize;
        let frame: Vec<u8> = (0..64 * stride).map(|i| (i % 251) as u8).collect();

        let mut packets = Vec::new();
        packetize_frame(&mut tx, &frame, |p| packets.push(p.to_vec())).unwrap();
        assert_eq!(packets.len(), 4);

        // 64-slot ring so one whole frame fits without wrapping.
        let ring = SampleRing::from_buffer(vec![0u8; 4 * MIN_BUFFER_LEN]).unwrap();
        let mut seqs = Vec::new();
        for packet in &packets {
            let (header, payload) = RtpHeader::decode(packet).unwrap();
            seqs.push(header.seq);
            depacketize(&mut rx, &header, payload, &ring).unwrap();
        }
        assert_eq!(seqs, vec![0, 1, 2, 3]);

        // Both channels of the range [4, 6) carry the ramp.
        for ch in 0..2usize {
            let got = ring.read_channel(0, 4 + ch as u8, 3, 64).unwrap();
            let want: Vec<u8> = (0..64usize)
                .flat_map(|s| {
                    let base = s * stride + ch * 3;
                    (0..3usize).map(move |b| ((base + b) % 251) as u8)
                })
                .collect();
            assert_eq!(got, want);
        }
    }
}
