//! Real-time audio-over-IP engine for the LAN.
//!
//! Discovers, announces and streams multi-channel PCM audio between
//! endpoints: SAP-style multicast announcements carry SDP-style session
//! descriptions, and a timer-driven transport moves samples with
//! sample-accurate sequencing.
//!
//! # Architecture
//!
//! ```text
//! AoipContext (registry, device table, atomic channel count)
//!     ├── SapListener    discovers remote sessions  (224.2.127.254:9875)
//!     ├── SapAnnouncer   announces local transmit sessions
//!     ├── Engine         timer thread: packetize + callback per quantum
//!     └── RtpReceiver    depacketizes into the shared sample ring (:5004)
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use aoip::{AoipContext, Engine, EngineConfig, RtpReceiver, SapAnnouncer, SapListener};
//!
//! # fn main() -> anyhow::Result<()> {
//! let iface = aoip::iface::interfaces().into_iter().next().unwrap();
//! let ctx = Arc::new(AoipContext::new(iface));
//! ctx.set_device_name("console");
//! ctx.create_stream("main-mix", 0, 8, 16, 48_000, None)?;
//!
//! let mut engine = Engine::new(
//!     ctx.clone(),
//!     EngineConfig {
//!         interval_hz: 750.0,
//!         sample_delay: 64,
//!         buffer: vec![0u8; 4 * aoip::engine::MIN_BUFFER_LEN],
//!     },
//!     Box::new(|channels| {
//!         // Fill transmit buffers / consume the receive ring here.
//!         let _ = channels;
//!     }),
//! )?;
//!
//! let listener = SapListener::start(ctx.clone())?;
//! let announcer = SapAnnouncer::start(ctx.clone())?;
//! let receiver = RtpReceiver::start(ctx.clone(), engine.sample_ring())?;
//! engine.start()?;
//!
//! // ... run ...
//!
//! engine.stop();
//! receiver.stop();
//! announcer.stop();
//! listener.stop();
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod device;
pub mod engine;
pub mod error;
pub mod iface;
pub mod mapper;
pub mod sap;
pub mod session;
pub mod wire;

pub use context::AoipContext;
pub use device::{Device, StreamConfig};
pub use engine::{Engine, EngineConfig, RtpReceiver, SampleRing, TimerCallback};
pub use error::{AoipError, AoipResult};
pub use iface::Interface;
pub use mapper::SdpStreamInfo;
pub use sap::{SapAnnouncer, SapListener};
pub use session::{PoolKind, SessionHandle, SessionState};
