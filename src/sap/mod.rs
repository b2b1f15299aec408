//! SAP engine: periodic announcement of local transmit sessions and
//! continuous listening for remote announcements.
//!
//! Both sides are scoped activities: `start` spins up a dedicated thread,
//! `stop` guarantees the thread has exited and its socket is released before
//! returning.

pub mod announce;
pub mod listen;

use std::net::Ipv4Addr;
use std::time::Duration;

pub use announce::SapAnnouncer;
pub use listen::SapListener;

use crate::error::AoipResult;
use crate::wire::{SapHeader, SdpBody, SAP_HEADER_SIZE};

/// Well-known SAP multicast group.
pub const SAP_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 2, 127, 254);

/// Well-known SAP port.
pub const SAP_PORT: u16 = 9875;

/// Cadence of the announce loop.
pub const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);

/// A device whose announcements cease for this long is invalidated.
pub const DEVICE_TIMEOUT: Duration = Duration::from_secs(20);

/// Window between first hearing a complete description and opening it.
pub const CONFIRM_WINDOW: Duration = Duration::from_secs(1);

/// Splits a raw SAP packet into its header and SDP body.
pub fn decode_announcement(buf: &[u8]) -> AoipResult<(SapHeader, SdpBody)> {
    let header = SapHeader::decode(buf)?;
    let body = SdpBody::decode(&buf[SAP_HEADER_SIZE..])?;
    Ok((header, body))
}
