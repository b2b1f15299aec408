//! Error types for the AoIP engine.
//!
//! Per-packet decode failures are dropped by the receive loops and never
//! propagate; only configuration-time validation is fatal to startup.

use std::fmt;

use crate::session::PoolKind;

/// Result type for protocol-level operations.
pub type AoipResult<T> = Result<T, AoipError>;

/// Protocol and configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AoipError {
    /// Packet is truncated or structurally invalid.
    MalformedPacket { actual: usize, required: usize },

    /// SAP version field holds an unrecognized value.
    VersionUnsupported { found: u8 },

    /// Session pool is full; no partial state is left behind.
    CapacityExceeded { pool: PoolKind, capacity: usize },

    /// Requested absolute channel range intersects a live session.
    OverlappingChannelRange { offset: u8, count: u8 },

    /// Announcement carries a session version at or below the cached one.
    /// Silently dropped by the listener, surfaced only for accounting.
    StaleVersion { session_id: u32, cached: u32, received: u32 },

    /// Engine or stream configuration rejected at initialization.
    ConfigurationInvalid { reason: &'static str },

    /// Transport packet sequence is behind the expected forward window.
    SequenceStale { expected: u16, received: u16 },

    /// No session matches the given identity.
    SessionNotFound { name: String, channel_offset: u8 },
}

impl fmt::Display for AoipError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedPacket { actual, required } => {
                write!(f, "malformed packet: {actual} bytes, need at least {required}")
            }
            Self::VersionUnsupported { found } => {
                write!(f, "unsupported SAP version: {found}")
            }
            Self::CapacityExceeded { pool, capacity } => {
                write!(f, "{pool:?} session pool full ({capacity} slots)")
            }
            Self::OverlappingChannelRange { offset, count } => {
                write!(
                    f,
                    "channel range [{offset}, {}) overlaps a live session",
                    *offset as u16 + *count as u16
                )
            }
            Self::StaleVersion {
                session_id,
                cached,
                received,
            } => {
                write!(
                    f,
                    "stale version {received} for session {session_id:#010x} (cached {cached})"
                )
            }
            Self::ConfigurationInvalid { reason } => {
                write!(f, "invalid configuration: {reason}")
            }
            Self::SequenceStale { expected, received } => {
                write!(f, "stale sequence {received}, expected {expected}")
            }
            Self::SessionNotFound {
                name,
                channel_offset,
            } => {
                write!(f, "no session named {name:?} at channel offset {channel_offset}")
            }
        }
    }
}

impl std::error::Error for AoipError {}
