//! Remote device and application stream-view types.

use std::net::Ipv4Addr;
use std::time::Instant;

/// A remote audio source/sink observed on the network.
///
/// Created when its first announcement is parsed, refreshed on every
/// re-announcement, and invalidated when announcements cease or an explicit
/// delete message arrives.
#[derive(Debug, Clone)]
pub struct Device {
    pub name: String,
    pub ip: Ipv4Addr,
    pub channels: u8,
    /// The device's channels occupy `[channel_offset, channel_offset +
    /// channels)` in the absolute channel space.
    pub channel_offset: u8,
    pub last_seen: Instant,
}

/// A named application-level view into a subset of a device's channels.
///
/// Pure mapping metadata; references a device by identity, never by address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub name: String,
    /// Offset relative to the device's own channel block.
    pub channel_offset: u8,
    pub channels: u8,
}

impl StreamConfig {
    pub fn new(name: impl Into<String>, channel_offset: u8, channels: u8) -> Self {
        Self {
            name: name.into(),
            channel_offset,
            channels,
        }
    }

    /// Resolves this view against a device into absolute channel bounds, or
    /// `None` when it does not fit inside the device's block.
    pub fn resolve(&self, device: &Device) -> Option<(u8, u8)> {
        let end = self.channel_offset.checked_add(self.channels)?;
        if end > device.channels {
            return None;
        }
        Some((device.channel_offset + self.channel_offset, self.channels))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Device {
        Device {
            name: "stagebox-a".into(),
            ip: Ipv4Addr::new(10, 0, 0, 2),
            channels: 32,
            channel_offset: 32,
            last_seen: Instant::now(),
        }
    }

    #[test]
    fn resolve_maps_into_absolute_space() {
        let config = StreamConfig::new("drums", 8, 16);
        assert_eq!(config.resolve(&device()), Some((40, 16)));
    }

    #[test]
    fn resolve_rejects_views_past_device_block() {
        let config = StreamConfig::new("too-wide", 24, 16);
        assert_eq!(config.resolve(&device()), None);
    }
}
