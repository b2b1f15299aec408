//! Local network interface enumeration.
//!
//! Thin wrapper over the platform adapter list; the engine consumes exactly
//! one interface, selected by the caller and handed to
//! [`crate::context::AoipContext::new`].

use std::net::{IpAddr, Ipv4Addr};

use network_interface::NetworkInterfaceConfig;

/// A local network adapter.
#[derive(Debug, Clone)]
pub struct Interface {
    /// Hardware name, e.g. `eth0`.
    pub name: String,
    /// Human-readable description where the platform provides one.
    pub description: String,
    pub ip: Ipv4Addr,
    pub mac: Option<String>,
    /// OS interface index, used for multicast membership.
    pub index: u32,
}

/// Enumerates local adapters that carry a non-loopback IPv4 address.
pub fn interfaces() -> Vec<Interface> {
    network_interface::NetworkInterface::show()
        .map(|ifaces| {
            let mut result: Vec<Interface> = Vec::new();
            for iface in ifaces {
                let Some(ip) = iface.addr.iter().find_map(|a| match a.ip() {
                    IpAddr::V4(ip) if !ip.is_loopback() => Some(ip),
                    _ => None,
                }) else {
                    continue;
                };
                if result.iter().any(|r| r.index == iface.index) {
                    continue;
                }
                result.push(Interface {
                    name: iface.name.clone(),
                    description: iface.name.clone(),
                    ip,
                    mac: iface.mac_addr.clone(),
                    index: iface.index,
                });
            }
            result
        })
        .unwrap_or_default()
}

impl Interface {
    /// A synthetic loopback interface, for tests and single-host setups.
    pub fn loopback() -> Self {
        Self {
            name: "lo".into(),
            description: "loopback".into(),
            ip: Ipv4Addr::LOCALHOST,
            mac: None,
            index: 0,
        }
    }
}
