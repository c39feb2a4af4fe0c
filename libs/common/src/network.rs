//! Local network interface enumeration

use std::net::{IpAddr, Ipv4Addr};
use sysinfo::Networks;

/// An IPv4 address assigned to a local interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Interface {
    pub addr: Ipv4Addr,
    pub prefix: u8,
}

impl Ipv4Interface {
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Self {
        Self { addr, prefix }
    }

    /// Directed broadcast address of this interface's subnet
    pub fn broadcast(&self) -> Ipv4Addr {
        let host_mask = u32::MAX
            .checked_shr(u32::from(self.prefix))
            .unwrap_or(0);
        Ipv4Addr::from(u32::from(self.addr) | host_mask)
    }

    pub fn is_loopback(&self) -> bool {
        self.addr.is_loopback()
    }
}

/// All IPv4 addresses of the host's interfaces (loopback included)
pub fn local_ipv4_interfaces() -> Vec<Ipv4Interface> {
    let networks = Networks::new_with_refreshed_list();
    let mut out = Vec::new();
    for (_name, data) in &networks {
        for net in data.ip_networks() {
            if let IpAddr::V4(v4) = net.addr {
                let iface = Ipv4Interface::new(v4, net.prefix);
                if !out.contains(&iface) {
                    out.push(iface);
                }
            }
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_from_prefix() {
        let iface = Ipv4Interface::new(Ipv4Addr::new(192, 168, 1, 42), 24);
        assert_eq!(iface.broadcast(), Ipv4Addr::new(192, 168, 1, 255));

        let iface = Ipv4Interface::new(Ipv4Addr::new(10, 1, 2, 3), 8);
        assert_eq!(iface.broadcast(), Ipv4Addr::new(10, 255, 255, 255));

        let iface = Ipv4Interface::new(Ipv4Addr::new(172, 16, 5, 9), 22);
        assert_eq!(iface.broadcast(), Ipv4Addr::new(172, 16, 7, 255));
    }

    #[test]
    fn test_broadcast_edge_prefixes() {
        let iface = Ipv4Interface::new(Ipv4Addr::new(10, 0, 0, 7), 32);
        assert_eq!(iface.broadcast(), Ipv4Addr::new(10, 0, 0, 7));
        let iface = Ipv4Interface::new(Ipv4Addr::new(10, 0, 0, 7), 0);
        assert_eq!(iface.broadcast(), Ipv4Addr::BROADCAST);
    }

    #[test]
    fn test_enumeration_does_not_panic() {
        let _ = local_ipv4_interfaces();
    }
}
