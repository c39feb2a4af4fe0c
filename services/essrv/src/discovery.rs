//! Device discovery over UDP broadcast

use crate::error::Result;
use crate::transport::{CachedResponse, UdpTransport};
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use voltage_marstek::response::Datagram;
use voltage_marstek::{command, DeviceInfo};

/// Global broadcast plus each usable interface's subnet broadcast
///
/// Loopback and link-local interfaces are skipped, as are the host's own addresses.
pub fn broadcast_targets() -> Vec<Ipv4Addr> {
    targets_for(&common::network::local_ipv4_interfaces())
}

fn targets_for(interfaces: &[common::network::Ipv4Interface]) -> Vec<Ipv4Addr> {
    let own: Vec<Ipv4Addr> = interfaces.iter().map(|i| i.addr).collect();
    let mut targets = vec![Ipv4Addr::BROADCAST];
    for iface in interfaces {
        if iface.is_loopback() || iface.addr.is_link_local() {
            continue;
        }
        let broadcast = iface.broadcast();
        if own.contains(&broadcast) || targets.contains(&broadcast) {
            continue;
        }
        targets.push(broadcast);
    }
    targets
}

/// Last discovery result, valid for a fixed TTL
#[derive(Debug)]
pub struct DiscoveryCache {
    ttl: Duration,
    entry: Mutex<Option<(Instant, Vec<DeviceInfo>)>>,
}

impl DiscoveryCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entry: Mutex::new(None),
        }
    }

    /// Cached devices if still fresh
    pub fn get(&self) -> Option<Vec<DeviceInfo>> {
        let entry = self.entry.lock();
        entry
            .as_ref()
            .filter(|(stored, _)| stored.elapsed() < self.ttl)
            .map(|(_, devices)| devices.clone())
    }

    pub fn store(&self, devices: Vec<DeviceInfo>) {
        *self.entry.lock() = Some((Instant::now(), devices));
    }

    pub fn clear(&self) {
        *self.entry.lock() = None;
    }
}

impl Default for DiscoveryCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// Turn broadcast replies into unique devices, first reply per IP wins
pub fn collect_devices(replies: &[CachedResponse]) -> Vec<DeviceInfo> {
    let mut devices: Vec<DeviceInfo> = Vec::new();
    for reply in replies {
        let result = match Datagram::classify(&reply.response) {
            Datagram::Reply(result) => result,
            Datagram::Echo => continue,
            other => {
                debug!("Ignoring discovery datagram from {}: {:?}", reply.source, other);
                continue;
            },
        };
        let Some(device) = DeviceInfo::from_result(result, Some(reply.source.ip())) else {
            warn!("Invalid discovery reply from {}", reply.source);
            continue;
        };
        if devices.iter().any(|d| d.ip == device.ip) {
            continue;
        }
        debug!(
            "Discovered {} at {} (mac {})",
            device.device_type, device.ip, device.mac
        );
        devices.push(device);
    }
    devices
}

/// Broadcast `Marstek.GetDevice` and gather every device that answers
pub async fn discover(
    transport: &UdpTransport,
    cache: &DiscoveryCache,
    port: u16,
    timeout: Duration,
    use_cache: bool,
) -> Result<Vec<DeviceInfo>> {
    if use_cache {
        if let Some(devices) = cache.get() {
            debug!("Using cached discovery result ({} devices)", devices.len());
            return Ok(devices);
        }
    }

    let replies = transport
        .send_broadcast_request(&command::discover(), port, timeout)
        .await?;
    let devices = collect_devices(&replies);
    info!("Discovery found {} device(s)", devices.len());
    cache.store(devices.clone());
    Ok(devices)
}

/// Unicast discovery against one known address
///
/// `None` when the device is silent or its reply names no device.
pub async fn discover_one(
    transport: &UdpTransport,
    host: &str,
    port: u16,
    timeout: Duration,
) -> Result<Option<DeviceInfo>> {
    let cmd = command::discover().with_id(transport.next_request_id());
    let response = match transport.send_request(&cmd, host, port, timeout, true).await {
        Ok(response) => response,
        Err(e) if e.is_timeout() => return Ok(None),
        Err(e) => return Err(e),
    };
    let source = host.parse::<IpAddr>().ok();
    Ok(Datagram::classify(&response)
        .result()
        .and_then(|result| DeviceInfo::from_result(result, source)))
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use common::network::Ipv4Interface;
    use serde_json::json;
    use std::net::SocketAddr;

    fn reply(value: serde_json::Value, source: &str) -> CachedResponse {
        CachedResponse {
            id: 0,
            response: value,
            source: source.parse::<SocketAddr>().unwrap(),
            received_at: Instant::now(),
        }
    }

    #[test]
    fn test_targets_skip_loopback_and_link_local() {
        let interfaces = [
            Ipv4Interface::new(Ipv4Addr::LOCALHOST, 8),
            Ipv4Interface::new(Ipv4Addr::new(169, 254, 3, 4), 16),
            Ipv4Interface::new(Ipv4Addr::new(192, 168, 1, 20), 24),
            Ipv4Interface::new(Ipv4Addr::new(192, 168, 1, 21), 24),
            Ipv4Interface::new(Ipv4Addr::new(10, 0, 0, 9), 32),
        ];
        let targets = targets_for(&interfaces);
        assert_eq!(
            targets,
            vec![Ipv4Addr::BROADCAST, Ipv4Addr::new(192, 168, 1, 255)]
        );
    }

    #[test]
    fn test_live_targets_start_with_global() {
        assert_eq!(broadcast_targets()[0], Ipv4Addr::BROADCAST);
    }

    #[tokio::test]
    async fn test_collect_devices_filters_and_dedupes() {
        let replies = vec![
            reply(
                json!({"id": 0, "method": "Marstek.GetDevice", "params": {"ble_mac": "0"}}),
                "192.168.1.20:30000",
            ),
            reply(
                json!({"id": 0, "result": {"device": "VenusE", "ver": 111, "wifi_mac": "aabbcc", "ip": "192.168.1.50"}}),
                "192.168.1.50:30000",
            ),
            reply(
                json!({"id": 0, "result": {"device": "VenusE 3.0", "ble_mac": "ddeeff"}}),
                "192.168.1.50:30000",
            ),
            reply(
                json!({"id": 0, "result": {"device": "VenusD", "ble_mac": "112233"}}),
                "192.168.1.51:30000",
            ),
            reply(json!({"id": 0, "result": {"foo": 1}}), "192.168.1.52:30000"),
            reply(json!({"id": 0, "error": {"code": -1}}), "192.168.1.53:30000"),
        ];

        let devices = collect_devices(&replies);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].device_type, "VenusE");
        assert_eq!(devices[0].mac, "aabbcc");
        assert_eq!(devices[1].ip, "192.168.1.51");
        assert_eq!(devices[1].mac, "112233");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_ttl_and_clear() {
        let cache = DiscoveryCache::new(Duration::from_secs(30));
        assert!(cache.get().is_none());
        cache.store(Vec::new());
        assert_eq!(cache.get(), Some(Vec::new()));

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(cache.get().is_none());

        cache.store(Vec::new());
        cache.clear();
        assert!(cache.get().is_none());
    }
}
