//! Device clients
//!
//! `DeviceClient` is the seam between device logic (aggregation, verification,
//! the CLI) and how commands reach a device: directly over UDP with
//! [`UdpClient`], or through a relay bridge with
//! [`RelayClient`](crate::relay_client::RelayClient).

use crate::aggregator::{self, StatusRequest};
use crate::config::EssrvConfig;
use crate::discovery::{self, DiscoveryCache};
use crate::error::Result;
use crate::polling::PollingControl;
use crate::transport::{StatsByMethod, TransportOptions, UdpTransport};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use voltage_marstek::constants::DEFAULT_UDP_PORT;
use voltage_marstek::{Command, DeviceInfo, DeviceStatus};

#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Fresh correlation id for a command built by the caller
    fn next_request_id(&self) -> u64;

    /// Send one command and return the raw reply
    async fn send_command(
        &self,
        command: &Command,
        host: &str,
        port: u16,
        timeout: Duration,
        quiet: bool,
    ) -> Result<Value>;

    async fn discover(&self, timeout: Duration, use_cache: bool) -> Result<Vec<DeviceInfo>>;

    /// One status cycle merged over `previous`
    async fn fetch_status(
        &self,
        host: &str,
        port: u16,
        request: &StatusRequest,
        previous: Option<&DeviceStatus>,
    ) -> Result<DeviceStatus> {
        Ok(aggregator::fetch_status(self, host, port, request, previous).await)
    }

    fn polling(&self) -> &PollingControl;

    fn command_stats(&self) -> StatsByMethod;

    /// Send with background polling for `host` paused for the duration
    async fn send_with_polling_paused(
        &self,
        command: &Command,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Value> {
        let _pause = self.polling().pause_guard(host);
        self.send_command(command, host, port, timeout, false).await
    }
}

/// Direct UDP access through a shared [`UdpTransport`]
#[derive(Debug)]
pub struct UdpClient {
    transport: Arc<UdpTransport>,
    discovery_cache: DiscoveryCache,
    polling: PollingControl,
    device_port: u16,
}

impl UdpClient {
    pub fn new(transport: Arc<UdpTransport>, discovery_ttl: Duration, device_port: u16) -> Self {
        Self {
            transport,
            discovery_cache: DiscoveryCache::new(discovery_ttl),
            polling: PollingControl::new(),
            device_port,
        }
    }

    pub fn from_config(config: &EssrvConfig) -> Self {
        let transport = UdpTransport::new(TransportOptions::from(&config.udp));
        Self::new(
            Arc::new(transport),
            Duration::from_secs(config.discovery.cache_ttl_secs),
            config.udp.device_port,
        )
    }

    pub fn transport(&self) -> &Arc<UdpTransport> {
        &self.transport
    }

    pub fn device_port(&self) -> u16 {
        self.device_port
    }

    pub async fn setup(&self) -> Result<()> {
        self.transport.setup().await
    }

    pub async fn cleanup(&self) {
        self.discovery_cache.clear();
        self.transport.cleanup().await;
    }

    /// Validate and send a raw JSON message
    pub async fn send_raw(
        &self,
        message: &str,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Value> {
        self.transport
            .send_raw(message, host, port, timeout, false)
            .await
    }

    pub async fn discover_one(
        &self,
        host: &str,
        port: u16,
        timeout: Duration,
    ) -> Result<Option<DeviceInfo>> {
        discovery::discover_one(&self.transport, host, port, timeout).await
    }

    pub fn clear_discovery_cache(&self) {
        self.discovery_cache.clear();
    }

    pub fn command_stats_for_ip(&self, ip: &str) -> StatsByMethod {
        self.transport.command_stats_for_ip(ip)
    }
}

impl Default for UdpClient {
    fn default() -> Self {
        Self::new(
            Arc::new(UdpTransport::new(TransportOptions::default())),
            Duration::from_secs(30),
            DEFAULT_UDP_PORT,
        )
    }
}

#[async_trait]
impl DeviceClient for UdpClient {
    fn next_request_id(&self) -> u64 {
        self.transport.next_request_id()
    }

    async fn send_command(
        &self,
        command: &Command,
        host: &str,
        port: u16,
        timeout: Duration,
        quiet: bool,
    ) -> Result<Value> {
        self.transport
            .send_request(command, host, port, timeout, quiet)
            .await
    }

    async fn discover(&self, timeout: Duration, use_cache: bool) -> Result<Vec<DeviceInfo>> {
        discovery::discover(
            &self.transport,
            &self.discovery_cache,
            self.device_port,
            timeout,
            use_cache,
        )
        .await
    }

    fn polling(&self) -> &PollingControl {
        &self.polling
    }

    fn command_stats(&self) -> StatsByMethod {
        self.transport.command_stats()
    }
}
