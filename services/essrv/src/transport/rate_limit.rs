//! Per-destination request pacing
//!
//! Devices become unstable when requests arrive in bursts, so every unicast
//! destination gets a minimum gap between sends. Each IP has its own async
//! gate; unrelated destinations never wait on each other.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// `255.255.255.255` or any IPv4 address ending in `.255`
pub fn is_broadcast_address(host: &str) -> bool {
    host.parse::<Ipv4Addr>()
        .is_ok_and(|ip| ip.is_broadcast() || ip.octets()[3] == 255)
}

#[derive(Debug)]
struct IpGate {
    /// Held across the wait so concurrent senders queue up
    last_send: tokio::sync::Mutex<Option<Instant>>,
    touched: Mutex<Instant>,
}

impl IpGate {
    fn new() -> Self {
        Self {
            last_send: tokio::sync::Mutex::new(None),
            touched: Mutex::new(Instant::now()),
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    max_tracked: usize,
    stale_after: Duration,
    gates: Mutex<HashMap<String, Arc<IpGate>>>,
}

impl RateLimiter {
    pub fn new(min_interval: Duration, max_tracked: usize, stale_after: Duration) -> Self {
        Self {
            min_interval,
            max_tracked,
            stale_after,
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until `host` may be sent to and stamp the send time
    ///
    /// Returns the time spent waiting.
    pub async fn acquire(&self, host: &str) -> Duration {
        if self.min_interval.is_zero() || is_broadcast_address(host) {
            return Duration::ZERO;
        }

        let gate = self.gate_for(host);
        let mut last_send = gate.last_send.lock().await;
        let mut waited = Duration::ZERO;
        if let Some(last) = *last_send {
            let elapsed = last.elapsed();
            if elapsed < self.min_interval {
                waited = self.min_interval - elapsed;
                debug!("Rate limiting {}: waiting {:?}", host, waited);
                tokio::time::sleep(waited).await;
            }
        }
        let now = Instant::now();
        *last_send = Some(now);
        *gate.touched.lock() = now;
        waited
    }

    fn gate_for(&self, host: &str) -> Arc<IpGate> {
        let mut gates = self.gates.lock();
        if let Some(gate) = gates.get(host) {
            *gate.touched.lock() = Instant::now();
            return Arc::clone(gate);
        }
        let gate = Arc::new(IpGate::new());
        gates.insert(host.to_string(), Arc::clone(&gate));
        gate
    }

    /// Drop gates idle for longer than the stale threshold once too many are tracked
    ///
    /// Returns the hosts that were forgotten.
    pub fn prune(&self) -> Vec<String> {
        let mut gates = self.gates.lock();
        if gates.len() <= self.max_tracked {
            return Vec::new();
        }
        let stale_after = self.stale_after;
        let stale: Vec<String> = gates
            .iter()
            .filter(|(_, gate)| gate.touched.lock().elapsed() > stale_after)
            .map(|(host, _)| host.clone())
            .collect();
        for host in &stale {
            gates.remove(host);
        }
        if !stale.is_empty() {
            debug!("Pruned {} stale rate-limit entries", stale.len());
        }
        stale
    }

    pub fn tracked(&self) -> usize {
        self.gates.lock().len()
    }

    pub fn clear(&self) {
        self.gates.lock().clear();
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_detection() {
        assert!(is_broadcast_address("255.255.255.255"));
        assert!(is_broadcast_address("192.168.1.255"));
        assert!(!is_broadcast_address("192.168.1.50"));
        assert!(!is_broadcast_address("device.local"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_host_is_spaced() {
        let limiter = RateLimiter::new(Duration::from_millis(300), 100, Duration::from_secs(300));
        let start = Instant::now();
        limiter.acquire("10.0.0.5").await;
        limiter.acquire("10.0.0.5").await;
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_hosts_and_broadcast_do_not_wait() {
        let limiter = RateLimiter::new(Duration::from_millis(300), 100, Duration::from_secs(300));
        let start = Instant::now();
        limiter.acquire("10.0.0.5").await;
        limiter.acquire("10.0.0.6").await;
        for _ in 0..3 {
            assert_eq!(limiter.acquire("255.255.255.255").await, Duration::ZERO);
        }
        assert!(start.elapsed() < Duration::from_millis(300));
        assert_eq!(limiter.tracked(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prune_only_when_over_cap() {
        let limiter = RateLimiter::new(Duration::from_millis(1), 2, Duration::from_secs(10));
        for host in ["10.0.0.1", "10.0.0.2", "10.0.0.3"] {
            limiter.acquire(host).await;
        }
        assert!(limiter.prune().is_empty());

        tokio::time::advance(Duration::from_secs(11)).await;
        limiter.acquire("10.0.0.3").await;
        let mut pruned = limiter.prune();
        pruned.sort();
        assert_eq!(pruned, vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()]);
        assert_eq!(limiter.tracked(), 1);
    }
}
