//! Shared-socket UDP transport
//!
//! One socket, one listener task. Callers register a oneshot per correlation
//! id; the listener is the only reader and routes each datagram either to its
//! waiting caller or into the response cache. Replies are matched purely by
//! id, so interleaved and out-of-order answers are fine.

use super::cache::{CachedResponse, ResponseCache};
use super::rate_limit::RateLimiter;
use super::stats::{RequestOutcome, StatsByMethod, StatsRegistry};
use crate::config::UdpConfig;
use crate::error::{EssrvError, ErrorExt, Result};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use voltage_marstek::response::{datagram_id, Datagram};
use voltage_marstek::{Command, RequestIdCounter};

const RECV_BUFFER_BYTES: usize = 65536;
const RECV_ERROR_BACKOFF: Duration = Duration::from_secs(1);
const BROADCAST_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Transport tuning, usually taken from `[udp]` config
#[derive(Debug, Clone, PartialEq)]
pub struct TransportOptions {
    /// 0 binds an ephemeral port
    pub local_port: u16,
    pub min_request_interval: Duration,
    pub cache_max_age: Duration,
    pub cache_max_entries: usize,
    pub max_tracked_ips: usize,
    pub rate_limit_stale_after: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::from(&UdpConfig::default())
    }
}

impl From<&UdpConfig> for TransportOptions {
    fn from(cfg: &UdpConfig) -> Self {
        Self {
            local_port: cfg.local_port,
            min_request_interval: cfg.min_request_interval(),
            cache_max_age: Duration::from_secs(cfg.response_cache_max_age_secs),
            cache_max_entries: cfg.response_cache_max_entries,
            max_tracked_ips: cfg.max_tracked_ips,
            rate_limit_stale_after: Duration::from_secs(cfg.rate_limit_stale_secs),
        }
    }
}

/// State the listener task shares with senders
#[derive(Debug)]
struct Inbox {
    pending: DashMap<u64, oneshot::Sender<Value>>,
    cache: Mutex<ResponseCache>,
}

impl Inbox {
    fn dispatch(&self, bytes: &[u8], source: SocketAddr) {
        let value: Value = match serde_json::from_slice(bytes) {
            Ok(v) => v,
            Err(e) => {
                debug!("Dropping non-JSON datagram from {}: {}", source, e);
                return;
            },
        };
        if Datagram::classify(&value).is_echo() {
            trace!("Dropping echoed request from {}", source);
            return;
        }
        let Some(id) = datagram_id(&value) else {
            debug!("Dropping datagram without id from {}", source);
            return;
        };

        if let Some((_, tx)) = self.pending.remove(&id) {
            // receiver may have timed out in the meantime
            let _ = tx.send(value);
        } else {
            self.cache.lock().insert(id, value, source);
        }
    }
}

/// Removes the pending entry on every exit path, including a dropped future
struct PendingGuard<'a> {
    pending: &'a DashMap<u64, oneshot::Sender<Value>>,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

struct Listener {
    socket: Arc<UdpSocket>,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct UdpTransport {
    options: TransportOptions,
    ids: RequestIdCounter,
    inbox: Arc<Inbox>,
    rate_limiter: RateLimiter,
    stats: Mutex<StatsRegistry>,
    listener: Mutex<Option<Listener>>,
}

impl std::fmt::Debug for UdpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpTransport")
            .field("options", &self.options)
            .field("running", &self.is_running())
            .finish()
    }
}

impl UdpTransport {
    pub fn new(options: TransportOptions) -> Self {
        let cache = ResponseCache::new(options.cache_max_age, options.cache_max_entries);
        Self {
            rate_limiter: RateLimiter::new(
                options.min_request_interval,
                options.max_tracked_ips,
                options.rate_limit_stale_after,
            ),
            options,
            ids: RequestIdCounter::new(),
            inbox: Arc::new(Inbox {
                pending: DashMap::new(),
                cache: Mutex::new(cache),
            }),
            stats: Mutex::new(StatsRegistry::default()),
            listener: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }

    /// Bind the socket and start the listener; no-op when already running
    pub async fn setup(&self) -> Result<()> {
        let mut listener = self.listener.lock();
        if listener.is_some() {
            return Ok(());
        }

        let socket = Arc::new(bind_socket(self.options.local_port)?);
        let token = CancellationToken::new();
        let handle = tokio::spawn(listen(
            Arc::clone(&socket),
            Arc::clone(&self.inbox),
            token.clone(),
        ));
        info!(
            "UDP transport listening on {}",
            socket
                .local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "?".to_string())
        );
        *listener = Some(Listener {
            socket,
            token,
            handle,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.listener.lock().is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener
            .lock()
            .as_ref()
            .and_then(|l| l.socket.local_addr().ok())
    }

    /// Stop the listener, close the socket and forget all state
    ///
    /// In-flight calls fail with a transport error.
    pub async fn cleanup(&self) {
        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            listener.token.cancel();
            if let Err(e) = listener.handle.await {
                error!("UDP listener task ended abnormally: {}", e);
            }
        }
        self.inbox.pending.clear();
        self.inbox.cache.lock().clear();
        self.rate_limiter.clear();
        self.stats.lock().clear();
        debug!("UDP transport cleaned up");
    }

    fn socket(&self) -> Result<Arc<UdpSocket>> {
        self.listener
            .lock()
            .as_ref()
            .map(|l| Arc::clone(&l.socket))
            .ok_or_else(|| EssrvError::transport("transport not set up"))
    }

    pub fn next_request_id(&self) -> u64 {
        self.ids.next()
    }

    pub fn reset_request_ids(&self) {
        self.ids.reset();
    }

    /// Send `command` to `host:port` and wait for the reply with the same id
    ///
    /// `quiet` downgrades the timeout log to debug for expected misses.
    pub async fn send_request(
        &self,
        command: &Command,
        host: &str,
        port: u16,
        timeout: Duration,
        quiet: bool,
    ) -> Result<Value> {
        let socket = self.socket()?;
        let payload = command.encode()?;
        let method = command.method().as_str();
        let id = command.id();
        let target = resolve(host, port).await?;

        let (tx, rx) = oneshot::channel();
        match self.inbox.pending.entry(id) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                return Err(EssrvError::validation(
                    "id",
                    format!("request id {} is already in flight", id),
                ));
            },
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(tx);
            },
        }
        let _guard = PendingGuard {
            pending: &self.inbox.pending,
            id,
        };

        self.rate_limiter.acquire(host).await;
        let started = Instant::now();
        trace!("-> {} {}", target, payload);
        if let Err(e) = socket.send_to(payload.as_bytes(), target).await {
            let err = EssrvError::transport(format!("send to {} failed: {}", target, e));
            self.record(method, host, RequestOutcome::Failure(err.to_string()));
            return Err(err);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                self.record(method, host, RequestOutcome::Success(started.elapsed()));
                Ok(response)
            },
            Ok(Err(_)) => {
                let err = EssrvError::transport("transport closed");
                self.record(method, host, RequestOutcome::Failure(err.to_string()));
                Err(err)
            },
            Err(_) => {
                if quiet {
                    debug!("{} (id {}) to {} timed out after {:?}", method, id, target, timeout);
                } else {
                    warn!("{} (id {}) to {} timed out after {:?}", method, id, target, timeout);
                }
                self.record(method, host, RequestOutcome::Timeout);
                Err(EssrvError::timeout(format!(
                    "No response from {} for {} within {:.1}s",
                    target,
                    method,
                    timeout.as_secs_f64()
                )))
            },
        }
    }

    /// Validate a raw JSON message and send it under a transport-allocated id
    ///
    /// The reply carries the caller's original id.
    pub async fn send_raw(
        &self,
        message: &str,
        host: &str,
        port: u16,
        timeout: Duration,
        quiet: bool,
    ) -> Result<Value> {
        let parsed = Command::parse(message)?;
        let caller_id = parsed.id();
        // callers pick their own ids; a local one keeps concurrent callers
        // from colliding in the pending map
        let command = parsed.with_id(self.next_request_id());
        let mut reply = self.send_request(&command, host, port, timeout, quiet).await?;
        if let Some(obj) = reply.as_object_mut() {
            obj.insert("id".to_string(), Value::from(caller_id));
        }
        Ok(reply)
    }

    /// Broadcast to `255.255.255.255` and every local subnet broadcast address
    pub async fn send_broadcast_request(
        &self,
        command: &Command,
        port: u16,
        timeout: Duration,
    ) -> Result<Vec<CachedResponse>> {
        let targets = crate::discovery::broadcast_targets();
        self.broadcast_to(command, &targets, port, timeout).await
    }

    /// Send one command to each target and collect every reply for its id
    pub async fn broadcast_to(
        &self,
        command: &Command,
        targets: &[Ipv4Addr],
        port: u16,
        timeout: Duration,
    ) -> Result<Vec<CachedResponse>> {
        let socket = self.socket()?;
        let payload = command.encode()?;
        let id = command.id();
        // replies from an earlier round must not count; concurrent rounds
        // on the same id share the cache, so read without removing
        let started = Instant::now();

        let mut sent = 0usize;
        for target in targets {
            let addr = SocketAddr::new(IpAddr::V4(*target), port);
            match socket.send_to(payload.as_bytes(), addr).await {
                Ok(_) => {
                    sent += 1;
                    debug!("Broadcast {} (id {}) to {}", command.method(), id, addr);
                },
                Err(e) => warn!("Broadcast to {} failed: {}", addr, e),
            }
        }
        if sent == 0 {
            return Err(EssrvError::transport("broadcast failed on every target"));
        }

        let deadline = Instant::now() + timeout;
        let mut replies: Vec<CachedResponse> = Vec::new();
        loop {
            let seen = self.inbox.cache.lock().since(id, started);
            for reply in seen {
                let duplicate = replies
                    .iter()
                    .any(|r| r.source == reply.source && r.response == reply.response);
                if !duplicate {
                    replies.push(reply);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(BROADCAST_POLL_INTERVAL.min(deadline - now)).await;
        }
        debug!("Broadcast id {} collected {} replies", id, replies.len());
        Ok(replies)
    }

    fn record(&self, method: &str, host: &str, outcome: RequestOutcome) {
        let forgotten = self.rate_limiter.prune();
        let mut stats = self.stats.lock();
        if !forgotten.is_empty() {
            stats.forget_ips(&forgotten);
        }
        stats.record(method, host, &outcome);
    }

    pub fn command_stats(&self) -> StatsByMethod {
        self.stats.lock().global()
    }

    pub fn command_stats_for_ip(&self, ip: &str) -> StatsByMethod {
        self.stats.lock().for_ip(ip)
    }

    pub fn pending_count(&self) -> usize {
        self.inbox.pending.len()
    }

    pub fn cached_count(&self) -> usize {
        self.inbox.cache.lock().len()
    }
}

fn bind_socket(port: u16) -> Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .transport_context("create UDP socket")?;
    socket
        .set_broadcast(true)
        .transport_context("enable SO_BROADCAST")?;
    socket
        .set_reuse_address(true)
        .transport_context("enable SO_REUSEADDR")?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    if let Err(e) = socket.set_reuse_port(true) {
        debug!("SO_REUSEPORT unavailable: {}", e);
    }
    socket
        .set_nonblocking(true)
        .transport_context("set non-blocking")?;
    let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
    socket
        .bind(&addr.into())
        .transport_context(&format!("bind UDP port {}", port))?;
    UdpSocket::from_std(socket.into()).transport_context("register UDP socket")
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    tokio::net::lookup_host((host, port))
        .await
        .transport_context(&format!("resolve {}", host))?
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| EssrvError::transport(format!("no IPv4 address for {}", host)))
}

async fn listen(socket: Arc<UdpSocket>, inbox: Arc<Inbox>, token: CancellationToken) {
    let mut buf = vec![0u8; RECV_BUFFER_BYTES];
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok((len, source)) => inbox.dispatch(&buf[..len], source),
                Err(e) => {
                    warn!("UDP receive error: {}", e);
                    tokio::select! {
                        _ = token.cancelled() => break,
                        _ = tokio::time::sleep(RECV_ERROR_BACKOFF) => {},
                    }
                },
            },
        }
    }
    debug!("UDP listener stopped");
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use serde_json::json;

    fn inbox() -> Inbox {
        Inbox {
            pending: DashMap::new(),
            cache: Mutex::new(ResponseCache::new(Duration::from_secs(30), 50)),
        }
    }

    fn src() -> SocketAddr {
        "192.168.1.50:30000".parse().unwrap()
    }

    #[test]
    fn test_dispatch_resolves_pending() {
        let inbox = inbox();
        let (tx, mut rx) = oneshot::channel();
        inbox.pending.insert(5, tx);
        inbox.dispatch(br#"{"id":5,"result":{"mode":"Auto"}}"#, src());
        assert_eq!(rx.try_recv().unwrap()["result"]["mode"], "Auto");
        assert!(inbox.pending.is_empty());
        assert_eq!(inbox.cache.lock().len(), 0);
    }

    #[test]
    fn test_dispatch_caches_unclaimed_and_drops_noise() {
        let inbox = inbox();
        inbox.dispatch(br#"{"id":0,"result":{"ip":"192.168.1.50"}}"#, src());
        inbox.dispatch(br#"{"id":0,"method":"Marstek.GetDevice","params":{"ble_mac":"0"}}"#, src());
        inbox.dispatch(b"garbage", src());
        inbox.dispatch(br#"{"result":{}}"#, src());
        let cached = inbox.cache.lock().take(0);
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].response, json!({"id": 0, "result": {"ip": "192.168.1.50"}}));
        assert_eq!(inbox.cache.lock().len(), 0);
    }

    #[test]
    #[tracing_test::traced_test]
    fn test_dispatch_logs_dropped_datagrams() {
        let inbox = inbox();
        inbox.dispatch(b"\x00\x01", src());
        assert!(logs_contain("Dropping non-JSON datagram from 192.168.1.50:30000"));
    }

    #[tokio::test]
    async fn test_send_requires_setup() {
        let transport = UdpTransport::new(TransportOptions::default());
        let cmd = voltage_marstek::command::es_mode(1, 0);
        let err = transport
            .send_request(&cmd, "127.0.0.1", 30000, Duration::from_millis(10), true)
            .await
            .unwrap_err();
        assert_eq!(err, EssrvError::transport("transport not set up"));
    }

    #[tokio::test]
    async fn test_setup_is_idempotent_and_cleanup_resets() {
        let transport = UdpTransport::new(TransportOptions {
            local_port: 0,
            ..TransportOptions::default()
        });
        transport.setup().await.unwrap();
        let addr = transport.local_addr().unwrap();
        transport.setup().await.unwrap();
        assert_eq!(transport.local_addr(), Some(addr));

        transport.cleanup().await;
        assert!(!transport.is_running());
        assert!(transport.local_addr().is_none());
    }
}
