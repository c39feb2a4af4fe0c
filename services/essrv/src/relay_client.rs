//! Device access through a remote relay bridge
//!
//! For hosts that cannot reach the devices' LAN directly. Commands travel as
//! JSON over HTTP to an `essrv serve` instance, which forwards them over UDP.

use crate::aggregator::StatusRequest;
use crate::api::API_KEY_HEADER;
use crate::client::DeviceClient;
use crate::error::{EssrvError, Result};
use crate::polling::PollingControl;
use crate::transport::{RequestOutcome, StatsByMethod, StatsRegistry};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, info};
use voltage_marstek::{Command, DeviceInfo, DeviceStatus, RequestIdCounter, StatusParts};

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);
const DISCOVER_TIMEOUT: Duration = Duration::from_secs(15);
/// Added on top of the device-side timeout for the HTTP round trip
const HTTP_MARGIN: Duration = Duration::from_secs(5);

pub struct RelayClient {
    base_url: String,
    api_key: Option<String>,
    http: Client,
    ids: RequestIdCounter,
    polling: PollingControl,
    stats: Mutex<StatsRegistry>,
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .finish()
    }
}

impl RelayClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| EssrvError::relay(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http,
            ids: RequestIdCounter::new(),
            polling: PollingControl::new(),
            stats: Mutex::new(StatsRegistry::default()),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Probe `/health`; returns the bridge's health document
    pub async fn setup(&self) -> Result<Value> {
        let mut request = self
            .http
            .get(format!("{}/health", self.base_url))
            .timeout(HEALTH_TIMEOUT);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        let response = request.send().await?;
        let health = read_response(response).await?;
        let version = health.get("version").and_then(|v| v.as_str()).unwrap_or("?");
        info!("Connected to relay {} (version {})", self.base_url, version);
        Ok(health)
    }

    async fn post(&self, path: &str, body: &Value, timeout: Duration) -> Result<Value> {
        let mut request = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .timeout(timeout)
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        debug!("Relay POST {} (timeout {:?})", path, timeout);
        let response = request.send().await?;
        read_response(response).await
    }

    fn record(&self, method: &str, host: &str, outcome: RequestOutcome) {
        self.stats.lock().record(method, host, &outcome);
    }

    pub fn command_stats_for_ip(&self, ip: &str) -> StatsByMethod {
        self.stats.lock().for_ip(ip)
    }
}

async fn read_response(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let text = response.text().await?;
    let body = serde_json::from_str::<Value>(&text).unwrap_or(Value::Null);
    if status.is_success() && body.is_null() {
        return Err(EssrvError::protocol(format!(
            "relay returned a non-JSON body: {}",
            text
        )));
    }
    map_status(status, body)
}

/// Bridge HTTP status back into the error taxonomy
fn map_status(status: StatusCode, body: Value) -> Result<Value> {
    if status.is_success() {
        return Ok(body);
    }
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string());
    Err(match status {
        StatusCode::UNAUTHORIZED => EssrvError::Unauthorized(message),
        StatusCode::GATEWAY_TIMEOUT => EssrvError::Timeout(message),
        StatusCode::BAD_REQUEST => {
            let field = body
                .get("field")
                .and_then(Value::as_str)
                .unwrap_or("request");
            EssrvError::validation(field, message)
        },
        _ => EssrvError::relay(format!("{}: {}", status, message)),
    })
}

#[async_trait]
impl DeviceClient for RelayClient {
    fn next_request_id(&self) -> u64 {
        self.ids.next()
    }

    #[allow(clippy::disallowed_methods)] // json! macro internally uses unwrap
    async fn send_command(
        &self,
        command: &Command,
        host: &str,
        port: u16,
        timeout: Duration,
        _quiet: bool,
    ) -> Result<Value> {
        let body = json!({
            "host": host,
            "port": port,
            "message": command.to_value(),
            "timeout": timeout.as_secs_f64(),
        });
        let method = command.method().as_str();
        let started = Instant::now();
        let result = self.post("/api/command", &body, timeout + HTTP_MARGIN).await;
        match &result {
            Ok(_) => self.record(method, host, RequestOutcome::Success(started.elapsed())),
            Err(EssrvError::Timeout(_)) => self.record(method, host, RequestOutcome::Timeout),
            Err(e) => self.record(method, host, RequestOutcome::Failure(e.to_string())),
        }
        let mut reply = result?;
        reply
            .get_mut("response")
            .map(Value::take)
            .ok_or_else(|| EssrvError::protocol("relay reply lacks 'response'"))
    }

    #[allow(clippy::disallowed_methods)] // json! macro internally uses unwrap
    async fn discover(&self, timeout: Duration, _use_cache: bool) -> Result<Vec<DeviceInfo>> {
        let body = json!({"timeout": timeout.as_secs_f64()});
        let http_timeout = DISCOVER_TIMEOUT.max(timeout + HTTP_MARGIN);
        let mut reply = self.post("/api/discover", &body, http_timeout).await?;
        let devices = reply
            .get_mut("devices")
            .map(Value::take)
            .ok_or_else(|| EssrvError::protocol("relay reply lacks 'devices'"))?;
        Ok(serde_json::from_value(devices)?)
    }

    /// The bridge runs the cycle; the merge with `previous` happens here
    #[allow(clippy::disallowed_methods)] // json! macro internally uses unwrap
    async fn fetch_status(
        &self,
        host: &str,
        port: u16,
        request: &StatusRequest,
        previous: Option<&DeviceStatus>,
    ) -> Result<DeviceStatus> {
        let body = json!({
            "host": host,
            "port": port,
            "timeout": request.timeout.as_secs_f64(),
            "include_em": request.include_em,
            "include_pv": request.include_pv,
            "include_wifi": request.include_wifi,
            "include_bat": request.include_bat,
            "delay_between_requests": request.delay_between_requests.as_secs_f64(),
        });
        let calls = request.methods().len() as u32;
        let http_timeout =
            (request.timeout + request.delay_between_requests) * calls + HTTP_MARGIN;

        let mut status = match self.post("/api/status", &body, http_timeout).await {
            Ok(mut reply) => {
                let value = reply
                    .get_mut("status")
                    .map(Value::take)
                    .ok_or_else(|| EssrvError::protocol("relay reply lacks 'status'"))?;
                serde_json::from_value::<DeviceStatus>(value)?
            },
            // the bridge answers 504 when no command produced data
            Err(EssrvError::Timeout(msg)) => {
                debug!("Relay status for {} had no fresh data: {}", host, msg);
                let mut stale = voltage_marstek::merge_status(None, &StatusParts::default());
                stale.device_ip = Some(host.to_string());
                stale
            },
            Err(e) => return Err(e),
        };
        if let Some(prev) = previous {
            status.fill_missing_from(prev);
        }
        Ok(status)
    }

    fn polling(&self) -> &PollingControl {
        &self.polling
    }

    fn command_stats(&self) -> StatsByMethod {
        self.stats.lock().global()
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            map_status(StatusCode::OK, json!({"response": 1})).unwrap(),
            json!({"response": 1})
        );
        assert_eq!(
            map_status(StatusCode::UNAUTHORIZED, json!({"error": "Unauthorized"})).unwrap_err(),
            EssrvError::Unauthorized("Unauthorized".into())
        );
        assert!(map_status(StatusCode::GATEWAY_TIMEOUT, Value::Null)
            .unwrap_err()
            .is_timeout());
        assert_eq!(
            map_status(
                StatusCode::BAD_REQUEST,
                json!({"error": "power out of range", "field": "power"})
            )
            .unwrap_err(),
            EssrvError::validation("power", "power out of range")
        );
        assert!(matches!(
            map_status(StatusCode::BAD_GATEWAY, json!({"error": "send failed"})).unwrap_err(),
            EssrvError::Relay(_)
        ));
    }

    #[test]
    fn test_base_url_normalized() {
        let client = RelayClient::new("http://relay.local:8765/", None).unwrap();
        assert_eq!(client.base_url(), "http://relay.local:8765");
    }
}
