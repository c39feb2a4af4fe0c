//! Status aggregation
//!
//! One cycle issues the status commands in a fixed order, spaced by a delay,
//! and folds whatever succeeded into a `DeviceStatus`. A failed command is
//! skipped; it never aborts the cycle.

use crate::client::DeviceClient;
use crate::config::{secs, StatusConfig};
use crate::error::EssrvError;
use chrono::Utc;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;
use voltage_marstek::response::Datagram;
use voltage_marstek::{
    command, BatStatusResult, Command, DeviceStatus, EmStatusResult, EsModeResult,
    EsStatusResult, Method, PvStatusResult, StatusParts, WifiStatusResult,
};

/// Status commands always address battery unit 0
const STATUS_DEVICE_ID: u8 = 0;

/// Parameters of one status cycle
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRequest {
    /// Per-command timeout
    pub timeout: Duration,
    pub include_em: bool,
    pub include_pv: bool,
    pub include_wifi: bool,
    pub include_bat: bool,
    /// Pause between consecutive commands
    pub delay_between_requests: Duration,
}

impl Default for StatusRequest {
    fn default() -> Self {
        Self::from(&StatusConfig::default())
    }
}

impl From<&StatusConfig> for StatusRequest {
    fn from(cfg: &StatusConfig) -> Self {
        Self {
            timeout: secs(cfg.timeout_secs),
            include_em: cfg.include_em,
            include_pv: cfg.include_pv,
            include_wifi: cfg.include_wifi,
            include_bat: cfg.include_bat,
            delay_between_requests: secs(cfg.delay_between_requests_secs),
        }
    }
}

impl StatusRequest {
    /// Methods issued this cycle, in order
    pub fn methods(&self) -> Vec<Method> {
        let mut methods = vec![Method::EsMode, Method::EsStatus];
        if self.include_em {
            methods.push(Method::EmStatus);
        }
        if self.include_pv {
            methods.push(Method::PvStatus);
        }
        if self.include_wifi {
            methods.push(Method::WifiStatus);
        }
        if self.include_bat {
            methods.push(Method::BatStatus);
        }
        methods
    }

    /// Upper bound on the wall time of one cycle
    pub fn worst_case(&self) -> Duration {
        let calls = self.methods().len() as u32;
        self.timeout * calls + self.delay_between_requests * calls.saturating_sub(1)
    }
}

/// How one status command ended
#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    Success(Map<String, Value>),
    Timeout,
    Transport(String),
    /// The device answered with an error, or the request was refused locally
    Rejected(String),
}

fn status_command(method: Method, id: u64) -> Option<Command> {
    let cmd = match method {
        Method::EsMode => command::es_mode(id, STATUS_DEVICE_ID),
        Method::EsStatus => command::es_status(id, STATUS_DEVICE_ID),
        Method::EmStatus => command::em_status(id, STATUS_DEVICE_ID),
        Method::PvStatus => command::pv_status(id, STATUS_DEVICE_ID),
        Method::WifiStatus => command::wifi_status(id, STATUS_DEVICE_ID),
        Method::BatStatus => command::battery_status(id, STATUS_DEVICE_ID),
        Method::GetDevice | Method::SetMode => return None,
    };
    Some(cmd)
}

/// Send one command and classify what came back
pub async fn run_command<C: DeviceClient + ?Sized>(
    client: &C,
    cmd: &Command,
    host: &str,
    port: u16,
    timeout: Duration,
) -> CommandOutcome {
    match client.send_command(cmd, host, port, timeout, true).await {
        Ok(response) => match Datagram::classify(&response) {
            Datagram::Reply(result) => CommandOutcome::Success(result.clone()),
            Datagram::DeviceError(err) => CommandOutcome::Rejected(err.to_string()),
            _ => CommandOutcome::Rejected("reply carries no result".to_string()),
        },
        Err(EssrvError::Timeout(_)) => CommandOutcome::Timeout,
        Err(e @ (EssrvError::Validation { .. } | EssrvError::Unauthorized(_))) => {
            CommandOutcome::Rejected(e.to_string())
        },
        Err(e) => CommandOutcome::Transport(e.to_string()),
    }
}

fn store(parts: &mut StatusParts, method: Method, result: &Map<String, Value>) {
    match method {
        Method::EsMode => parts.mode = Some(EsModeResult::from_result(result)),
        Method::EsStatus => parts.core = Some(EsStatusResult::from_result(result)),
        Method::EmStatus => parts.em = Some(EmStatusResult::from_result(result)),
        Method::PvStatus => parts.pv = Some(PvStatusResult::from_result(result)),
        Method::WifiStatus => parts.wifi = Some(WifiStatusResult::from_result(result)),
        Method::BatStatus => parts.bat = Some(BatStatusResult::from_result(result)),
        Method::GetDevice | Method::SetMode => {},
    }
}

/// Run one status cycle against `host:port` and merge it over `previous`
pub async fn fetch_status<C: DeviceClient + ?Sized>(
    client: &C,
    host: &str,
    port: u16,
    request: &StatusRequest,
    previous: Option<&DeviceStatus>,
) -> DeviceStatus {
    let mut parts = StatusParts::default();

    for (index, method) in request.methods().into_iter().enumerate() {
        if index > 0 && !request.delay_between_requests.is_zero() {
            tokio::time::sleep(request.delay_between_requests).await;
        }
        let Some(cmd) = status_command(method, client.next_request_id()) else {
            continue;
        };
        match run_command(client, &cmd, host, port, request.timeout).await {
            CommandOutcome::Success(result) => store(&mut parts, method, &result),
            CommandOutcome::Timeout => debug!("{} to {} timed out", method, host),
            CommandOutcome::Transport(e) => debug!("{} to {} failed: {}", method, host, e),
            CommandOutcome::Rejected(e) => debug!("{} to {} rejected: {}", method, host, e),
        }
    }

    let mut status = voltage_marstek::merge_status(previous, &parts);
    status.device_ip = Some(host.to_string());
    if status.has_fresh_data {
        status.last_update = Some(Utc::now());
    }
    debug!(
        "Status cycle for {}: {}/{} commands succeeded, {} fields known",
        host,
        parts.succeeded(),
        request.methods().len(),
        status.known_field_count()
    );
    status
}
