//! Relay bridge handlers

#![allow(clippy::disallowed_methods)] // json! macro used in multiple functions

use super::dto::{CommandRequest, DiscoverRequest, StatusRequestBody};
use super::AppState;
use crate::aggregator::StatusRequest;
use crate::client::DeviceClient;
use crate::config::{secs, MAX_TIMEOUT_SECS};
use axum::{body::Bytes, extract::State, response::Json};
use common::AppError;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

const DEFAULT_COMMAND_TIMEOUT_SECS: f64 = 10.0;

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, AppError> {
    serde_json::from_slice(body)
        .map_err(|e| AppError::bad_request(format!("Invalid JSON body: {}", e)))
}

fn timeout_or(value: Option<f64>, default: f64) -> Result<Duration, AppError> {
    let secs_value = value.unwrap_or(default);
    if !secs_value.is_finite() || secs_value <= 0.0 {
        return Err(AppError::validation_error("timeout", "timeout must be positive"));
    }
    if secs_value > MAX_TIMEOUT_SECS {
        return Err(AppError::validation_error(
            "timeout",
            format!("timeout must not exceed {} seconds", MAX_TIMEOUT_SECS),
        ));
    }
    Ok(secs(secs_value))
}

/// Health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Bridge is up", body = serde_json::Value),
        (status = 401, description = "Missing or wrong X-API-Key", body = common::ErrorBody)
    ),
    tag = "essrv"
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "udp_port": state.udp_port(),
    }))
}

/// Forward a raw command to a device
#[utoipa::path(
    post,
    path = "/api/command",
    request_body = CommandRequest,
    responses(
        (status = 200, description = "Device reply", body = serde_json::Value),
        (status = 400, description = "Malformed body or invalid command", body = common::ErrorBody),
        (status = 502, description = "UDP send failed", body = common::ErrorBody),
        (status = 504, description = "Device did not answer in time", body = common::ErrorBody)
    ),
    tag = "essrv"
)]
pub async fn send_command(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let req: CommandRequest = parse_body(&body)?;
    let (Some(host), Some(message)) = (req.host.filter(|h| !h.is_empty()), req.message) else {
        return Err(AppError::bad_request("Missing required fields: host, message"));
    };
    let message = match message {
        Value::String(text) => text,
        obj @ Value::Object(_) => obj.to_string(),
        _ => {
            return Err(AppError::validation_error(
                "message",
                "message must be a JSON string or object",
            ))
        },
    };
    let port = req.port.unwrap_or(state.config.udp.device_port);
    let timeout = timeout_or(req.timeout, DEFAULT_COMMAND_TIMEOUT_SECS)?;

    debug!("Relaying command to {}:{}", host, port);
    let response = state.client.send_raw(&message, &host, port, timeout).await?;
    Ok(Json(json!({ "response": response })))
}

/// Broadcast discovery
#[utoipa::path(
    post,
    path = "/api/discover",
    request_body = DiscoverRequest,
    responses(
        (status = 200, description = "Devices that answered", body = serde_json::Value),
        (status = 502, description = "Broadcast failed", body = common::ErrorBody)
    ),
    tag = "essrv"
)]
pub async fn discover(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    // an empty or unreadable body means defaults
    let req: DiscoverRequest = serde_json::from_slice(&body).unwrap_or_default();
    let timeout = timeout_or(req.timeout, state.config.discovery.timeout_secs)?;

    let devices = state.client.discover(timeout, false).await?;
    info!("Relay discovery returned {} device(s)", devices.len());
    Ok(Json(json!({ "devices": devices })))
}

/// Run one status cycle
#[utoipa::path(
    post,
    path = "/api/status",
    request_body = StatusRequestBody,
    responses(
        (status = 200, description = "Merged device status", body = serde_json::Value),
        (status = 400, description = "Malformed body or missing host", body = common::ErrorBody),
        (status = 504, description = "No command produced data", body = common::ErrorBody)
    ),
    tag = "essrv"
)]
pub async fn device_status(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<Value>, AppError> {
    let req: StatusRequestBody = parse_body(&body)?;
    let Some(host) = req.host.filter(|h| !h.is_empty()) else {
        return Err(AppError::bad_request("Missing required field: host"));
    };
    let port = req.port.unwrap_or(state.config.udp.device_port);
    let defaults = &state.config.status;
    let delay = req
        .delay_between_requests
        .unwrap_or(defaults.delay_between_requests_secs);
    if !delay.is_finite() || delay < 0.0 {
        return Err(AppError::validation_error(
            "delay_between_requests",
            "delay_between_requests must not be negative",
        ));
    }
    let request = StatusRequest {
        timeout: timeout_or(req.timeout, defaults.timeout_secs)?,
        include_em: req.include_em.unwrap_or(defaults.include_em),
        include_pv: req.include_pv.unwrap_or(defaults.include_pv),
        include_wifi: req.include_wifi.unwrap_or(defaults.include_wifi),
        include_bat: req.include_bat.unwrap_or(defaults.include_bat),
        delay_between_requests: secs(delay),
    };

    let status = state.client.fetch_status(&host, port, &request, None).await?;
    if !status.has_fresh_data {
        return Err(AppError::gateway_timeout(format!(
            "No response from {}:{}",
            host, port
        )));
    }
    Ok(Json(json!({ "status": status })))
}
