//! Relay bridge HTTP API
//!
//! Lets hosts outside the devices' LAN reach them: each endpoint maps onto the
//! bridge's own UDP client, sharing its socket and per-device rate limits.

pub mod admin_handlers;
pub mod dto;
pub mod handlers;
pub mod routes;

use crate::client::UdpClient;
use crate::config::EssrvConfig;
use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use common::AppError;
use std::sync::Arc;
use tracing::warn;

pub use routes::create_routes;

/// Header carrying the shared secret
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Shared state of the bridge
#[derive(Debug)]
pub struct AppState {
    pub client: Arc<UdpClient>,
    pub config: Arc<EssrvConfig>,
}

impl AppState {
    pub fn new(client: Arc<UdpClient>, config: Arc<EssrvConfig>) -> Self {
        Self { client, config }
    }

    /// Bound UDP port, or the configured one before setup
    pub fn udp_port(&self) -> u16 {
        self.client
            .transport()
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or(self.config.udp.local_port)
    }
}

/// Reject requests without the configured `X-API-Key`
pub async fn require_api_key(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(expected) = state.config.api.api_key.as_deref() {
        let provided = req
            .headers()
            .get(API_KEY_HEADER)
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected) {
            warn!("Rejected {} {}: bad or missing API key", req.method(), req.uri().path());
            return AppError::unauthorized().into_response();
        }
    }
    next.run(req).await
}
