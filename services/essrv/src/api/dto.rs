//! Request bodies of the relay bridge
//!
//! Every field is optional on the wire so handlers can report exactly which
//! required field is missing instead of a generic deserialization failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// `POST /api/command`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct CommandRequest {
    #[schema(example = "192.168.1.50")]
    pub host: Option<String>,
    #[schema(example = 30000)]
    pub port: Option<u16>,
    /// Raw command, either a JSON string or an object
    #[schema(value_type = Object)]
    pub message: Option<Value>,
    /// Seconds to wait for the device reply (default 10)
    #[schema(example = 10.0)]
    pub timeout: Option<f64>,
}

/// `POST /api/discover`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DiscoverRequest {
    /// Seconds to collect broadcast replies (default 10)
    #[schema(example = 10.0)]
    pub timeout: Option<f64>,
}

/// `POST /api/status`
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct StatusRequestBody {
    #[schema(example = "192.168.1.50")]
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Per-command timeout in seconds (default 2.5)
    pub timeout: Option<f64>,
    pub include_pv: Option<bool>,
    pub include_wifi: Option<bool>,
    pub include_em: Option<bool>,
    pub include_bat: Option<bool>,
    /// Seconds between consecutive commands (default 2.0)
    pub delay_between_requests: Option<f64>,
}

/// `POST /api/admin/logs/level`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SetLogLevelRequest {
    /// Level or full filter, e.g. `debug` or `info,essrv=trace`
    #[schema(example = "info,essrv=trace")]
    pub level: String,
}

/// Active log filter
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LogLevelResponse {
    pub level: String,
}
