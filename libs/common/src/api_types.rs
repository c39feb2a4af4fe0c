//! Shared HTTP error model
//!
//! The relay wire format is flat: every failed request answers with
//! `{"error": "<message>"}` plus an optional `field` for validation failures.

use serde::{Deserialize, Serialize};

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

/// Error body returned by every endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct ErrorBody {
    /// Human readable message
    pub error: String,
    /// Offending field for validation failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            field: None,
        }
    }
}

// ============================================================================
// AppError - HTTP Error with proper status codes (requires axum feature)
// ============================================================================

#[cfg(feature = "axum")]
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};

/// Application error with HTTP status code
///
/// Implements `IntoResponse` so handlers can return `Result<Json<T>, AppError>`.
#[cfg(feature = "axum")]
#[derive(Debug, Clone)]
pub struct AppError {
    pub status: StatusCode,
    pub body: ErrorBody,
}

#[cfg(feature = "axum")]
impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody::new(message),
        }
    }

    /// 400 Bad Request
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// 400 Bad Request naming the invalid field
    pub fn validation_error(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = Self::bad_request(message);
        err.body.field = Some(field.into());
        err
    }

    /// 401 Unauthorized
    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Unauthorized")
    }

    /// 500 Internal Server Error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// 502 Bad Gateway - the device leg failed
    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_GATEWAY, message)
    }

    /// 504 Gateway Timeout - the device never answered
    pub fn gateway_timeout(message: impl Into<String>) -> Self {
        Self::new(StatusCode::GATEWAY_TIMEOUT, message)
    }
}

#[cfg(feature = "axum")]
impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.status.as_u16(), self.body.error)
    }
}

#[cfg(feature = "axum")]
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[cfg(feature = "axum")]
impl From<errors::VoltageError> for AppError {
    fn from(err: errors::VoltageError) -> Self {
        let status = StatusCode::from_u16(err.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut app = Self::new(status, err.to_string());
        if let errors::VoltageError::InvalidParameter { param, .. } = &err {
            app.body.field = Some(param.clone());
        }
        app
    }
}

#[cfg(feature = "axum")]
impl From<crate::logging::LogLevelError> for AppError {
    fn from(err: crate::logging::LogLevelError) -> Self {
        use crate::logging::LogLevelError;
        match &err {
            LogLevelError::Invalid(_) => Self::validation_error("level", err.to_string()),
            LogLevelError::NotInitialized => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, err.to_string())
            },
            LogLevelError::Reload(_) => Self::internal_error(err.to_string()),
        }
    }
}

#[cfg(feature = "axum")]
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::internal_error(err.to_string())
    }
}
