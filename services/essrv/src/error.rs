//! Error handling for the Marstek service
//!
//! Transport failures are ordinary values here: the aggregator and verifier
//! branch on them instead of aborting.

use common::AppError;
use errors::{ErrorCategory, VoltageError, VoltageErrorTrait};
use thiserror::Error;
use tracing::{debug, error, warn, Level};
use voltage_marstek::ValidationError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EssrvError {
    /// Rejected before any I/O
    #[error("Validation error ({field}): {message}")]
    Validation { field: String, message: String },

    /// No correlated reply within the deadline
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Socket or send failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Device replied with something unusable
    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("{action} not confirmed on {host} after {attempts} attempts")]
    NotConfirmed {
        action: String,
        host: String,
        attempts: u32,
    },

    /// Relay bridge unreachable or answered with an error
    #[error("Relay error: {0}")]
    Relay(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, EssrvError>;

impl EssrvError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn relay(msg: impl Into<String>) -> Self {
        Self::Relay(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<ValidationError> for EssrvError {
    fn from(err: ValidationError) -> Self {
        Self::Validation {
            field: err.field,
            message: err.message,
        }
    }
}

impl From<std::io::Error> for EssrvError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for EssrvError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl From<reqwest::Error> for EssrvError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("relay request timed out: {}", err))
        } else {
            Self::Relay(err.to_string())
        }
    }
}

impl From<VoltageError> for EssrvError {
    fn from(err: VoltageError) -> Self {
        match err {
            VoltageError::Configuration(msg) => Self::Config(msg),
            VoltageError::InvalidConfig { field, reason } => {
                Self::Config(format!("{}: {}", field, reason))
            },
            VoltageError::InvalidParameter { param, reason } => Self::Validation {
                field: param,
                message: reason,
            },
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<EssrvError> for VoltageError {
    fn from(err: EssrvError) -> Self {
        match err {
            EssrvError::Validation { field, message } => VoltageError::InvalidParameter {
                param: field,
                reason: message,
            },
            EssrvError::Timeout(msg) => VoltageError::Timeout(msg),
            EssrvError::Transport(msg) | EssrvError::Relay(msg) => {
                VoltageError::Communication(msg)
            },
            EssrvError::Protocol(message) => VoltageError::Protocol {
                protocol: "marstek".to_string(),
                message,
            },
            e @ EssrvError::NotConfirmed { .. } => VoltageError::NotConfirmed(e.to_string()),
            EssrvError::Unauthorized(msg) => VoltageError::Unauthorized(msg),
            EssrvError::Config(msg) => VoltageError::Configuration(msg),
            EssrvError::Internal(msg) => VoltageError::Internal(msg),
        }
    }
}

impl VoltageErrorTrait for EssrvError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ESSRV_VALIDATION",
            Self::Timeout(_) => "ESSRV_TIMEOUT",
            Self::Transport(_) => "ESSRV_TRANSPORT",
            Self::Protocol(_) => "ESSRV_PROTOCOL",
            Self::NotConfirmed { .. } => "ESSRV_NOT_CONFIRMED",
            Self::Relay(_) => "ESSRV_RELAY",
            Self::Unauthorized(_) => "ESSRV_UNAUTHORIZED",
            Self::Config(_) => "ESSRV_CONFIG",
            Self::Internal(_) => "ESSRV_INTERNAL",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation { .. } => ErrorCategory::Validation,
            Self::Timeout(_) | Self::NotConfirmed { .. } => ErrorCategory::Timeout,
            Self::Transport(_) | Self::Relay(_) => ErrorCategory::Network,
            Self::Protocol(_) => ErrorCategory::Protocol,
            Self::Unauthorized(_) => ErrorCategory::Permission,
            Self::Config(_) => ErrorCategory::Configuration,
            Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    fn is_retryable(&self) -> bool {
        // the verifier already exhausted its own schedule
        !matches!(self, Self::NotConfirmed { .. })
            && matches!(
                self.category(),
                ErrorCategory::Network | ErrorCategory::Timeout
            )
    }
}

impl From<EssrvError> for AppError {
    fn from(err: EssrvError) -> Self {
        let status = err.http_status();
        match err.log_level() {
            Level::ERROR => error!("[{}] {}", err.error_code(), err),
            Level::WARN => warn!("[{}] {}", err.error_code(), err),
            _ => debug!("[{}] {}", err.error_code(), err),
        }
        match err {
            EssrvError::Validation { field, message } => AppError::validation_error(field, message),
            EssrvError::Unauthorized(_) => AppError::unauthorized(),
            e @ (EssrvError::Transport(_) | EssrvError::Relay(_)) => {
                AppError::bad_gateway(e.to_string())
            },
            e @ EssrvError::Timeout(_) => AppError::gateway_timeout(e.to_string()),
            other => AppError::new(status, other.to_string()),
        }
    }
}

/// Attach context while converting foreign errors
pub trait ErrorExt<T> {
    fn transport_context(self, context: &str) -> Result<T>;
    fn internal_context(self, context: &str) -> Result<T>;
}

impl<T, E: std::fmt::Display> ErrorExt<T> for std::result::Result<T, E> {
    fn transport_context(self, context: &str) -> Result<T> {
        self.map_err(|e| EssrvError::Transport(format!("{}: {}", context, e)))
    }

    fn internal_context(self, context: &str) -> Result<T> {
        self.map_err(|e| EssrvError::Internal(format!("{}: {}", context, e)))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(
            AppError::from(EssrvError::timeout("no reply")).status,
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            AppError::from(EssrvError::transport("send failed")).status,
            StatusCode::BAD_GATEWAY
        );
        let err = AppError::from(EssrvError::validation("power", "too high"));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.body.field.as_deref(), Some("power"));
        assert_eq!(
            AppError::from(EssrvError::Unauthorized("bad key".into())).status,
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn test_upstream_failures_map_to_gateway_errors() {
        let err = AppError::from(EssrvError::relay("connection refused"));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.body.error, "Relay error: connection refused");
        assert!(err.body.field.is_none());

        let err = AppError::from(EssrvError::transport("transport closed"));
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        assert_eq!(err.body.error, "Transport error: transport closed");
    }

    #[test]
    fn test_retryability() {
        assert!(EssrvError::timeout("x").is_retryable());
        assert!(EssrvError::transport("x").is_retryable());
        assert!(!EssrvError::validation("id", "x").is_retryable());
        let not_confirmed = EssrvError::NotConfirmed {
            action: "charge".into(),
            host: "10.0.0.2".into(),
            attempts: 8,
        };
        assert!(!not_confirmed.is_retryable());
        assert_eq!(not_confirmed.category(), ErrorCategory::Timeout);
        assert_eq!(
            not_confirmed.to_string(),
            "charge not confirmed on 10.0.0.2 after 8 attempts"
        );
    }

    #[test]
    fn test_voltage_error_round_trip_keeps_field() {
        let voltage: VoltageError = EssrvError::validation("week_set", "out of range").into();
        assert_eq!(voltage.status_code(), 400);
        let back: EssrvError = voltage.into();
        assert_eq!(back, EssrvError::validation("week_set", "out of range"));
    }

    #[test]
    fn test_error_ext() {
        let res: std::result::Result<(), &str> = Err("boom");
        assert_eq!(
            res.transport_context("bind").unwrap_err(),
            EssrvError::Transport("bind: boom".into())
        );
    }
}
