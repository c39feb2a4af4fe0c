//! Shared error vocabulary for the Marstek workspace
//!
//! Each crate keeps its own error enum and either converts into
//! [`VoltageError`] or implements [`VoltageErrorTrait`] directly, so the CLI
//! and the relay bridge agree on HTTP status, retryability and log level.

use thiserror::Error;

/// Workspace-wide error type
#[derive(Debug, Error)]
pub enum VoltageError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration: {field}: {reason}")]
    InvalidConfig { field: String, reason: String },

    /// A device answered with something the protocol layer cannot use
    #[error("Protocol error: {protocol}: {message}")]
    Protocol { protocol: String, message: String },

    #[error("Communication error: {0}")]
    Communication(String),

    #[error("Timeout waiting for response from {0}")]
    Timeout(String),

    /// A write was sent but never showed up in status reads
    #[error("Command not confirmed: {0}")]
    NotConfirmed(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid parameter: {param}: {reason}")]
    InvalidParameter { param: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type VoltageResult<T> = Result<T, VoltageError>;

impl VoltageError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidParameter { .. } => 400,
            Self::Unauthorized(_) => 401,
            Self::Protocol { .. } | Self::Communication(_) => 502,
            Self::Timeout(_) | Self::NotConfirmed(_) => 504,
            Self::Configuration(_)
            | Self::InvalidConfig { .. }
            | Self::Io(_)
            | Self::Serialization(_)
            | Self::Internal(_) => 500,
        }
    }
}

impl From<serde_json::Error> for VoltageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl VoltageErrorTrait for VoltageError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::Protocol { .. } => "PROTOCOL_ERROR",
            Self::Communication(_) => "COMMUNICATION_ERROR",
            Self::Timeout(_) => "TIMEOUT",
            Self::NotConfirmed(_) => "NOT_CONFIRMED",
            Self::Unauthorized(_) => "UNAUTHORIZED",
            Self::InvalidParameter { .. } => "INVALID_PARAMETER",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::Configuration(_) | Self::InvalidConfig { .. } => ErrorCategory::Configuration,
            Self::Protocol { .. } => ErrorCategory::Protocol,
            Self::Communication(_) => ErrorCategory::Network,
            Self::Timeout(_) | Self::NotConfirmed(_) => ErrorCategory::Timeout,
            Self::Unauthorized(_) => ErrorCategory::Permission,
            Self::InvalidParameter { .. } => ErrorCategory::Validation,
            Self::Io(_) | Self::Serialization(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Communication(_))
    }
}

/// Error category, used for HTTP mapping and log routing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Network,
    Timeout,
    Validation,
    Permission,
    /// Malformed or unexpected device reply
    Protocol,
    Internal,
}

/// Common interface over the per-crate error enums
pub trait VoltageErrorTrait: std::error::Error + Send + Sync + 'static {
    /// Stable code for logs and API bodies
    fn error_code(&self) -> &'static str;

    fn category(&self) -> ErrorCategory;

    /// Category-based by default
    fn is_retryable(&self) -> bool {
        matches!(self.category(), ErrorCategory::Network | ErrorCategory::Timeout)
    }

    #[cfg(feature = "axum-support")]
    fn http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::Permission => StatusCode::UNAUTHORIZED,
            ErrorCategory::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorCategory::Network | ErrorCategory::Protocol => StatusCode::BAD_GATEWAY,
            ErrorCategory::Configuration | ErrorCategory::Internal => {
                StatusCode::INTERNAL_SERVER_ERROR
            },
        }
    }

    /// Level at which the error is worth logging when it ends a request
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Configuration => Level::ERROR,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Protocol => {
                Level::WARN
            },
            ErrorCategory::Validation | ErrorCategory::Permission => Level::INFO,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        let invalid = VoltageError::InvalidParameter {
            param: "power".into(),
            reason: "out of range".into(),
        };
        assert_eq!(invalid.status_code(), 400);
        assert_eq!(VoltageError::Unauthorized("key".into()).status_code(), 401);
        assert_eq!(VoltageError::Timeout("10.0.0.2".into()).status_code(), 504);
        assert_eq!(VoltageError::NotConfirmed("charge".into()).status_code(), 504);
        assert_eq!(
            VoltageError::Communication("socket closed".into()).status_code(),
            502
        );
        assert_eq!(VoltageError::Internal("boom".into()).status_code(), 500);
    }

    #[test]
    fn test_retryable() {
        assert!(VoltageError::Timeout("x".into()).is_retryable());
        assert!(VoltageError::Communication("x".into()).is_retryable());
        assert!(!VoltageError::NotConfirmed("charge".into()).is_retryable());
        assert!(!VoltageError::Configuration("x".into()).is_retryable());
    }

    #[test]
    fn test_trait_categories() {
        let err = VoltageError::Timeout("x".into());
        assert_eq!(err.category(), ErrorCategory::Timeout);
        assert_eq!(err.error_code(), "TIMEOUT");
        assert_eq!(err.log_level(), tracing::Level::WARN);

        let err: VoltageError = serde_json::from_str::<u8>("nope").unwrap_err().into();
        assert_eq!(err.category(), ErrorCategory::Internal);
        assert_eq!(err.log_level(), tracing::Level::ERROR);
    }
}
