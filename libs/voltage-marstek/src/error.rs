//! Protocol error types

use thiserror::Error;

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ValidationError>;

/// A command or message rejected before it reached a device
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Offending field (`method`, `params`, `power`, `manual_cfg`, ...)
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<ValidationError> for errors::VoltageError {
    fn from(err: ValidationError) -> Self {
        errors::VoltageError::InvalidParameter {
            param: err.field,
            reason: err.message,
        }
    }
}
