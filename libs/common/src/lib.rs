//! Shared foundation for the Marstek energy-storage workspace
//!
//! Provides functions shared by the CLI and the relay bridge:
//! - logging (console, daily files, API access log)
//! - HTTP error type for axum handlers
//! - layered configuration loading
//! - startup banner, shutdown signals and network interface enumeration

pub mod api_types;
pub mod bootstrap_args;
pub mod config_loader;
pub mod logging;
pub mod network;
pub mod service_bootstrap;
pub mod shutdown;

pub use api_types::ErrorBody;

#[cfg(feature = "axum")]
pub use api_types::AppError;

// Re-export common dependencies
pub use anyhow;
pub use serde;
pub use serde_json;
pub use tokio;

#[cfg(feature = "cli")]
pub use clap;
