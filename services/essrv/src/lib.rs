//! essrv library exports for testing

pub mod aggregator;
pub mod api;
pub mod bootstrap;
pub mod client;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod polling;
pub mod relay_client;
pub mod transport;
pub mod verifier;

// Re-export commonly used types
pub use aggregator::{fetch_status, StatusRequest};
pub use client::{DeviceClient, UdpClient};
pub use config::EssrvConfig;
pub use discovery::DiscoveryCache;
pub use error::{EssrvError, Result};
pub use polling::{Availability, PollingControl, TierPlanner};
pub use relay_client::RelayClient;
pub use transport::{TransportOptions, UdpTransport};
pub use verifier::{CommandVerifier, ExpectedEffect, ModeAction, VerifierPolicy};
