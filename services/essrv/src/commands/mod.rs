//! `essrv` subcommands
//!
//! Every command except `serve` talks to devices through a [`Connection`]:
//! directly over UDP, or through a relay bridge when `--relay` is given.

pub mod discover;
pub mod send;
pub mod serve;
pub mod set_mode;
pub mod status;
pub mod watch;

use crate::client::{DeviceClient, UdpClient};
use crate::config::EssrvConfig;
use crate::relay_client::RelayClient;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::debug;

/// Relay selection shared by all device commands
#[derive(Debug, Clone, Default)]
pub struct RelayTarget {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// A ready device client plus what it takes to shut it down
pub enum Connection {
    Udp(Arc<UdpClient>),
    Relay(Arc<RelayClient>),
}

impl Connection {
    pub async fn open(config: &EssrvConfig, relay: &RelayTarget) -> Result<Self> {
        match &relay.url {
            Some(url) => {
                let client = RelayClient::new(url.clone(), relay.api_key.clone())?;
                client
                    .setup()
                    .await
                    .with_context(|| format!("Relay {} is not reachable", url))?;
                Ok(Self::Relay(Arc::new(client)))
            },
            None => {
                let client = UdpClient::from_config(config);
                client.setup().await.context("Failed to open UDP socket")?;
                Ok(Self::Udp(Arc::new(client)))
            },
        }
    }

    pub fn client(&self) -> Arc<dyn DeviceClient> {
        match self {
            Self::Udp(client) => Arc::clone(client) as Arc<dyn DeviceClient>,
            Self::Relay(client) => Arc::clone(client) as Arc<dyn DeviceClient>,
        }
    }

    pub async fn close(self) {
        if let Self::Udp(client) = self {
            client.cleanup().await;
        }
        debug!("Connection closed");
    }
}
