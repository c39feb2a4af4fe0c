//! Service Bootstrap and Initialization
//!
//! Handles logging, configuration and the relay bridge lifecycle.

use crate::api::{create_routes, AppState};
use crate::client::UdpClient;
use crate::config::{EssrvConfig, DEFAULT_API_PORT, SERVICE_NAME};
use crate::error::{ErrorExt, EssrvError, Result};
use common::bootstrap_args::ServiceArgs;
use common::service_bootstrap::{get_service_port, FileLogging, ServiceInfo};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Initialize service info for unified bootstrap
pub fn create_service_info() -> ServiceInfo {
    ServiceInfo::new(
        SERVICE_NAME,
        env!("CARGO_PKG_VERSION"),
        "Marstek Energy Storage - UDP relay bridge",
        DEFAULT_API_PORT,
    )
}

/// Initialize logging
///
/// Long-running modes log to files as configured; one-shot commands only
/// log to the console.
pub fn init_environment(
    service_info: &ServiceInfo,
    args: &ServiceArgs,
    logging: Option<&crate::config::LoggingConfig>,
) -> Result<()> {
    let file = logging.map(|l| FileLogging {
        dir: Some(l.dir.clone()),
        json: l.json,
        api_log: l.api_log,
    });
    common::service_bootstrap::init_logging(
        service_info,
        args.parse_log_level(),
        !args.no_color,
        file.as_ref(),
    )
    .map_err(|e| EssrvError::config(format!("Failed to initialize logging: {}", e)))
}

/// Load layered configuration and apply command-line overrides
pub fn load_configuration(args: &ServiceArgs) -> Result<EssrvConfig> {
    let config = EssrvConfig::load(args.config.as_deref())?;
    debug!("Config loaded");
    Ok(config)
}

/// Overrides accepted by `essrv serve`
#[derive(Debug, Clone, Default)]
pub struct ServeOverrides {
    pub bind: Option<SocketAddr>,
    pub api_key: Option<String>,
    pub udp_port: Option<u16>,
}

impl ServeOverrides {
    pub fn apply(&self, config: &mut EssrvConfig, service_info: &ServiceInfo) {
        if let Some(bind) = self.bind {
            config.api.host = bind.ip().to_string();
            config.api.port = bind.port();
        }
        config.api.port = get_service_port(Some(config.api.port), service_info);
        if let Some(key) = &self.api_key {
            config.api.api_key = Some(key.clone()).filter(|k| !k.is_empty());
        }
        if let Some(port) = self.udp_port {
            config.udp.local_port = port;
        }
    }
}

/// A relay bridge bound to its listener, ready to serve
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<AppState>,
}

impl RelayServer {
    /// Bind the UDP transport and the HTTP listener
    pub async fn bind(config: EssrvConfig) -> Result<Self> {
        let config = Arc::new(config);
        let client = Arc::new(UdpClient::from_config(&config));
        client.setup().await?;

        let addr = format!("{}:{}", config.api.host, config.api.port);
        let listener = TcpListener::bind(&addr)
            .await
            .transport_context(&format!("bind HTTP listener on {}", addr))?;

        Ok(Self {
            listener,
            state: Arc::new(AppState::new(client, config)),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener
            .local_addr()
            .internal_context("read HTTP listener address")
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Serve until `shutdown` fires, then release the UDP socket
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let app = create_routes(Arc::clone(&self.state));
        info!(
            "Relay bridge listening on http://{} (UDP port {}, auth {})",
            self.local_addr()?,
            self.state.udp_port(),
            if self.state.config.api.api_key.is_some() { "on" } else { "off" }
        );

        axum::serve(self.listener, app)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await
            .internal_context("HTTP server failed")?;

        self.state.client.cleanup().await;
        info!("Relay bridge stopped");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_overrides() {
        let info = create_service_info();
        let mut config = EssrvConfig::default();
        ServeOverrides {
            bind: Some("127.0.0.1:9100".parse().unwrap()),
            api_key: Some("s3cret".into()),
            udp_port: Some(0),
        }
        .apply(&mut config, &info);
        assert_eq!(config.api.host, "127.0.0.1");
        assert_eq!(config.api.port, 9100);
        assert_eq!(config.api.api_key.as_deref(), Some("s3cret"));
        assert_eq!(config.udp.local_port, 0);

        ServeOverrides {
            api_key: Some(String::new()),
            ..ServeOverrides::default()
        }
        .apply(&mut config, &info);
        assert!(config.api.api_key.is_none());
    }

    #[tokio::test]
    async fn test_bind_ephemeral_and_shutdown() {
        let mut config = EssrvConfig::default();
        config.api.host = "127.0.0.1".into();
        config.api.port = 0;
        config.udp.local_port = 0;

        let server = RelayServer::bind(config).await.unwrap();
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_ne!(server.state().udp_port(), 0);

        let token = CancellationToken::new();
        let handle = tokio::spawn(server.run(token.clone()));
        token.cancel();
        handle.await.unwrap().unwrap();
    }
}
