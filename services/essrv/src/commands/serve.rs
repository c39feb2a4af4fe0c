use crate::bootstrap::{create_service_info, RelayServer, ServeOverrides};
use crate::config::EssrvConfig;
use anyhow::Result;
use common::service_bootstrap::print_startup_banner;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Run the relay bridge until SIGINT/SIGTERM
pub async fn execute(mut config: EssrvConfig, overrides: &ServeOverrides) -> Result<()> {
    let service_info = create_service_info();
    overrides.apply(&mut config, &service_info);
    config.validate()?;
    print_startup_banner(&service_info);

    let server = RelayServer::bind(config).await?;
    let shutdown = CancellationToken::new();
    common::shutdown::cancel_on_shutdown(shutdown.clone());

    server.run(shutdown).await?;
    info!("Shutdown complete");
    Ok(())
}
