//! Shutdown signal handling for long-running commands

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sig) => {
            sig.recv().await;
        },
        Err(e) => {
            warn!("SIGTERM handler unavailable ({}), stop with Ctrl+C", e);
            std::future::pending::<()>().await
        },
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await
}

/// Resolve on Ctrl+C, or SIGTERM on Unix
pub async fn wait_for_shutdown() {
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Ctrl+C handler failed: {}", e);
                std::future::pending::<()>().await
            }
        },
        _ = terminate() => {},
    }
}

/// Cancel `token` once a shutdown signal arrives
///
/// The watcher task ends quietly if the token is cancelled elsewhere first.
pub fn cancel_on_shutdown(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = wait_for_shutdown() => {
                info!("Shutdown signal received");
                token.cancel();
            },
            _ = token.cancelled() => {},
        }
    });
}

