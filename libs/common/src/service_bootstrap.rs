//! Service bootstrap utilities: startup banner and logging initialization

use crate::logging::{self, LogConfig};
use std::path::PathBuf;
use tracing::{info, Level};

/// Service metadata for startup
pub struct ServiceInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub default_port: u16,
}

impl ServiceInfo {
    /// `version` is passed in so it reflects the calling crate, not `common`
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        default_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            default_port,
        }
    }
}

/// Print the startup banner
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
 ███████╗███████╗███████╗██████╗ ██╗   ██╗
 ██╔════╝██╔════╝██╔════╝██╔══██╗██║   ██║
 █████╗  ███████╗███████╗██████╔╝██║   ██║
 ██╔══╝  ╚════██║╚════██║██╔══██╗╚██╗ ██╔╝
 ███████╗███████║███████║██║  ██║ ╚████╔╝
 ╚══════╝╚══════╝╚══════╝╚═╝  ╚═╝  ╚═══╝
            "#;

    info!("{}", banner);
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!(" Default Port: {}", service.default_port);
}

/// File logging options resolved from the service config
#[derive(Debug, Clone, Default)]
pub struct FileLogging {
    pub dir: Option<String>,
    pub json: bool,
    pub api_log: bool,
}

/// Initialize logging for a service
///
/// `file` is `None` for one-shot CLI commands; the relay bridge passes its
/// configured directory (overridable by `ESSRV_LOG_DIR`).
pub fn init_logging(
    service: &ServiceInfo,
    level: Level,
    ansi: bool,
    file: Option<&FileLogging>,
) -> anyhow::Result<()> {
    let log_dir: Option<PathBuf> =
        file.map(|f| logging::resolve_log_dir(f.dir.as_deref()).join(&service.name));

    let config = LogConfig {
        service_name: service.name.clone(),
        log_dir,
        console_level: level,
        ansi,
        enable_json: file.is_some_and(|f| f.json),
        enable_api_log: file.is_some_and(|f| f.api_log),
        api_log_level: Level::INFO,
    };

    logging::init_with_config(config).map_err(|e| anyhow::anyhow!("{}", e))
}

/// Resolve the HTTP port: explicit value, then `{SERVICE}_PORT`, then the default
pub fn get_service_port(config_port: Option<u16>, service: &ServiceInfo) -> u16 {
    if let Some(port) = config_port.filter(|p| *p > 0) {
        return port;
    }

    let env_var = format!("{}_PORT", service.name.to_uppercase());
    std::env::var(&env_var)
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(service.default_port)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_service_info_creation() {
        let service = ServiceInfo::new("essrv", "1.2.3", "Relay", 8765);
        assert_eq!(service.name, "essrv");
        assert_eq!(service.version, "1.2.3");
        assert_eq!(service.default_port, 8765);
    }

    #[test]
    fn test_get_service_port_prefers_explicit() {
        let service = ServiceInfo::new("porttest", "0", "x", 8765);
        assert_eq!(get_service_port(Some(9001), &service), 9001);
        std::env::remove_var("PORTTEST_PORT");
        assert_eq!(get_service_port(None, &service), 8765);
        assert_eq!(get_service_port(Some(0), &service), 8765);
    }
}
