//! Common command-line arguments
//!
//! Services flatten [`ServiceArgs`] into their own clap parser and add subcommands.

#[cfg(feature = "cli")]
use clap::Args;

/// Global startup arguments shared by every binary in the workspace
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[cfg_attr(
        feature = "cli",
        arg(short = 'l', long, default_value = "info", env = "ESSRV_LOG_LEVEL", global = true)
    )]
    pub log_level: String,

    /// Configuration file (toml, yaml or json)
    #[cfg_attr(feature = "cli", arg(short = 'c', long, env = "ESSRV_CONFIG", global = true))]
    pub config: Option<std::path::PathBuf>,

    /// Disable colored output
    #[cfg_attr(feature = "cli", arg(long, global = true))]
    pub no_color: bool,

    /// Only validate configuration, print it and exit
    #[cfg_attr(feature = "cli", arg(long, global = true))]
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            config: None,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_default_args() {
        let args = ServiceArgs::default();
        assert_eq!(args.log_level, "info");
        assert!(args.config.is_none());
        assert!(!args.validate);
    }

    #[test]
    fn test_parse_log_level() {
        let args = ServiceArgs {
            log_level: "WARN".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::WARN);

        let args = ServiceArgs {
            log_level: "nonsense".to_string(),
            ..Default::default()
        };
        assert_eq!(args.parse_log_level(), tracing::Level::INFO);
    }
}
