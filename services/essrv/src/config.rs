//! Service configuration (figment)
//!
//! Layers: compiled defaults, `config/essrv.{toml,yaml,json}`, `--config` file,
//! then `ESSRV_*` environment variables (`ESSRV_UDP__LOCAL_PORT=30001`).

use crate::error::{EssrvError, Result};
use crate::verifier::VerifierPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use voltage_marstek::constants::DEFAULT_UDP_PORT;

pub const SERVICE_NAME: &str = "essrv";
pub const DEFAULT_API_PORT: u16 = 8765;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EssrvConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub udp: UdpConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub status: StatusConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub verifier: VerifierPolicy,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Relay bridge HTTP listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Shared secret expected in `X-API-Key`; open when unset
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UdpConfig {
    #[serde(default = "default_udp_port")]
    pub local_port: u16,
    #[serde(default = "default_udp_port")]
    pub device_port: u16,
    #[serde(default = "default_min_request_interval_ms")]
    pub min_request_interval_ms: u64,
    #[serde(default = "default_cache_max_age_secs")]
    pub response_cache_max_age_secs: u64,
    #[serde(default = "default_cache_max_entries")]
    pub response_cache_max_entries: usize,
    #[serde(default = "default_max_tracked_ips")]
    pub max_tracked_ips: usize,
    #[serde(default = "default_rate_limit_stale_secs")]
    pub rate_limit_stale_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default = "default_discovery_timeout")]
    pub timeout_secs: f64,
    #[serde(default = "default_discovery_cache_ttl")]
    pub cache_ttl_secs: u64,
}

/// Defaults for one status cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_status_timeout")]
    pub timeout_secs: f64,
    #[serde(default = "default_status_delay")]
    pub delay_between_requests_secs: f64,
    #[serde(default = "default_true")]
    pub include_em: bool,
    #[serde(default)]
    pub include_pv: bool,
    #[serde(default)]
    pub include_wifi: bool,
    #[serde(default)]
    pub include_bat: bool,
}

/// Cadence used by `essrv watch`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_fast_secs")]
    pub fast_secs: u64,
    #[serde(default = "default_medium_secs")]
    pub medium_secs: u64,
    #[serde(default = "default_slow_secs")]
    pub slow_secs: u64,
    /// Consecutive cycles without fresh data before a device is reported unavailable
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default)]
    pub json: bool,
    #[serde(default = "default_true")]
    pub api_log: bool,
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    DEFAULT_API_PORT
}

fn default_udp_port() -> u16 {
    DEFAULT_UDP_PORT
}

fn default_min_request_interval_ms() -> u64 {
    300
}

fn default_cache_max_age_secs() -> u64 {
    30
}

fn default_cache_max_entries() -> usize {
    50
}

fn default_max_tracked_ips() -> usize {
    100
}

fn default_rate_limit_stale_secs() -> u64 {
    300
}

fn default_discovery_timeout() -> f64 {
    10.0
}

fn default_discovery_cache_ttl() -> u64 {
    30
}

fn default_status_timeout() -> f64 {
    2.5
}

fn default_status_delay() -> f64 {
    2.0
}

fn default_fast_secs() -> u64 {
    15
}

fn default_medium_secs() -> u64 {
    60
}

fn default_slow_secs() -> u64 {
    300
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            api_key: None,
        }
    }
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            local_port: default_udp_port(),
            device_port: default_udp_port(),
            min_request_interval_ms: default_min_request_interval_ms(),
            response_cache_max_age_secs: default_cache_max_age_secs(),
            response_cache_max_entries: default_cache_max_entries(),
            max_tracked_ips: default_max_tracked_ips(),
            rate_limit_stale_secs: default_rate_limit_stale_secs(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_discovery_timeout(),
            cache_ttl_secs: default_discovery_cache_ttl(),
        }
    }
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_status_timeout(),
            delay_between_requests_secs: default_status_delay(),
            include_em: true,
            include_pv: false,
            include_wifi: false,
            include_bat: false,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            fast_secs: default_fast_secs(),
            medium_secs: default_medium_secs(),
            slow_secs: default_slow_secs(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            json: false,
            api_log: true,
        }
    }
}

impl UdpConfig {
    pub fn min_request_interval(&self) -> Duration {
        Duration::from_millis(self.min_request_interval_ms)
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        secs(self.timeout_secs)
    }
}

/// Longest timeout any request or discovery window may use
pub const MAX_TIMEOUT_SECS: f64 = 3600.0;

/// Seconds from config into a `Duration`; negative or NaN clamps to zero,
/// anything past `MAX_TIMEOUT_SECS` clamps to it
pub fn secs(value: f64) -> Duration {
    if value.is_nan() || value <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(value.min(MAX_TIMEOUT_SECS))
}

impl EssrvConfig {
    /// Load the layered configuration and validate it
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let config: Self = common::config_loader::load_config(SERVICE_NAME, explicit)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.udp.response_cache_max_entries < 2 {
            return Err(EssrvError::config(
                "udp.response_cache_max_entries must be at least 2",
            ));
        }
        if self.udp.max_tracked_ips == 0 {
            return Err(EssrvError::config("udp.max_tracked_ips must be positive"));
        }
        if self.status.timeout_secs <= 0.0 || !self.status.timeout_secs.is_finite() {
            return Err(EssrvError::config("status.timeout_secs must be positive"));
        }
        if self.discovery.timeout_secs <= 0.0 || !self.discovery.timeout_secs.is_finite() {
            return Err(EssrvError::config("discovery.timeout_secs must be positive"));
        }
        if self.polling.fast_secs == 0 {
            return Err(EssrvError::config("polling.fast_secs must be positive"));
        }
        if self.polling.failure_threshold == 0 {
            return Err(EssrvError::config(
                "polling.failure_threshold must be positive",
            ));
        }
        self.verifier.validate()?;
        Ok(())
    }

    /// Effective configuration as YAML (`essrv --validate`)
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| EssrvError::internal(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = EssrvConfig::default();
        assert_eq!(config.api.port, 8765);
        assert_eq!(config.udp.local_port, 30000);
        assert_eq!(config.udp.min_request_interval(), Duration::from_millis(300));
        assert_eq!(config.discovery.timeout(), Duration::from_secs(10));
        assert!(config.status.include_em);
        assert!(!config.status.include_pv);
        assert_eq!(config.polling.failure_threshold, 3);
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "api:\n  port: 9000\n  api_key: secret\nudp:\n  min_request_interval_ms: 500\n"
        )
        .unwrap();

        let config: EssrvConfig =
            common::config_loader::load_config_from_file(file.path()).unwrap();
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.api_key.as_deref(), Some("secret"));
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.udp.min_request_interval_ms, 500);
        assert_eq!(config.udp.device_port, 30000);
    }

    #[test]
    fn test_validation_rejects_nonsense() {
        let mut config = EssrvConfig::default();
        config.polling.failure_threshold = 0;
        assert!(matches!(config.validate(), Err(EssrvError::Config(_))));

        let mut config = EssrvConfig::default();
        config.status.timeout_secs = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secs_clamps() {
        assert_eq!(secs(2.5), Duration::from_millis(2500));
        assert_eq!(secs(-3.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(1e300), Duration::from_secs(3600));
        assert_eq!(secs(f64::INFINITY), Duration::from_secs(3600));
    }

    #[test]
    fn test_yaml_dump() {
        let yaml = EssrvConfig::default().to_yaml().unwrap();
        assert!(yaml.contains("min_request_interval_ms: 300"));
    }
}
