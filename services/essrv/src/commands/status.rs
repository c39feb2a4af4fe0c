use super::{Connection, RelayTarget};
use crate::aggregator::StatusRequest;
use crate::config::EssrvConfig;
use anyhow::Result;
use colored::Colorize;
use serde_json::Value;
use voltage_marstek::{BatteryState, DeviceStatus};

/// Which optional reads to include
#[derive(Debug, Clone, Copy, Default)]
pub struct StatusFlags {
    pub pv: bool,
    pub wifi: bool,
    pub bat: bool,
    pub no_em: bool,
}

impl StatusFlags {
    /// Config defaults, widened by flags
    pub fn request(&self, config: &EssrvConfig) -> StatusRequest {
        let mut request = StatusRequest::from(&config.status);
        request.include_pv |= self.pv;
        request.include_wifi |= self.wifi;
        request.include_bat |= self.bat;
        if self.no_em {
            request.include_em = false;
        }
        request
    }
}

/// Execute the status command
pub async fn execute(
    config: &EssrvConfig,
    relay: &RelayTarget,
    host: &str,
    port: Option<u16>,
    flags: StatusFlags,
    json: bool,
) -> Result<()> {
    let port = port.unwrap_or(config.udp.device_port);
    let request = flags.request(config);

    let conn = Connection::open(config, relay).await?;
    let result = conn.client().fetch_status(host, port, &request, None).await;
    conn.close().await;
    let status = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print_status(host, &status);
    }
    if !status.has_fresh_data {
        anyhow::bail!("No response from {}:{}", host, port);
    }
    Ok(())
}

fn label(state: Option<BatteryState>) -> String {
    match state {
        Some(BatteryState::Charging) => "charging".green().to_string(),
        Some(BatteryState::Discharging) => "discharging".yellow().to_string(),
        Some(BatteryState::Idle) => "idle".dimmed().to_string(),
        None => "-".to_string(),
    }
}

/// Human-readable dump of every known field
pub fn print_status(host: &str, status: &DeviceStatus) {
    let headline = if status.has_fresh_data {
        "✅".green()
    } else {
        "⚠️".yellow()
    };
    println!(
        "{} {} {} | SOC {} | battery {} W ({})",
        headline,
        host.cyan(),
        status.device_mode.as_deref().unwrap_or("-").bold(),
        status
            .battery_soc
            .map(|s| format!("{}%", s))
            .unwrap_or_else(|| "-".into()),
        status
            .battery_power
            .map(|p| format!("{:.0}", p))
            .unwrap_or_else(|| "-".into()),
        label(status.battery_status)
    );

    let Value::Object(fields) = status.to_value() else {
        return;
    };
    for name in DeviceStatus::FIELD_NAMES {
        if let Some(value) = fields.get(*name) {
            let shown = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            println!("   {:<26} {}", name.dimmed(), shown);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_flags_widen_config_defaults() {
        let config = EssrvConfig::default();
        let req = StatusFlags {
            pv: true,
            no_em: true,
            ..StatusFlags::default()
        }
        .request(&config);
        assert!(req.include_pv);
        assert!(!req.include_em);
        assert!(!req.include_wifi);
        assert_eq!(req.timeout, std::time::Duration::from_millis(2500));
    }
}
