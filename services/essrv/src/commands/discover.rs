use super::{Connection, RelayTarget};
use crate::config::{secs, EssrvConfig};
use anyhow::Result;
use colored::Colorize;
use voltage_marstek::DeviceInfo;

/// Execute the discover command
pub async fn execute(
    config: &EssrvConfig,
    relay: &RelayTarget,
    timeout: Option<f64>,
    json: bool,
) -> Result<()> {
    let timeout = secs(timeout.unwrap_or(config.discovery.timeout_secs));
    if !json {
        println!(
            "🔍 {} for Marstek devices ({:.0}s)...",
            "Searching".bold(),
            timeout.as_secs_f64()
        );
    }

    let conn = Connection::open(config, relay).await?;
    let result = conn.client().discover(timeout, false).await;
    conn.close().await;
    let devices = result?;

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    print_devices(&devices);
    Ok(())
}

fn print_devices(devices: &[DeviceInfo]) {
    if devices.is_empty() {
        println!("{} No devices answered", "⚠️".yellow());
        return;
    }
    println!("{} Found {} device(s)", "✅".green(), devices.len());
    println!();
    for device in devices {
        println!(
            "   • {} {} (fw {}, mac {})",
            device.ip.cyan(),
            device.device_type.bold(),
            device.firmware,
            if device.mac.is_empty() { "-" } else { &device.mac }
        );
    }
}
