use super::{Connection, RelayTarget};
use crate::config::EssrvConfig;
use crate::polling::{Availability, TierPlanner};
use anyhow::Result;
use colored::Colorize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use voltage_marstek::{merge_status, DeviceStatus, StatusParts};

/// Execute the watch command: poll one device until Ctrl+C
pub async fn execute(
    config: &EssrvConfig,
    relay: &RelayTarget,
    host: &str,
    port: Option<u16>,
    json: bool,
) -> Result<()> {
    let port = port.unwrap_or(config.udp.device_port);
    let base = crate::aggregator::StatusRequest::from(&config.status);
    let mut planner = TierPlanner::new(&config.polling);

    let conn = Connection::open(config, relay).await?;
    let client = conn.client();

    let token = CancellationToken::new();
    common::shutdown::cancel_on_shutdown(token.clone());

    let mut ticker = tokio::time::interval(Duration::from_secs(config.polling.fast_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!("Watching {}:{} every {}s", host, port, config.polling.fast_secs);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {},
        }
        if client.polling().is_paused(host) {
            debug!("Polling paused for {}, skipping cycle", host);
            continue;
        }

        let plan = planner.plan();
        let request = planner.request_for(&base, plan);
        let previous = planner.last_status().cloned();
        let status = tokio::select! {
            _ = token.cancelled() => break,
            result = client.fetch_status(host, port, &request, previous.as_ref()) => match result {
                Ok(status) => status,
                Err(e) => {
                    warn!("Status cycle for {} failed: {}", host, e);
                    merge_status(previous.as_ref(), &StatusParts::default())
                },
            },
        };

        let availability = planner.record(status.clone());
        print_cycle(host, &status, availability, json)?;
    }

    conn.close().await;
    info!("Watch stopped");
    Ok(())
}

fn print_cycle(
    host: &str,
    status: &DeviceStatus,
    availability: Availability,
    json: bool,
) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(status)?);
        return Ok(());
    }
    let marker = match availability {
        Availability::Available if status.has_fresh_data => "●".green(),
        Availability::Available => "●".yellow(),
        Availability::Unavailable => "●".red(),
    };
    println!(
        "{} {} {} | mode {} | SOC {} | battery {} W | grid {} W",
        marker,
        chrono::Local::now().format("%H:%M:%S"),
        host.cyan(),
        status.device_mode.as_deref().unwrap_or("-"),
        status
            .battery_soc
            .map(|s| format!("{}%", s))
            .unwrap_or_else(|| "-".into()),
        status
            .battery_power
            .map(|p| format!("{:.0}", p))
            .unwrap_or_else(|| "-".into()),
        status
            .ongrid_power
            .map(|p| format!("{:.0}", p))
            .unwrap_or_else(|| "-".into()),
    );
    Ok(())
}
