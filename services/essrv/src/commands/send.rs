use super::{Connection, RelayTarget};
use crate::config::{secs, EssrvConfig};
use anyhow::Result;
use colored::Colorize;
use voltage_marstek::Command;

/// Execute the send command: validate a raw JSON command and print the reply
pub async fn execute(
    config: &EssrvConfig,
    relay: &RelayTarget,
    host: &str,
    port: Option<u16>,
    message: &str,
    timeout: f64,
) -> Result<()> {
    let command = Command::parse(message)?;
    let port = port.unwrap_or(config.udp.device_port);

    let conn = Connection::open(config, relay).await?;
    let result = conn
        .client()
        .send_command(&command, host, port, secs(timeout), false)
        .await;
    conn.close().await;

    match result {
        Ok(reply) => {
            println!("{}", serde_json::to_string_pretty(&reply)?);
            Ok(())
        },
        Err(e) => {
            println!("{} {} to {} failed", "❌".red(), command.method(), host);
            Err(e.into())
        },
    }
}
