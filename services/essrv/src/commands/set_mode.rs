use super::{Connection, RelayTarget};
use crate::config::EssrvConfig;
use crate::verifier::{CommandVerifier, ExpectedEffect, ModeAction};
use anyhow::Result;
use colored::Colorize;
use voltage_marstek::{command, ModeConfig, OperatingMode};

/// Parsed `set-mode` arguments
#[derive(Debug, Clone)]
pub struct SetModeArgs {
    pub host: String,
    pub port: Option<u16>,
    pub action: String,
    pub power: i32,
    /// Passive mode duration (seconds)
    pub duration: u32,
    pub no_verify: bool,
}

/// Payload and confirming effect for the requested action
pub fn plan(args: &SetModeArgs) -> Result<(ModeConfig, ExpectedEffect)> {
    let action = ModeAction::parse(&args.action, args.power)?;
    Ok(match action {
        ModeAction::Mode(OperatingMode::Passive) => (
            ModeConfig::passive(args.power, args.duration),
            ExpectedEffect::Mode(OperatingMode::Passive),
        ),
        other => other.plan(),
    })
}

/// Execute the set-mode command
pub async fn execute(config: &EssrvConfig, relay: &RelayTarget, args: &SetModeArgs) -> Result<()> {
    let (mode_config, effect) = plan(args)?;
    let port = args.port.unwrap_or(config.udp.device_port);
    // fail on a bad payload before opening any socket
    command::set_mode(0, 0, &mode_config)?;

    let conn = Connection::open(config, relay).await?;
    let client = conn.client();

    let result = if args.no_verify {
        let cmd = command::set_mode(client.next_request_id(), 0, &mode_config)?;
        let timeout = config.verifier.attempt_timeout(1);
        client
            .send_with_polling_paused(&cmd, &args.host, port, timeout)
            .await
            .map(|reply| {
                println!("{} {} sent to {}", "📤".blue(), effect, args.host.cyan());
                println!("{}", reply);
            })
    } else {
        println!("⏳ {} {} on {}...", "Applying".bold(), effect, args.host.cyan());
        CommandVerifier::new(client, config.verifier.clone())
            .execute(&args.host, port, &mode_config, effect)
            .await
            .map(|outcome| {
                println!(
                    "{} {} confirmed after {} attempt(s)",
                    "✅".green(),
                    effect,
                    outcome.attempts
                );
            })
    };
    conn.close().await;

    if let Err(e) = &result {
        println!("{} {}", "❌".red(), e);
    }
    Ok(result?)
}
