//! essrv - Marstek energy-storage communication service
//!
//! One binary for both sides: `serve` runs the HTTP relay bridge next to the
//! devices, every other subcommand talks to devices directly over UDP or
//! through a bridge given with `--relay`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use common::bootstrap_args::ServiceArgs;
use essrv::bootstrap::{self, ServeOverrides};
use essrv::commands::{self, set_mode::SetModeArgs, status::StatusFlags, RelayTarget};
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(name = "essrv")]
#[command(author, version, about = "Marstek energy-storage communication service", long_about = None)]
struct Cli {
    #[command(flatten)]
    service: ServiceArgs,

    /// Relay bridge URL; devices are reached through it instead of local UDP
    #[arg(long, global = true, env = "ESSRV_RELAY")]
    relay: Option<String>,

    /// API key sent to the relay bridge
    #[arg(long, global = true, env = "ESSRV_RELAY_KEY")]
    relay_key: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the HTTP relay bridge
    Serve {
        /// Listen address (default from config, 0.0.0.0:8765)
        #[arg(short, long)]
        bind: Option<SocketAddr>,

        /// Require this X-API-Key on every request
        #[arg(long, env = "ESSRV_API_KEY")]
        api_key: Option<String>,

        /// Local UDP port (0 = ephemeral)
        #[arg(long)]
        udp_port: Option<u16>,
    },

    /// Broadcast discovery on all local networks
    Discover {
        /// Seconds to collect replies
        #[arg(short, long)]
        timeout: Option<f64>,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Read the merged status of one device
    Status {
        #[arg(long)]
        host: String,

        #[arg(short, long)]
        port: Option<u16>,

        /// Include PV channels
        #[arg(long)]
        pv: bool,

        /// Include Wi-Fi state
        #[arg(long)]
        wifi: bool,

        /// Include battery detail
        #[arg(long)]
        bat: bool,

        /// Skip the energy meter read
        #[arg(long)]
        no_em: bool,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Change the operating mode and confirm it took effect
    SetMode {
        #[arg(long)]
        host: String,

        /// charge, discharge, stop, auto, ai, manual or passive
        action: String,

        /// Power in watts (charge/discharge/passive)
        #[arg(short = 'w', long, default_value_t = 0, allow_negative_numbers = true)]
        power: i32,

        /// Passive mode duration in seconds
        #[arg(short, long, default_value_t = 3600)]
        duration: u32,

        #[arg(short, long)]
        port: Option<u16>,

        /// Send once without read-back verification
        #[arg(long)]
        no_verify: bool,
    },

    /// Poll one device on the tiered schedule until Ctrl+C
    Watch {
        #[arg(long)]
        host: String,

        #[arg(short, long)]
        port: Option<u16>,

        /// One JSON line per cycle
        #[arg(long)]
        json: bool,
    },

    /// Send a raw JSON command and print the reply
    Send {
        #[arg(long)]
        host: String,

        /// e.g. '{"id":1,"method":"ES.GetMode","params":{"id":0}}'
        #[arg(short, long)]
        message: String,

        #[arg(short, long)]
        port: Option<u16>,

        #[arg(short, long, default_value_t = 10.0)]
        timeout: f64,
    },
}

impl Commands {
    fn logs_to_file(&self) -> bool {
        matches!(self, Commands::Serve { .. } | Commands::Watch { .. })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve {
        bind: None,
        api_key: None,
        udp_port: None,
    });

    let service_info = bootstrap::create_service_info();
    let config = bootstrap::load_configuration(&cli.service)?;
    if cli.service.validate {
        config.validate()?;
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    let file_logging = command.logs_to_file().then_some(&config.logging);
    bootstrap::init_environment(&service_info, &cli.service, file_logging)?;

    let relay = RelayTarget {
        url: cli.relay,
        api_key: cli.relay_key,
    };

    match command {
        Commands::Serve {
            bind,
            api_key,
            udp_port,
        } => {
            let overrides = ServeOverrides {
                bind,
                api_key,
                udp_port,
            };
            commands::serve::execute(config, &overrides).await
        },
        Commands::Discover { timeout, json } => {
            commands::discover::execute(&config, &relay, timeout, json).await
        },
        Commands::Status {
            host,
            port,
            pv,
            wifi,
            bat,
            no_em,
            json,
        } => {
            let flags = StatusFlags {
                pv,
                wifi,
                bat,
                no_em,
            };
            commands::status::execute(&config, &relay, &host, port, flags, json).await
        },
        Commands::SetMode {
            host,
            action,
            power,
            duration,
            port,
            no_verify,
        } => {
            let args = SetModeArgs {
                host,
                port,
                action,
                power,
                duration,
                no_verify,
            };
            commands::set_mode::execute(&config, &relay, &args).await
        },
        Commands::Watch { host, port, json } => {
            commands::watch::execute(&config, &relay, &host, port, json).await
        },
        Commands::Send {
            host,
            message,
            port,
            timeout,
        } => commands::send::execute(&config, &relay, &host, port, &message, timeout).await,
    }
}
