use clap::{Args, Parser};
use std::path::PathBuf;

use crate::config::{Config, parse_ice_servers};
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "pier",
    about = "Text chat with one peer over a WebRTC data channel",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        env = "PIER_RELAY_URL",
        value_name = "URL",
        help = "WebSocket address of the signaling relay"
    )]
    pub relay: Option<String>,

    #[arg(
        long,
        short = 'n',
        value_name = "NAME",
        help = "Log in with this name as soon as the relay is reachable"
    )]
    pub name: Option<String>,

    #[arg(
        long = "ice-server",
        value_name = "URL",
        help = "STUN/TURN url; repeat or comma-separate for several"
    )]
    pub ice_servers: Vec<String>,

    #[arg(long, help = "Skip STUN and gather host candidates only")]
    pub localhost_only: bool,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

impl Cli {
    /// Environment-derived configuration with command line overrides applied.
    pub fn to_config(&self) -> Config {
        let mut config = Config::from_env();
        if let Some(relay) = self.relay.as_ref().filter(|relay| !relay.trim().is_empty()) {
            config.relay_url = relay.trim().to_string();
        }
        let ice_servers: Vec<String> = self
            .ice_servers
            .iter()
            .flat_map(|raw| parse_ice_servers(raw))
            .collect();
        if !ice_servers.is_empty() {
            config.ice_servers = ice_servers;
        }
        if self.localhost_only {
            config.ice_servers.clear();
        }
        config
    }
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "PIER_LOG_LEVEL",
        default_value_t = LogLevel::Warn,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "PIER_LOG_FILE",
        help = "Write logs to the specified file instead of stderr"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}
