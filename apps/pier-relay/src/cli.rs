use clap::Parser;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "pier-relay")]
#[command(about = "Name registry and signaling relay for pier peers")]
pub struct Cli {
    /// Interface to bind (overrides PIER_RELAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on (overrides PIER_RELAY_PORT)
    #[arg(long, short = 'p')]
    pub port: Option<u16>,
}

impl Cli {
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        config
    }
}
