use std::env;
#[cfg(test)]
use std::sync::Mutex;
use url::Url;

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:9090";
pub const DEFAULT_ICE_SERVER: &str = "stun:stun.1.google.com:19302";

/// Suffix appended to the remote peer name to label the data pipe.
pub const DATA_PIPE_SUFFIX: &str = "-dataChannel";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid relay url {url}: {source}")]
    InvalidRelayUrl {
        url: String,
        source: url::ParseError,
    },
    #[error("relay url must use ws or wss, got {0}")]
    UnsupportedScheme(String),
}

/// Pier client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// WebSocket address of the relay
    pub relay_url: String,
    /// STUN/TURN urls handed to the media layer
    pub ice_servers: Vec<String>,
    /// Whether the data pipe delivers messages in order
    pub ordered: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let relay_url = env::var("PIER_RELAY_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
        let ice_servers = if env_truthy("PIER_LOCALHOST_ONLY") {
            Vec::new()
        } else {
            env::var("PIER_ICE_SERVERS")
                .map(|raw| parse_ice_servers(&raw))
                .unwrap_or_else(|_| vec![DEFAULT_ICE_SERVER.to_string()])
        };
        Self {
            relay_url,
            ice_servers,
            ordered: true,
        }
    }

    /// Checks the relay address and returns it as a websocket url.
    pub fn relay_endpoint(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.relay_url).map_err(|source| ConfigError::InvalidRelayUrl {
            url: self.relay_url.clone(),
            source,
        })?;
        match url.scheme() {
            "ws" | "wss" => Ok(url),
            other => Err(ConfigError::UnsupportedScheme(other.to_string())),
        }
    }

    pub fn data_pipe_label(peer: &str) -> String {
        format!("{peer}{DATA_PIPE_SUFFIX}")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            ice_servers: vec![DEFAULT_ICE_SERVER.to_string()],
            ordered: true,
        }
    }
}

pub fn parse_ice_servers(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn env_truthy(var: &str) -> bool {
    env::var(var)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}
