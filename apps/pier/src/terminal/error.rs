use crate::config::ConfigError;
use crate::signaling::SignalingError;
use crate::telemetry::logging::InitError;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("logging initialization failed: {0}")]
    Logging(#[from] InitError),
    #[error("{0}")]
    Signaling(#[from] SignalingError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}
