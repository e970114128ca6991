pub mod config;
pub mod media;
pub mod negotiation;
pub mod presenter;
pub mod session;
pub mod signaling;
pub mod telemetry;
pub mod terminal;
