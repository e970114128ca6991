//! Outbound half of the relay connection.
//!
//! Inbound envelopes never come back through this trait: adapters push them
//! onto the engine queue as [`EngineEvent::Inbound`](crate::negotiation::EngineEvent).

use pier_protocol::{CodecError, Envelope};
use thiserror::Error;

mod websocket;

pub use websocket::WebSocketSignaling;

#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("relay connection failed: {0}")]
    Connect(String),
    #[error("signaling channel closed")]
    ChannelClosed,
    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub trait SignalingChannel: Send + Sync {
    /// Queues one envelope for delivery. Fire and forget: a successful return
    /// only means the envelope was accepted for writing.
    fn send(&self, envelope: Envelope) -> Result<(), SignalingError>;
}
