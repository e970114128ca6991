//! Signaling envelopes exchanged between Pier peers and the relay.

pub mod codec;
pub mod envelope;

pub use codec::{CodecError, decode, encode};
pub use envelope::{Envelope, EnvelopeKind, IceCandidate, SessionDescription};
