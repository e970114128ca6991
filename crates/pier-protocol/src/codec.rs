use serde_json::Value;
use thiserror::Error;

use crate::envelope::{Envelope, EnvelopeKind};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("envelope is missing its type tag")]
    MissingType,
    #[error("invalid {kind} envelope: {source}")]
    InvalidEnvelope {
        kind: EnvelopeKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode {kind} envelope: {source}")]
    Encode {
        kind: EnvelopeKind,
        #[source]
        source: serde_json::Error,
    },
}

pub fn encode(envelope: &Envelope) -> Result<String, CodecError> {
    serde_json::to_string(envelope).map_err(|source| CodecError::Encode {
        kind: envelope.kind(),
        source,
    })
}

/// Decodes one relay text frame.
///
/// Returns `Ok(None)` for envelopes whose `type` this protocol does not know.
pub fn decode(text: &str) -> Result<Option<Envelope>, CodecError> {
    let mut value: Value = serde_json::from_str(text).map_err(CodecError::Malformed)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(CodecError::MissingType)?;
    let Some(kind) = EnvelopeKind::from_tag(tag) else {
        return Ok(None);
    };
    if tag != kind.as_str() {
        value["type"] = Value::String(kind.as_str().to_string());
    }
    serde_json::from_value(value)
        .map(Some)
        .map_err(|source| CodecError::InvalidEnvelope { kind, source })
}
