use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Session description produced by the media layer (`{"type": "offer", "sdp": "..."}`).
///
/// Fields outside `type`/`sdp` are kept in `extra` so the relay forwards them untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: String,
    pub sdp: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "offer".to_string(),
            sdp: sdp.into(),
            extra: Map::new(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: "answer".to_string(),
            sdp: sdp.into(),
            extra: Map::new(),
        }
    }
}

/// Trickle ICE candidate in the browser JSON shape.
///
/// `sdpMid` and `sdpMLineIndex` are always written, `null` when unknown, as
/// `RTCIceCandidate.toJSON()` does. Unrecognized fields ride along in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            ..Self::default()
        }
    }
}

/// One signaling message unit carried by the relay.
///
/// Peer-originated envelopes name their target in `name`; the relay rewrites
/// `name` to the author when forwarding an offer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Envelope {
    Login {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        success: Option<bool>,
    },
    Offer {
        offer: SessionDescription,
        #[serde(default)]
        name: String,
    },
    Answer {
        answer: SessionDescription,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Candidate {
        candidate: IceCandidate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    Leave {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Roster broadcast by the relay after each successful login.
    Users {
        #[serde(default)]
        users: Vec<String>,
    },
    /// Relay-side rejection of a message it could not route or parse.
    Error { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Login,
    Offer,
    Answer,
    Candidate,
    Leave,
    Users,
    Error,
}

impl EnvelopeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeKind::Login => "login",
            EnvelopeKind::Offer => "offer",
            EnvelopeKind::Answer => "answer",
            EnvelopeKind::Candidate => "candidate",
            EnvelopeKind::Leave => "leave",
            EnvelopeKind::Users => "users",
            EnvelopeKind::Error => "error",
        }
    }

    /// Resolves a wire `type` tag. `leaving` is the relay's older spelling of `leave`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "login" => Some(EnvelopeKind::Login),
            "offer" => Some(EnvelopeKind::Offer),
            "answer" => Some(EnvelopeKind::Answer),
            "candidate" => Some(EnvelopeKind::Candidate),
            "leave" | "leaving" => Some(EnvelopeKind::Leave),
            "users" => Some(EnvelopeKind::Users),
            "error" => Some(EnvelopeKind::Error),
            _ => None,
        }
    }
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Envelope {
    pub fn login(name: impl Into<String>) -> Self {
        Envelope::Login {
            name: Some(name.into()),
            success: None,
        }
    }

    pub fn login_result(success: bool) -> Self {
        Envelope::Login {
            name: None,
            success: Some(success),
        }
    }

    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Envelope::Login { .. } => EnvelopeKind::Login,
            Envelope::Offer { .. } => EnvelopeKind::Offer,
            Envelope::Answer { .. } => EnvelopeKind::Answer,
            Envelope::Candidate { .. } => EnvelopeKind::Candidate,
            Envelope::Leave { .. } => EnvelopeKind::Leave,
            Envelope::Users { .. } => EnvelopeKind::Users,
            Envelope::Error { .. } => EnvelopeKind::Error,
        }
    }

    /// The peer name carried by the envelope, if any.
    pub fn name(&self) -> Option<&str> {
        match self {
            Envelope::Login { name, .. }
            | Envelope::Answer { name, .. }
            | Envelope::Candidate { name, .. }
            | Envelope::Leave { name } => name.as_deref(),
            Envelope::Offer { name, .. } => Some(name.as_str()).filter(|n| !n.is_empty()),
            Envelope::Users { .. } | Envelope::Error { .. } => None,
        }
    }

    /// Addresses the envelope to `peer`. Login, roster and error envelopes are never stamped.
    pub fn stamp_peer(&mut self, peer: &str) {
        match self {
            Envelope::Answer { name, .. }
            | Envelope::Candidate { name, .. }
            | Envelope::Leave { name } => *name = Some(peer.to_string()),
            Envelope::Offer { name, .. } => *name = peer.to_string(),
            Envelope::Login { .. } | Envelope::Users { .. } | Envelope::Error { .. } => {}
        }
    }
}
