use thiserror::Error;

use crate::media::MediaError;
use crate::signaling::SignalingError;

/// Local identity problems. The messages are shown to the user verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("Please enter a username.")]
    EmptyName,
    #[error("Username already taken! Connection refused.")]
    UsernameTaken,
    #[error("You are already logged in.")]
    AlreadyLoggedIn,
    #[error("Login already in progress.")]
    LoginInProgress,
    #[error("Please log in before connecting to a peer.")]
    NotLoggedIn,
    #[error("Please enter a username to connect to.")]
    EmptyPeer,
    #[error("You cannot connect to yourself.")]
    SelfConnect,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("Error contacting remote peer: {0}")]
    Offer(#[source] MediaError),
    #[error("Error on receiving offer from remote peer: {0}")]
    Answer(#[source] MediaError),
    #[error("Negotiation with {peer} failed: {source}")]
    Negotiation { peer: String, source: MediaError },
    #[error("Signaling error: {0}")]
    Transport(#[from] SignalingError),
    #[error("Connection with {0} failed.")]
    Connectivity(String),
    #[error("No open data channel; connect to a peer first.")]
    NoDataPipe,
    #[error("Could not send message: {0}")]
    DataPipe(#[source] MediaError),
    #[error("Already talking to {current}; declined offer from {from}.")]
    Busy { current: String, from: String },
}

impl EngineError {
    /// Whether recovering from this error abandons the current negotiation.
    pub fn ends_negotiation(&self) -> bool {
        matches!(
            self,
            EngineError::Offer(_)
                | EngineError::Answer(_)
                | EngineError::Negotiation { .. }
                | EngineError::Connectivity(_)
        )
    }

    pub fn is_user_error(&self) -> bool {
        matches!(self, EngineError::Identity(_) | EngineError::NoDataPipe)
    }
}
