mod state;

pub use state::{Negotiation, NegotiationRole, SessionState};

use std::fmt;

/// Where the local client sits in the login/offer/answer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Idle,
    LoggingIn,
    LoggedIn,
    Offering,
    Answering,
    Connected,
    /// Terminal: the relay is gone or the client shut down.
    Closed,
}

impl SessionPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::LoggingIn => "logging_in",
            SessionPhase::LoggedIn => "logged_in",
            SessionPhase::Offering => "offering",
            SessionPhase::Answering => "answering",
            SessionPhase::Connected => "connected",
            SessionPhase::Closed => "closed",
        }
    }

    pub fn is_negotiating(self) -> bool {
        matches!(
            self,
            SessionPhase::Offering | SessionPhase::Answering | SessionPhase::Connected
        )
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connectivity reported by the media transport for the current negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConnectivityState::New => "new",
            ConnectivityState::Connecting => "connecting",
            ConnectivityState::Connected => "connected",
            ConnectivityState::Disconnected => "disconnected",
            ConnectivityState::Failed => "failed",
            ConnectivityState::Closed => "closed",
        };
        f.write_str(label)
    }
}
