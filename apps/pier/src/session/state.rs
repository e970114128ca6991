use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use pier_protocol::IceCandidate;

use super::{ConnectivityState, SessionPhase};
use crate::media::{DataPipe, MediaTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

/// One attempt to reach a specific remote peer.
///
/// Owned by [`SessionState`]; it exists exactly while the session is
/// offering, answering or connected, so the remote peer name lives here
/// rather than beside it.
pub struct Negotiation {
    generation: u64,
    peer: String,
    role: NegotiationRole,
    transport: Arc<dyn MediaTransport>,
    pipe: Option<Arc<dyn DataPipe>>,
    remote_description_applied: bool,
    pending_candidates: VecDeque<IceCandidate>,
}

impl Negotiation {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn transport(&self) -> Arc<dyn MediaTransport> {
        Arc::clone(&self.transport)
    }

    pub fn pipe(&self) -> Option<Arc<dyn DataPipe>> {
        self.pipe.clone()
    }

    pub fn remote_description_applied(&self) -> bool {
        self.remote_description_applied
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    pub(crate) fn attach_pipe(&mut self, pipe: Arc<dyn DataPipe>) {
        self.pipe = Some(pipe);
    }

    pub(crate) fn detach_pipe(&mut self, label: &str) -> Option<Arc<dyn DataPipe>> {
        if self.pipe.as_ref().is_some_and(|pipe| pipe.label() == label) {
            self.pipe.take()
        } else {
            None
        }
    }

    /// Queues a remote candidate that arrived ahead of the remote description.
    pub(crate) fn queue_candidate(&mut self, candidate: IceCandidate) {
        self.pending_candidates.push_back(candidate);
    }

    /// Marks the remote description applied and hands back the queued
    /// candidates in arrival order.
    pub(crate) fn apply_remote_description(&mut self) -> Vec<IceCandidate> {
        self.remote_description_applied = true;
        self.pending_candidates.drain(..).collect()
    }
}

impl fmt::Debug for Negotiation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Negotiation")
            .field("generation", &self.generation)
            .field("peer", &self.peer)
            .field("role", &self.role)
            .field("pipe", &self.pipe.as_ref().map(|pipe| pipe.label().to_string()))
            .field("remote_description_applied", &self.remote_description_applied)
            .field("pending_candidates", &self.pending_candidates.len())
            .finish()
    }
}

/// Identity, phase and current negotiation of the local client.
///
/// Only the negotiation engine mutates this; everything else reads it.
#[derive(Debug)]
pub struct SessionState {
    phase: SessionPhase,
    local_name: Option<String>,
    pending_name: Option<String>,
    connectivity: Option<ConnectivityState>,
    negotiation: Option<Negotiation>,
    last_generation: u64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: SessionPhase::Idle,
            local_name: None,
            pending_name: None,
            connectivity: None,
            negotiation: None,
            last_generation: 0,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Name confirmed by the relay. Never changes once set.
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Name submitted with the login that is still awaiting a verdict.
    pub fn pending_name(&self) -> Option<&str> {
        self.pending_name.as_deref()
    }

    pub fn remote_peer(&self) -> Option<&str> {
        self.negotiation.as_ref().map(Negotiation::peer)
    }

    pub fn connectivity(&self) -> Option<ConnectivityState> {
        self.connectivity
    }

    pub fn negotiation(&self) -> Option<&Negotiation> {
        self.negotiation.as_ref()
    }

    pub fn is_logged_in(&self) -> bool {
        self.local_name.is_some()
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.negotiation
            .as_ref()
            .is_some_and(|negotiation| negotiation.generation == generation)
    }

    pub(crate) fn negotiation_mut(&mut self) -> Option<&mut Negotiation> {
        self.negotiation.as_mut()
    }

    pub(crate) fn begin_login(&mut self, name: String) {
        debug_assert_eq!(self.phase, SessionPhase::Idle);
        self.pending_name = Some(name);
        self.phase = SessionPhase::LoggingIn;
    }

    pub(crate) fn commit_login(&mut self) -> Option<&str> {
        let name = self.pending_name.take()?;
        self.local_name = Some(name);
        self.phase = SessionPhase::LoggedIn;
        self.local_name.as_deref()
    }

    pub(crate) fn abandon_login(&mut self) -> Option<String> {
        self.phase = SessionPhase::Idle;
        self.pending_name.take()
    }

    /// Reserves the generation for the next transport. Generations only grow.
    pub(crate) fn next_generation(&mut self) -> u64 {
        self.last_generation += 1;
        self.last_generation
    }

    pub(crate) fn begin_negotiation(
        &mut self,
        generation: u64,
        peer: String,
        role: NegotiationRole,
        transport: Arc<dyn MediaTransport>,
    ) {
        debug_assert!(self.negotiation.is_none());
        self.negotiation = Some(Negotiation {
            generation,
            peer,
            role,
            transport,
            pipe: None,
            remote_description_applied: false,
            pending_candidates: VecDeque::new(),
        });
        self.connectivity = Some(ConnectivityState::New);
        self.phase = match role {
            NegotiationRole::Offerer => SessionPhase::Offering,
            NegotiationRole::Answerer => SessionPhase::Answering,
        };
    }

    pub(crate) fn set_connectivity(&mut self, state: ConnectivityState) {
        self.connectivity = Some(state);
    }

    /// Returns true when this call moved the session into `Connected`.
    pub(crate) fn mark_connected(&mut self) -> bool {
        if self.negotiation.is_none() || self.phase == SessionPhase::Connected {
            return false;
        }
        self.phase = SessionPhase::Connected;
        true
    }

    /// Drops the current negotiation and falls back to `LoggedIn`.
    pub(crate) fn end_negotiation(&mut self) -> Option<Negotiation> {
        let negotiation = self.negotiation.take()?;
        self.connectivity = None;
        if self.phase != SessionPhase::Closed {
            self.phase = SessionPhase::LoggedIn;
        }
        Some(negotiation)
    }

    pub(crate) fn close(&mut self) {
        self.pending_name = None;
        self.phase = SessionPhase::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::MediaError;
    use async_trait::async_trait;
    use pier_protocol::SessionDescription;

    #[derive(Debug)]
    struct InertTransport;

    #[async_trait]
    impl MediaTransport for InertTransport {
        async fn create_offer(&self) -> Result<SessionDescription, MediaError> {
            Err(MediaError::Closed)
        }
        async fn create_answer(&self) -> Result<SessionDescription, MediaError> {
            Err(MediaError::Closed)
        }
        async fn set_local_description(&self, _: SessionDescription) -> Result<(), MediaError> {
            Ok(())
        }
        async fn set_remote_description(&self, _: SessionDescription) -> Result<(), MediaError> {
            Ok(())
        }
        async fn add_ice_candidate(&self, _: IceCandidate) -> Result<(), MediaError> {
            Ok(())
        }
        async fn create_data_pipe(&self, _: &str) -> Result<Arc<dyn DataPipe>, MediaError> {
            Err(MediaError::Closed)
        }
        async fn close(&self) -> Result<(), MediaError> {
            Ok(())
        }
    }

    fn candidate(n: u16) -> IceCandidate {
        IceCandidate {
            candidate: format!("candidate:{n} 1 udp 1 10.0.0.{n} 5000 typ host"),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
            ..IceCandidate::default()
        }
    }

    fn logged_in(name: &str) -> SessionState {
        let mut state = SessionState::new();
        state.begin_login(name.to_string());
        state.commit_login();
        state
    }

    #[test]
    fn login_commits_pending_name() {
        let mut state = SessionState::new();
        assert_eq!(state.phase(), SessionPhase::Idle);

        state.begin_login("alice".into());
        assert_eq!(state.phase(), SessionPhase::LoggingIn);
        assert_eq!(state.pending_name(), Some("alice"));
        assert!(!state.is_logged_in());

        assert_eq!(state.commit_login(), Some("alice"));
        assert_eq!(state.phase(), SessionPhase::LoggedIn);
        assert_eq!(state.local_name(), Some("alice"));
        assert_eq!(state.pending_name(), None);
    }

    #[test]
    fn abandoned_login_returns_to_idle() {
        let mut state = SessionState::new();
        state.begin_login("alice".into());
        assert_eq!(state.abandon_login().as_deref(), Some("alice"));
        assert_eq!(state.phase(), SessionPhase::Idle);
        assert_eq!(state.local_name(), None);
    }

    #[test]
    fn remote_peer_follows_negotiation() {
        let mut state = logged_in("alice");
        assert_eq!(state.remote_peer(), None);

        let generation = state.next_generation();
        state.begin_negotiation(
            generation,
            "bob".into(),
            NegotiationRole::Offerer,
            Arc::new(InertTransport),
        );
        assert_eq!(state.phase(), SessionPhase::Offering);
        assert_eq!(state.remote_peer(), Some("bob"));
        assert!(state.is_current(generation));
        assert_eq!(state.connectivity(), Some(ConnectivityState::New));

        assert!(state.mark_connected());
        assert!(!state.mark_connected());
        assert_eq!(state.phase(), SessionPhase::Connected);

        let ended = state.end_negotiation().expect("negotiation");
        assert_eq!(ended.peer(), "bob");
        assert_eq!(state.phase(), SessionPhase::LoggedIn);
        assert_eq!(state.remote_peer(), None);
        assert_eq!(state.connectivity(), None);
        assert!(!state.is_current(generation));
    }

    #[test]
    fn generations_strictly_increase() {
        let mut state = SessionState::new();
        let first = state.next_generation();
        let second = state.next_generation();
        assert!(second > first);
    }

    #[test]
    fn queued_candidates_flush_in_order() {
        let mut state = logged_in("bob");
        let generation = state.next_generation();
        state.begin_negotiation(
            generation,
            "alice".into(),
            NegotiationRole::Answerer,
            Arc::new(InertTransport),
        );
        assert_eq!(state.phase(), SessionPhase::Answering);

        let negotiation = state.negotiation_mut().unwrap();
        negotiation.queue_candidate(candidate(1));
        negotiation.queue_candidate(candidate(2));
        assert_eq!(negotiation.pending_candidates(), 2);

        let flushed = negotiation.apply_remote_description();
        assert_eq!(flushed, vec![candidate(1), candidate(2)]);
        assert!(negotiation.remote_description_applied());
        assert_eq!(negotiation.pending_candidates(), 0);
    }

    #[test]
    fn closed_is_terminal_for_teardown() {
        let mut state = logged_in("alice");
        let generation = state.next_generation();
        state.begin_negotiation(
            generation,
            "bob".into(),
            NegotiationRole::Offerer,
            Arc::new(InertTransport),
        );
        state.close();
        assert!(state.end_negotiation().is_some());
        assert_eq!(state.phase(), SessionPhase::Closed);
    }
}
