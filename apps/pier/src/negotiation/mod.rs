//! Session negotiation engine.
//!
//! The engine is the single consumer of an [`EngineEvent`] queue. User
//! intents, relay envelopes and media notifications are handled one at a
//! time, so every transition observes and leaves a consistent
//! [`SessionState`]. Slow media work (offer/answer creation) runs on spawned
//! tasks whose results re-enter the queue tagged with the negotiation
//! generation; results for a generation that is no longer current are
//! dropped.

mod error;
mod event;

pub use error::{EngineError, IdentityError};
pub use event::{EngineEvent, EngineHandle, Intent, channel};

use std::sync::Arc;

use pier_protocol::{Envelope, EnvelopeKind, IceCandidate, SessionDescription};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::media::{MediaEvent, MediaEventSink, MediaTransport, MediaTransportFactory};
use crate::presenter::{NoticeSource, Presenter, capitalize};
use crate::session::{ConnectivityState, NegotiationRole, SessionPhase, SessionState};
use crate::signaling::SignalingChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Remote side left or the transport disconnected.
    RemoteLeft,
    /// Local user hung up.
    Hangup,
    /// Replaced by a newer negotiation.
    Superseded,
    /// An error already reported to the user.
    Failure,
    Shutdown,
}

pub struct NegotiationEngine {
    state: SessionState,
    signaling: Arc<dyn SignalingChannel>,
    media: Arc<dyn MediaTransportFactory>,
    presenter: Arc<dyn Presenter>,
    events_tx: mpsc::UnboundedSender<EngineEvent>,
}

impl NegotiationEngine {
    pub fn new(
        signaling: Arc<dyn SignalingChannel>,
        media: Arc<dyn MediaTransportFactory>,
        presenter: Arc<dyn Presenter>,
        events_tx: mpsc::UnboundedSender<EngineEvent>,
    ) -> Self {
        Self {
            state: SessionState::new(),
            signaling,
            media,
            presenter,
            events_tx,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Drains the queue until the session closes, then returns the final state.
    pub async fn run(mut self, mut events: mpsc::UnboundedReceiver<EngineEvent>) -> SessionState {
        while let Some(event) = events.recv().await {
            self.handle(event).await;
            if self.state.phase() == SessionPhase::Closed {
                break;
            }
        }
        info!(
            target: "pier::engine",
            local_name = ?self.state.local_name(),
            "negotiation engine stopped"
        );
        self.state
    }

    pub async fn handle(&mut self, event: EngineEvent) {
        if self.state.phase() == SessionPhase::Closed {
            debug!(target: "pier::engine", ?event, "session closed; ignoring event");
            return;
        }
        let result = match event {
            EngineEvent::Intent(intent) => self.on_intent(intent).await,
            EngineEvent::Inbound(envelope) => self.on_envelope(envelope).await,
            EngineEvent::Media { generation, event } => self.on_media(generation, event).await,
            EngineEvent::SignalingOpened => {
                info!(target: "pier::engine", "connected to the signaling relay");
                Ok(())
            }
            EngineEvent::SignalingError(reason) => {
                warn!(target: "pier::engine", %reason, "signaling transport error");
                self.notify_server(&format!("Signaling error: {reason}"));
                Ok(())
            }
            EngineEvent::SignalingClosed => {
                self.teardown(Teardown::Shutdown).await;
                self.state.close();
                self.notify_server("Disconnected from the relay.");
                Ok(())
            }
            EngineEvent::Shutdown => {
                self.shutdown().await;
                Ok(())
            }
        };
        if let Err(err) = result {
            self.recover(err).await;
        }
    }

    async fn recover(&mut self, err: EngineError) {
        if err.is_user_error() {
            debug!(target: "pier::engine", phase = %self.state.phase(), error = %err, "rejected intent");
        } else {
            warn!(target: "pier::engine", phase = %self.state.phase(), error = %err, "negotiation step failed");
        }
        self.notify_server(&err.to_string());
        if err.ends_negotiation() {
            self.teardown(Teardown::Failure).await;
        }
    }

    async fn on_intent(&mut self, intent: Intent) -> Result<(), EngineError> {
        match intent {
            Intent::Login(name) => self.login(name),
            Intent::ConnectTo(peer) => self.connect_to(peer).await,
            Intent::SendData(text) => self.send_data(text).await,
            Intent::Hangup => {
                self.hangup().await;
                Ok(())
            }
        }
    }

    fn login(&mut self, name: String) -> Result<(), EngineError> {
        let name = name.trim().to_string();
        match self.state.phase() {
            SessionPhase::Idle => {}
            SessionPhase::LoggingIn => return Err(IdentityError::LoginInProgress.into()),
            _ => return Err(IdentityError::AlreadyLoggedIn.into()),
        }
        if name.is_empty() {
            return Err(IdentityError::EmptyName.into());
        }
        self.state.begin_login(name.clone());
        info!(target: "pier::engine", %name, "logging in");
        if let Err(err) = self.send(Envelope::login(name)) {
            self.state.abandon_login();
            return Err(err);
        }
        Ok(())
    }

    async fn connect_to(&mut self, peer: String) -> Result<(), EngineError> {
        let peer = peer.trim().to_string();
        if !self.state.is_logged_in() {
            return Err(IdentityError::NotLoggedIn.into());
        }
        if peer.is_empty() {
            return Err(IdentityError::EmptyPeer.into());
        }
        if self.state.local_name() == Some(peer.as_str()) {
            return Err(IdentityError::SelfConnect.into());
        }
        if let Some(current) = self.state.remote_peer() {
            info!(target: "pier::engine", %current, next = %peer, "superseding current negotiation");
            if let Err(err) = self.send(Envelope::Leave { name: None }) {
                warn!(target: "pier::engine", error = %err, "failed to send leave to superseded peer");
            }
            self.teardown(Teardown::Superseded).await;
        }

        let generation = self.state.next_generation();
        let transport = self
            .open_transport(generation)
            .await
            .map_err(EngineError::Offer)?;
        self.state.begin_negotiation(
            generation,
            peer.clone(),
            NegotiationRole::Offerer,
            Arc::clone(&transport),
        );
        info!(target: "pier::engine", %peer, generation, "starting offer");

        let pipe = transport
            .create_data_pipe(&Config::data_pipe_label(&peer))
            .await
            .map_err(EngineError::Offer)?;
        if let Some(negotiation) = self.state.negotiation_mut() {
            negotiation.attach_pipe(pipe);
        }

        let sink = self.sink(generation);
        tokio::spawn(async move {
            let result = transport.create_offer().await;
            sink.emit(MediaEvent::OfferCreated(result));
        });
        Ok(())
    }

    async fn send_data(&mut self, text: String) -> Result<(), EngineError> {
        let pipe = match self.state.phase() {
            SessionPhase::Connected => self.state.negotiation().and_then(|n| n.pipe()),
            _ => None,
        };
        let Some(pipe) = pipe else {
            return Err(EngineError::NoDataPipe);
        };
        pipe.send_text(&text).await.map_err(EngineError::DataPipe)?;
        let local = self.state.local_name().unwrap_or_default().to_string();
        self.presenter.notify(&text, &NoticeSource::Peer(local));
        Ok(())
    }

    async fn hangup(&mut self) {
        if self.state.negotiation().is_none() {
            debug!(target: "pier::engine", "hangup with no active negotiation");
            return;
        }
        if let Err(err) = self.send(Envelope::Leave { name: None }) {
            warn!(target: "pier::engine", error = %err, "failed to send leave");
        }
        self.teardown(Teardown::Hangup).await;
    }

    async fn shutdown(&mut self) {
        if self.state.negotiation().is_some() {
            if let Err(err) = self.send(Envelope::Leave { name: None }) {
                debug!(target: "pier::engine", error = %err, "failed to send leave on shutdown");
            }
        }
        self.teardown(Teardown::Shutdown).await;
        self.state.close();
    }

    async fn on_envelope(&mut self, envelope: Envelope) -> Result<(), EngineError> {
        trace!(target: "pier::engine", kind = %envelope.kind(), phase = %self.state.phase(), "inbound envelope");
        match envelope {
            Envelope::Login {
                success: Some(success),
                ..
            } => self.on_login_result(success),
            Envelope::Login { success: None, .. } => {
                debug!(target: "pier::engine", "ignoring login envelope without a verdict");
                Ok(())
            }
            Envelope::Offer { offer, name } => self.on_offer(offer, name).await,
            Envelope::Answer { answer, name } => self.on_answer(answer, name).await,
            Envelope::Candidate { candidate, name } => {
                if self.is_from_remote_peer(name.as_deref(), EnvelopeKind::Candidate) {
                    self.on_remote_candidate(candidate).await;
                }
                Ok(())
            }
            Envelope::Leave { name } => {
                if self.state.negotiation().is_none() {
                    debug!(target: "pier::engine", from = ?name, "leave with no active negotiation");
                } else if self.is_from_remote_peer(name.as_deref(), EnvelopeKind::Leave) {
                    self.teardown(Teardown::RemoteLeft).await;
                }
                Ok(())
            }
            Envelope::Users { users } => {
                let names: Vec<&str> = users
                    .iter()
                    .map(String::as_str)
                    .filter(|name| !name.is_empty())
                    .collect();
                if !names.is_empty() {
                    self.notify_server(&format!("Online: {}", names.join(", ")));
                }
                Ok(())
            }
            Envelope::Error { message } => {
                warn!(target: "pier::engine", %message, "relay reported an error");
                self.notify_server(&format!("Relay error: {message}"));
                Ok(())
            }
        }
    }

    fn on_login_result(&mut self, success: bool) -> Result<(), EngineError> {
        match (self.state.phase(), success) {
            (SessionPhase::LoggingIn, true) => {
                if let Some(name) = self.state.commit_login() {
                    info!(target: "pier::engine", %name, "logged in");
                }
                self.notify_server("Connected.");
                Ok(())
            }
            (SessionPhase::LoggingIn, false) => {
                self.state.abandon_login();
                Err(IdentityError::UsernameTaken.into())
            }
            (_, false) if self.state.is_logged_in() => Err(IdentityError::AlreadyLoggedIn.into()),
            (_, false) => Err(IdentityError::UsernameTaken.into()),
            (phase, true) => {
                debug!(target: "pier::engine", %phase, "ignoring unsolicited login confirmation");
                Ok(())
            }
        }
    }

    async fn on_offer(&mut self, offer: SessionDescription, from: String) -> Result<(), EngineError> {
        match self.state.phase() {
            SessionPhase::LoggedIn => {}
            SessionPhase::Idle | SessionPhase::LoggingIn => {
                debug!(target: "pier::engine", %from, "ignoring offer before login");
                return Ok(());
            }
            _ => {
                let current = self.state.remote_peer().unwrap_or_default().to_string();
                if current == from {
                    warn!(target: "pier::engine", peer = %from, "ignoring repeated offer from current peer");
                    return Ok(());
                }
                if let Err(err) = self.dispatch(Envelope::Leave {
                    name: Some(from.clone()),
                }) {
                    debug!(target: "pier::engine", error = %err, "failed to decline offer");
                }
                return Err(EngineError::Busy { current, from });
            }
        }
        if from.is_empty() {
            warn!(target: "pier::engine", "ignoring offer without an author");
            return Ok(());
        }

        let generation = self.state.next_generation();
        let transport = self
            .open_transport(generation)
            .await
            .map_err(EngineError::Answer)?;
        self.state.begin_negotiation(
            generation,
            from.clone(),
            NegotiationRole::Answerer,
            Arc::clone(&transport),
        );
        info!(target: "pier::engine", peer = %from, generation, "answering offer");

        transport
            .set_remote_description(offer)
            .await
            .map_err(EngineError::Answer)?;
        self.flush_candidates(transport.as_ref()).await;

        let sink = self.sink(generation);
        tokio::spawn(async move {
            let result = transport.create_answer().await;
            sink.emit(MediaEvent::AnswerCreated(result));
        });
        Ok(())
    }

    async fn on_answer(
        &mut self,
        answer: SessionDescription,
        from: Option<String>,
    ) -> Result<(), EngineError> {
        let expected = self.state.phase() == SessionPhase::Offering
            && self
                .state
                .negotiation()
                .is_some_and(|n| !n.remote_description_applied());
        let Some(peer) = self.state.remote_peer().map(str::to_string).filter(|_| expected) else {
            warn!(target: "pier::engine", phase = %self.state.phase(), "ignoring unexpected answer");
            return Ok(());
        };
        if from.as_deref().is_some_and(|from| from != peer) {
            warn!(target: "pier::engine", %peer, from = ?from, "ignoring answer from another peer");
            return Ok(());
        }
        let Some(transport) = self.state.negotiation().map(|n| n.transport()) else {
            return Ok(());
        };
        transport
            .set_remote_description(answer)
            .await
            .map_err(|source| EngineError::Negotiation {
                peer: peer.clone(),
                source,
            })?;
        debug!(target: "pier::engine", %peer, "remote answer applied");
        self.flush_candidates(transport.as_ref()).await;
        Ok(())
    }

    /// Whether a peer envelope belongs to the current negotiation. Envelopes
    /// without an author are attributed to the current peer.
    fn is_from_remote_peer(&self, from: Option<&str>, kind: EnvelopeKind) -> bool {
        match (from, self.state.remote_peer()) {
            (Some(from), Some(peer)) if from != peer => {
                debug!(target: "pier::engine", %peer, %from, %kind, "dropping envelope from another peer");
                false
            }
            _ => true,
        }
    }

    async fn on_remote_candidate(&mut self, candidate: IceCandidate) {
        let Some(negotiation) = self.state.negotiation_mut() else {
            debug!(target: "pier::engine", "no negotiation; dropping remote candidate");
            return;
        };
        if !negotiation.remote_description_applied() {
            negotiation.queue_candidate(candidate);
            trace!(
                target: "pier::engine",
                queued = negotiation.pending_candidates(),
                "queued remote candidate until the remote description is applied"
            );
            return;
        }
        let transport = negotiation.transport();
        if let Err(err) = transport.add_ice_candidate(candidate).await {
            warn!(target: "pier::engine", error = %err, "failed to add remote candidate");
        }
    }

    async fn flush_candidates(&mut self, transport: &dyn MediaTransport) {
        let pending = match self.state.negotiation_mut() {
            Some(negotiation) => negotiation.apply_remote_description(),
            None => return,
        };
        if !pending.is_empty() {
            debug!(target: "pier::engine", count = pending.len(), "flushing queued remote candidates");
        }
        for candidate in pending {
            if let Err(err) = transport.add_ice_candidate(candidate).await {
                warn!(target: "pier::engine", error = %err, "failed to add queued remote candidate");
            }
        }
    }

    async fn on_media(&mut self, generation: u64, event: MediaEvent) -> Result<(), EngineError> {
        if !self.state.is_current(generation) {
            debug!(
                target: "pier::engine",
                generation,
                current = ?self.state.negotiation().map(|n| n.generation()),
                event = event.name(),
                "dropping stale media event"
            );
            return Ok(());
        }
        let Some(negotiation) = self.state.negotiation() else {
            return Ok(());
        };
        let peer = negotiation.peer().to_string();
        let transport = negotiation.transport();

        match event {
            MediaEvent::OfferCreated(result) => {
                if self.state.phase() != SessionPhase::Offering {
                    debug!(target: "pier::engine", phase = %self.state.phase(), "offer arrived outside offering");
                    return Ok(());
                }
                let offer = result.map_err(EngineError::Offer)?;
                transport
                    .set_local_description(offer.clone())
                    .await
                    .map_err(EngineError::Offer)?;
                self.send(Envelope::Offer { offer, name: peer })
            }
            MediaEvent::AnswerCreated(result) => {
                if self.state.phase() != SessionPhase::Answering {
                    debug!(target: "pier::engine", phase = %self.state.phase(), "answer arrived outside answering");
                    return Ok(());
                }
                let answer = result.map_err(EngineError::Answer)?;
                transport
                    .set_local_description(answer.clone())
                    .await
                    .map_err(EngineError::Answer)?;
                self.send(Envelope::Answer {
                    answer,
                    name: Some(peer),
                })
            }
            MediaEvent::LocalCandidate(candidate) => self.send(Envelope::Candidate {
                candidate,
                name: None,
            }),
            MediaEvent::Connectivity(connectivity) => {
                self.on_connectivity(peer, connectivity).await
            }
            MediaEvent::DataPipe(pipe) => {
                debug!(target: "pier::engine", label = pipe.label(), "remote data pipe attached");
                if let Some(negotiation) = self.state.negotiation_mut() {
                    negotiation.attach_pipe(pipe);
                }
                Ok(())
            }
            MediaEvent::PipeOpen { label } => {
                debug!(target: "pier::engine", %label, "data pipe open");
                Ok(())
            }
            MediaEvent::PipeMessage { label, text } => {
                trace!(target: "pier::engine", %label, len = text.len(), "data pipe message");
                self.presenter.notify(&text, &NoticeSource::Peer(peer));
                Ok(())
            }
            MediaEvent::PipeClosed { label } => {
                debug!(target: "pier::engine", %label, "data pipe closed");
                if let Some(negotiation) = self.state.negotiation_mut() {
                    negotiation.detach_pipe(&label);
                }
                Ok(())
            }
            MediaEvent::PipeError { label, reason } => {
                warn!(target: "pier::engine", %label, %reason, "data pipe error");
                self.notify_server(&format!("Error: {reason}"));
                Ok(())
            }
        }
    }

    async fn on_connectivity(
        &mut self,
        peer: String,
        connectivity: ConnectivityState,
    ) -> Result<(), EngineError> {
        debug!(target: "pier::engine", %peer, %connectivity, "connectivity changed");
        self.state.set_connectivity(connectivity);
        match connectivity {
            ConnectivityState::Connected => {
                if self.state.mark_connected() {
                    info!(target: "pier::engine", %peer, "peer connected");
                    self.notify_server(&format!(
                        "Connection established with user {}",
                        capitalize(&peer)
                    ));
                }
                Ok(())
            }
            ConnectivityState::Disconnected | ConnectivityState::Closed => {
                self.teardown(Teardown::RemoteLeft).await;
                Ok(())
            }
            ConnectivityState::Failed => Err(EngineError::Connectivity(capitalize(&peer))),
            ConnectivityState::New | ConnectivityState::Connecting => Ok(()),
        }
    }

    /// Ends the current negotiation, if any. State is updated before the
    /// transport is closed, so close-time callbacks arrive as stale events.
    async fn teardown(&mut self, reason: Teardown) {
        let Some(negotiation) = self.state.end_negotiation() else {
            return;
        };
        let peer = negotiation.peer().to_string();
        if let Some(pipe) = negotiation.pipe() {
            if let Err(err) = pipe.close().await {
                debug!(target: "pier::engine", error = %err, "data pipe close failed");
            }
        }
        if let Err(err) = negotiation.transport().close().await {
            debug!(target: "pier::engine", error = %err, "media transport close failed");
        }
        info!(
            target: "pier::engine",
            %peer,
            role = ?negotiation.role(),
            generation = negotiation.generation(),
            ?reason,
            "negotiation ended"
        );
        match reason {
            Teardown::RemoteLeft => {
                self.notify_server(&format!("{} closed the connection.", capitalize(&peer)))
            }
            Teardown::Hangup => self.notify_server(&format!(
                "You closed the connection with {}.",
                capitalize(&peer)
            )),
            Teardown::Superseded | Teardown::Failure | Teardown::Shutdown => {}
        }
    }

    async fn open_transport(
        &self,
        generation: u64,
    ) -> Result<Arc<dyn MediaTransport>, crate::media::MediaError> {
        self.media.create(self.sink(generation)).await
    }

    fn sink(&self, generation: u64) -> MediaEventSink {
        MediaEventSink::new(generation, self.events_tx.clone())
    }

    /// Addresses the envelope to the current peer and hands it to signaling.
    fn send(&self, mut envelope: Envelope) -> Result<(), EngineError> {
        if let Some(peer) = self.state.remote_peer() {
            envelope.stamp_peer(peer);
        }
        self.dispatch(envelope)
    }

    fn dispatch(&self, envelope: Envelope) -> Result<(), EngineError> {
        trace!(target: "pier::engine", kind = %envelope.kind(), to = ?envelope.name(), "outbound envelope");
        self.signaling.send(envelope)?;
        Ok(())
    }

    fn notify_server(&self, message: &str) {
        self.presenter.notify(message, &NoticeSource::Server);
    }
}
