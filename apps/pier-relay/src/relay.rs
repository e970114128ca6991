use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use pier_protocol::{codec, CodecError, Envelope, EnvelopeKind};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Incorrect data format")]
    Malformed(#[from] CodecError),
    #[error("Unrecognized command")]
    Unrecognized,
    #[error("Log in before sending {0}")]
    NotLoggedIn(EnvelopeKind),
    #[error("Missing target user for {0}")]
    MissingTarget(EnvelopeKind),
    #[error("User {0} is not online")]
    UnknownPeer(String),
}

/// A registered user and the peer it is currently negotiating with.
#[derive(Clone)]
struct Member {
    tx: mpsc::UnboundedSender<Envelope>,
    peer: Option<String>,
}

/// One websocket, registered or not.
pub struct Connection {
    name: Option<String>,
    tx: mpsc::UnboundedSender<Envelope>,
}

impl Connection {
    pub fn new(tx: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { name: None, tx }
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn reply(&self, envelope: Envelope) {
        let _ = self.tx.send(envelope);
    }
}

/// Name registry shared by all connections.
#[derive(Clone, Default)]
pub struct RelayState {
    members: Arc<DashMap<String, Member>>,
}

impl RelayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.members.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    #[cfg(test)]
    pub fn peer_of(&self, name: &str) -> Option<String> {
        self.members.get(name).and_then(|member| member.peer.clone())
    }

    /// Handles one text frame. Failures are answered with an error envelope.
    pub fn handle_frame(&self, conn: &mut Connection, text: &str) {
        let result = match codec::decode(text) {
            Ok(Some(envelope)) => self.handle_envelope(conn, envelope),
            Ok(None) => Err(RelayError::Unrecognized),
            Err(err) => Err(RelayError::Malformed(err)),
        };
        if let Err(err) = result {
            warn!(user = ?conn.name(), error = %err, "rejecting client message");
            conn.reply(Envelope::Error {
                message: err.to_string(),
            });
        }
    }

    fn handle_envelope(&self, conn: &mut Connection, envelope: Envelope) -> Result<(), RelayError> {
        let kind = envelope.kind();
        match envelope {
            Envelope::Login { name, .. } => {
                self.login(conn, name.unwrap_or_default());
                Ok(())
            }
            Envelope::Offer { offer, name } => {
                let author = author_of(conn, kind)?;
                if name.is_empty() {
                    return Err(RelayError::MissingTarget(kind));
                }
                self.deliver(
                    &name,
                    Envelope::Offer {
                        offer,
                        name: author.clone(),
                    },
                )?;
                self.set_peer(&author, &name);
                Ok(())
            }
            Envelope::Answer { answer, name } => {
                let author = author_of(conn, kind)?;
                let target = name.ok_or(RelayError::MissingTarget(kind))?;
                self.deliver(
                    &target,
                    Envelope::Answer {
                        answer,
                        name: Some(author.clone()),
                    },
                )?;
                self.set_peer(&author, &target);
                self.set_peer(&target, &author);
                Ok(())
            }
            Envelope::Candidate { candidate, name } => {
                let author = author_of(conn, kind)?;
                let target = name.ok_or(RelayError::MissingTarget(kind))?;
                self.deliver(
                    &target,
                    Envelope::Candidate {
                        candidate,
                        name: Some(author),
                    },
                )
            }
            Envelope::Leave { name } => {
                let author = author_of(conn, kind)?;
                let target = match name {
                    Some(target) => {
                        self.unlink_from(&author, &target);
                        Some(target)
                    }
                    None => self.unlink(&author),
                };
                if let Some(target) = target {
                    self.unlink_from(&target, &author);
                    if let Err(err) = self.deliver(&target, Envelope::Leave { name: Some(author) }) {
                        debug!(error = %err, "leave target already gone");
                    }
                }
                Ok(())
            }
            Envelope::Users { .. } | Envelope::Error { .. } => Err(RelayError::Unrecognized),
        }
    }

    fn login(&self, conn: &mut Connection, name: String) {
        if conn.name.is_some() || name.trim().is_empty() {
            conn.reply(Envelope::login_result(false));
            return;
        }
        let accepted = match self.members.entry(name.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(Member {
                    tx: conn.tx.clone(),
                    peer: None,
                });
                true
            }
        };
        conn.reply(Envelope::login_result(accepted));
        if accepted {
            info!(user = %name, "user logged in");
            conn.name = Some(name);
            self.broadcast_roster();
        } else {
            info!(user = %name, "refused duplicate login");
        }
    }

    /// Drops the connection's registration and tells its peer.
    pub fn disconnect(&self, conn: &Connection) {
        let Some(name) = conn.name() else {
            return;
        };
        let Some((_, member)) = self.members.remove(name) else {
            return;
        };
        info!(user = %name, "user disconnected");
        if let Some(peer) = member.peer {
            self.unlink_from(&peer, name);
            let _ = self.deliver(
                &peer,
                Envelope::Leave {
                    name: Some(name.to_string()),
                },
            );
        }
        self.broadcast_roster();
    }

    fn deliver(&self, target: &str, envelope: Envelope) -> Result<(), RelayError> {
        let member = self
            .members
            .get(target)
            .ok_or_else(|| RelayError::UnknownPeer(target.to_string()))?;
        debug!(to = %target, kind = %envelope.kind(), "forwarding envelope");
        member
            .tx
            .send(envelope)
            .map_err(|_| RelayError::UnknownPeer(target.to_string()))
    }

    fn set_peer(&self, name: &str, peer: &str) {
        if let Some(mut member) = self.members.get_mut(name) {
            member.peer = Some(peer.to_string());
        }
    }

    fn unlink(&self, name: &str) -> Option<String> {
        self.members
            .get_mut(name)
            .and_then(|mut member| member.peer.take())
    }

    /// Clears `name`'s link only while it still points at `peer`.
    fn unlink_from(&self, name: &str, peer: &str) {
        if let Some(mut member) = self.members.get_mut(name) {
            if member.peer.as_deref() == Some(peer) {
                member.peer = None;
            }
        }
    }

    fn broadcast_roster(&self) {
        let roster = Envelope::Users { users: self.names() };
        for entry in self.members.iter() {
            let _ = entry.value().tx.send(roster.clone());
        }
    }
}

fn author_of(conn: &Connection, kind: EnvelopeKind) -> Result<String, RelayError> {
    conn.name
        .clone()
        .ok_or(RelayError::NotLoggedIn(kind))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pier_protocol::{IceCandidate, SessionDescription};

    struct Client {
        conn: Connection,
        rx: mpsc::UnboundedReceiver<Envelope>,
    }

    impl Client {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                conn: Connection::new(tx),
                rx,
            }
        }

        fn send(&mut self, state: &RelayState, envelope: Envelope) {
            let text = codec::encode(&envelope).unwrap();
            state.handle_frame(&mut self.conn, &text);
        }

        fn drain(&mut self) -> Vec<Envelope> {
            let mut received = Vec::new();
            while let Ok(envelope) = self.rx.try_recv() {
                received.push(envelope);
            }
            received
        }
    }

    fn logged_in(state: &RelayState, name: &str) -> Client {
        let mut client = Client::new();
        client.send(state, Envelope::login(name));
        assert!(client.drain().contains(&Envelope::login_result(true)));
        client
    }

    #[test]
    fn duplicate_names_are_refused() {
        let state = RelayState::new();
        let mut alice = Client::new();
        alice.send(&state, Envelope::login("alice"));
        assert_eq!(
            alice.drain(),
            vec![
                Envelope::login_result(true),
                Envelope::Users {
                    users: vec!["alice".into()]
                },
            ]
        );

        let mut imposter = Client::new();
        imposter.send(&state, Envelope::login("alice"));
        assert_eq!(imposter.drain(), vec![Envelope::login_result(false)]);
        assert_eq!(imposter.conn.name(), None);

        alice.send(&state, Envelope::login("alice2"));
        assert_eq!(alice.drain(), vec![Envelope::login_result(false)]);
        assert_eq!(state.names(), vec!["alice".to_string()]);
    }

    #[test]
    fn roster_is_broadcast_on_login() {
        let state = RelayState::new();
        let mut alice = logged_in(&state, "alice");
        let _bob = logged_in(&state, "bob");
        assert_eq!(
            alice.drain(),
            vec![Envelope::Users {
                users: vec!["alice".into(), "bob".into()]
            }]
        );
    }

    #[test]
    fn offer_is_forwarded_with_the_author() {
        let state = RelayState::new();
        let mut alice = logged_in(&state, "alice");
        let mut bob = logged_in(&state, "bob");
        alice.drain();
        bob.drain();

        let offer = SessionDescription::offer("v=0");
        alice.send(
            &state,
            Envelope::Offer {
                offer: offer.clone(),
                name: "bob".into(),
            },
        );
        assert_eq!(
            bob.drain(),
            vec![Envelope::Offer {
                offer,
                name: "alice".into()
            }]
        );
        assert_eq!(state.peer_of("alice").as_deref(), Some("bob"));
        assert_eq!(state.peer_of("bob"), None);

        bob.send(
            &state,
            Envelope::Answer {
                answer: SessionDescription::answer("v=0"),
                name: Some("alice".into()),
            },
        );
        assert_eq!(state.peer_of("bob").as_deref(), Some("alice"));
        bob.send(
            &state,
            Envelope::Candidate {
                candidate: IceCandidate {
                    candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".into(),
                    sdp_mid: Some("0".into()),
                    sdp_mline_index: Some(0),
                    username_fragment: None,
                    ..IceCandidate::default()
                },
                name: Some("alice".into()),
            },
        );
        let received = alice.drain();
        assert_eq!(received.len(), 2);
        assert!(received.iter().all(|envelope| envelope.name() == Some("bob")));
    }

    #[test]
    fn routing_errors_are_reported_to_the_sender() {
        let state = RelayState::new();
        let mut stranger = Client::new();
        stranger.send(
            &state,
            Envelope::Offer {
                offer: SessionDescription::offer("v=0"),
                name: "bob".into(),
            },
        );
        assert_eq!(
            stranger.drain(),
            vec![Envelope::Error {
                message: "Log in before sending offer".into()
            }]
        );

        let mut alice = logged_in(&state, "alice");
        alice.drain();
        alice.send(
            &state,
            Envelope::Offer {
                offer: SessionDescription::offer("v=0"),
                name: "nobody".into(),
            },
        );
        assert_eq!(
            alice.drain(),
            vec![Envelope::Error {
                message: "User nobody is not online".into()
            }]
        );
        assert_eq!(state.peer_of("alice"), None);
    }

    #[test]
    fn bad_frames_get_error_envelopes() {
        let state = RelayState::new();
        let mut client = Client::new();
        state.handle_frame(&mut client.conn, "{not json");
        state.handle_frame(&mut client.conn, r#"{"type":"dance"}"#);
        assert_eq!(
            client.drain(),
            vec![
                Envelope::Error {
                    message: "Incorrect data format".into()
                },
                Envelope::Error {
                    message: "Unrecognized command".into()
                },
            ]
        );
    }

    #[test]
    fn leave_and_disconnect_notify_the_peer() {
        let state = RelayState::new();
        let mut alice = logged_in(&state, "alice");
        let mut bob = logged_in(&state, "bob");
        alice.send(
            &state,
            Envelope::Offer {
                offer: SessionDescription::offer("v=0"),
                name: "bob".into(),
            },
        );
        alice.drain();
        bob.drain();

        alice.send(&state, Envelope::Leave { name: Some("bob".into()) });
        assert_eq!(
            bob.drain(),
            vec![Envelope::Leave {
                name: Some("alice".into())
            }]
        );
        assert_eq!(state.peer_of("bob"), None);

        alice.send(
            &state,
            Envelope::Offer {
                offer: SessionDescription::offer("v=0"),
                name: "bob".into(),
            },
        );
        bob.drain();
        state.disconnect(&alice.conn);
        assert_eq!(
            bob.drain(),
            vec![
                Envelope::Leave {
                    name: Some("alice".into())
                },
                Envelope::Users {
                    users: vec!["bob".into()]
                },
            ]
        );
        assert_eq!(state.names(), vec!["bob".to_string()]);
    }

    #[test]
    fn offers_to_a_busy_user_keep_its_link() {
        let state = RelayState::new();
        let mut alice = logged_in(&state, "alice");
        let mut bob = logged_in(&state, "bob");
        let mut carol = logged_in(&state, "carol");
        alice.send(
            &state,
            Envelope::Offer {
                offer: SessionDescription::offer("v=0"),
                name: "bob".into(),
            },
        );
        bob.send(
            &state,
            Envelope::Answer {
                answer: SessionDescription::answer("v=0"),
                name: Some("alice".into()),
            },
        );
        carol.send(
            &state,
            Envelope::Offer {
                offer: SessionDescription::offer("v=0"),
                name: "alice".into(),
            },
        );
        assert_eq!(state.peer_of("alice").as_deref(), Some("bob"));
        assert_eq!(state.peer_of("carol").as_deref(), Some("alice"));

        // alice declines carol without dropping bob
        alice.send(&state, Envelope::Leave { name: Some("carol".into()) });
        assert_eq!(state.peer_of("alice").as_deref(), Some("bob"));
        assert_eq!(state.peer_of("carol"), None);
        alice.drain();
        bob.drain();
        carol.drain();

        state.disconnect(&alice.conn);
        assert_eq!(
            bob.drain(),
            vec![
                Envelope::Leave {
                    name: Some("alice".into())
                },
                Envelope::Users {
                    users: vec!["bob".into(), "carol".into()]
                },
            ]
        );
        assert_eq!(
            carol.drain(),
            vec![Envelope::Users {
                users: vec!["bob".into(), "carol".into()]
            }]
        );
        assert_eq!(state.peer_of("bob"), None);
    }
}
