//! Point-to-point media capability used by the negotiation engine.
//!
//! A [`MediaTransport`] is created per negotiation by a [`MediaTransportFactory`].
//! Everything the transport reports asynchronously (local candidates,
//! connectivity changes, data pipe traffic) flows back through the
//! [`MediaEventSink`] it was created with, tagged with the negotiation
//! generation so the engine can drop events from superseded transports.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use pier_protocol::{IceCandidate, SessionDescription};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::negotiation::EngineEvent;
use crate::session::ConnectivityState;

pub mod webrtc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MediaError {
    #[error("media transport setup failed: {0}")]
    Setup(String),
    #[error("offer creation failed: {0}")]
    Offer(String),
    #[error("answer creation failed: {0}")]
    Answer(String),
    #[error("failed to apply {side} description: {reason}")]
    Description { side: &'static str, reason: String },
    #[error("failed to add ice candidate: {0}")]
    Candidate(String),
    #[error("data pipe error: {0}")]
    DataPipe(String),
    #[error("media transport closed")]
    Closed,
}

#[async_trait]
pub trait MediaTransport: Send + Sync + fmt::Debug {
    async fn create_offer(&self) -> Result<SessionDescription, MediaError>;

    async fn create_answer(&self) -> Result<SessionDescription, MediaError>;

    async fn set_local_description(&self, description: SessionDescription)
    -> Result<(), MediaError>;

    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), MediaError>;

    async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), MediaError>;

    /// Opens the offerer's side of the data pipe. The answerer receives its
    /// end through [`MediaEvent::DataPipe`].
    async fn create_data_pipe(&self, label: &str) -> Result<Arc<dyn DataPipe>, MediaError>;

    async fn close(&self) -> Result<(), MediaError>;
}

#[async_trait]
pub trait DataPipe: Send + Sync + fmt::Debug {
    fn label(&self) -> &str;

    async fn send_text(&self, text: &str) -> Result<(), MediaError>;

    async fn close(&self) -> Result<(), MediaError>;
}

#[async_trait]
pub trait MediaTransportFactory: Send + Sync {
    async fn create(&self, events: MediaEventSink) -> Result<Arc<dyn MediaTransport>, MediaError>;
}

/// Asynchronous results and notifications from a media transport.
#[derive(Debug)]
pub enum MediaEvent {
    OfferCreated(Result<SessionDescription, MediaError>),
    AnswerCreated(Result<SessionDescription, MediaError>),
    LocalCandidate(IceCandidate),
    Connectivity(ConnectivityState),
    /// Remote-initiated data pipe (answerer side).
    DataPipe(Arc<dyn DataPipe>),
    PipeOpen { label: String },
    PipeMessage { label: String, text: String },
    PipeClosed { label: String },
    PipeError { label: String, reason: String },
}

impl MediaEvent {
    pub fn name(&self) -> &'static str {
        match self {
            MediaEvent::OfferCreated(_) => "offer_created",
            MediaEvent::AnswerCreated(_) => "answer_created",
            MediaEvent::LocalCandidate(_) => "local_candidate",
            MediaEvent::Connectivity(_) => "connectivity",
            MediaEvent::DataPipe(_) => "data_pipe",
            MediaEvent::PipeOpen { .. } => "pipe_open",
            MediaEvent::PipeMessage { .. } => "pipe_message",
            MediaEvent::PipeClosed { .. } => "pipe_closed",
            MediaEvent::PipeError { .. } => "pipe_error",
        }
    }
}

/// Re-entry point into the engine queue for one negotiation generation.
#[derive(Debug, Clone)]
pub struct MediaEventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl MediaEventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { generation, tx }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns false once the engine has stopped listening.
    pub fn emit(&self, event: MediaEvent) -> bool {
        self.tx
            .send(EngineEvent::Media {
                generation: self.generation,
                event,
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sink_tags_events_with_its_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = MediaEventSink::new(7, tx);
        assert!(sink.emit(MediaEvent::Connectivity(ConnectivityState::Connecting)));

        match rx.recv().await {
            Some(EngineEvent::Media { generation, event }) => {
                assert_eq!(generation, 7);
                assert_eq!(event.name(), "connectivity");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        drop(rx);
        assert!(!sink.emit(MediaEvent::PipeOpen {
            label: "bob-dataChannel".into()
        }));
    }
}
