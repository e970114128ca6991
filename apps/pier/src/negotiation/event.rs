use pier_protocol::Envelope;
use tokio::sync::mpsc;

use crate::media::MediaEvent;

/// Local user commands accepted by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Login(String),
    ConnectTo(String),
    SendData(String),
    Hangup,
}

/// Everything the engine reacts to, funnelled through one queue.
#[derive(Debug)]
pub enum EngineEvent {
    Intent(Intent),
    Inbound(Envelope),
    SignalingOpened,
    SignalingError(String),
    SignalingClosed,
    Media { generation: u64, event: MediaEvent },
    Shutdown,
}

/// Cloneable submission side of the engine queue.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl EngineHandle {
    pub fn sender(&self) -> mpsc::UnboundedSender<EngineEvent> {
        self.tx.clone()
    }

    /// Returns false once the engine has stopped.
    pub fn submit(&self, intent: Intent) -> bool {
        self.tx.send(EngineEvent::Intent(intent)).is_ok()
    }

    pub fn shutdown(&self) -> bool {
        self.tx.send(EngineEvent::Shutdown).is_ok()
    }
}

pub fn channel() -> (EngineHandle, mpsc::UnboundedReceiver<EngineEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EngineHandle { tx }, rx)
}
