use std::sync::Mutex;

use futures_util::{SinkExt, StreamExt};
use pier_protocol::{Envelope, codec};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use url::Url;

use super::{SignalingChannel, SignalingError};
use crate::negotiation::EngineEvent;

/// Relay connection over a single websocket.
///
/// A writer task drains the outbound queue; a reader task decodes frames and
/// posts them to the engine, followed by [`EngineEvent::SignalingClosed`]
/// when the socket ends.
pub struct WebSocketSignaling {
    send_tx: mpsc::UnboundedSender<String>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl WebSocketSignaling {
    pub async fn connect(
        endpoint: &Url,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Self, SignalingError> {
        let (ws_stream, _) = connect_async(endpoint.as_str())
            .await
            .map_err(|err| SignalingError::Connect(format!("{endpoint}: {err}")))?;
        tracing::debug!(
            target: "pier::signaling",
            url = %endpoint,
            "signaling websocket connected"
        );
        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (send_tx, mut send_rx) = mpsc::unbounded_channel::<String>();

        let writer_events = events.clone();
        let writer_handle = tokio::spawn(async move {
            while let Some(text) = send_rx.recv().await {
                tracing::trace!(target: "pier::signaling", event = "ws_out", len = text.len());
                if let Err(err) = ws_write.send(Message::Text(text)).await {
                    let _ = writer_events.send(EngineEvent::SignalingError(err.to_string()));
                    break;
                }
            }
        });

        let _ = events.send(EngineEvent::SignalingOpened);
        let reader_handle = tokio::spawn(async move {
            while let Some(msg) = ws_read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        tracing::trace!(
                            target: "pier::signaling",
                            event = "ws_in",
                            kind = "text",
                            len = text.len()
                        );
                        dispatch_frame(&text, &events);
                    }
                    Ok(Message::Binary(data)) => match String::from_utf8(data) {
                        Ok(text) => dispatch_frame(&text, &events),
                        Err(_) => {
                            tracing::debug!(target: "pier::signaling", "ignoring non-utf8 binary frame")
                        }
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        match &err {
                            WsError::ConnectionClosed
                            | WsError::AlreadyClosed
                            | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => {
                                tracing::debug!(
                                    target: "pier::signaling",
                                    "signaling websocket closed: {err}"
                                );
                            }
                            _ => {
                                tracing::warn!(
                                    target: "pier::signaling",
                                    "signaling websocket error: {err}"
                                );
                                let _ = events.send(EngineEvent::SignalingError(err.to_string()));
                            }
                        }
                        break;
                    }
                }
            }
            let _ = events.send(EngineEvent::SignalingClosed);
        });

        Ok(Self {
            send_tx,
            tasks: Mutex::new(vec![writer_handle, reader_handle]),
        })
    }
}

fn dispatch_frame(text: &str, events: &mpsc::UnboundedSender<EngineEvent>) {
    match codec::decode(text) {
        Ok(Some(envelope)) => {
            let _ = events.send(EngineEvent::Inbound(envelope));
        }
        Ok(None) => {
            tracing::debug!(target: "pier::signaling", frame = %text, "ignoring envelope of unknown type");
        }
        Err(err) => {
            tracing::warn!(target: "pier::signaling", error = %err, "dropping undecodable relay frame");
        }
    }
}

impl SignalingChannel for WebSocketSignaling {
    fn send(&self, envelope: Envelope) -> Result<(), SignalingError> {
        let text = codec::encode(&envelope)?;
        self.send_tx
            .send(text)
            .map_err(|_| SignalingError::ChannelClosed)
    }
}

impl Drop for WebSocketSignaling {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for handle in tasks.drain(..) {
                handle.abort();
            }
        }
    }
}
