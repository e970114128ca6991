use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use pier_protocol::{codec, Envelope};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::relay::{Connection, RelayState};

pub async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<RelayState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();

    let writer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            match codec::encode(&envelope) {
                Ok(text) => {
                    if sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(err) => warn!(error = %err, "failed to encode outbound envelope"),
            }
        }
    });

    let mut conn = Connection::new(tx);
    debug!("websocket connected");

    while let Some(frame) = receiver.next().await {
        match frame {
            Ok(Message::Text(text)) => state.handle_frame(&mut conn, &text),
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => state.handle_frame(&mut conn, &text),
                Err(_) => debug!("ignoring non-utf8 binary frame"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(user = ?conn.name(), error = %err, "websocket error");
                break;
            }
        }
    }

    state.disconnect(&conn);
    debug!(user = ?conn.name(), "websocket closed");
    drop(conn);
    let _ = writer.await;
}
