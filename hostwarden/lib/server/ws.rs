//! The live status WebSocket.
//!
//! Each socket becomes one broadcaster session. Messages from the broadcaster arrive through a
//! [`ChannelSink`] and are forwarded to the socket by a dedicated task; when the broadcaster
//! drops the session (bad token, shutdown) that channel ends and the socket is closed.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::{
    status::{Broadcaster, ChannelSink, ClientMessage, ServerMessage, SessionId},
    HostwardenError,
};

use super::ServerState;

//--------------------------------------------------------------------------------------------------
// Functions: Handlers
//--------------------------------------------------------------------------------------------------

/// Handler for `GET /ws`.
pub async fn status_socket(State(state): State<ServerState>, ws: WebSocketUpgrade) -> Response {
    let broadcaster = state.broadcaster().clone();
    ws.on_upgrade(move |socket| run_session(broadcaster, socket))
}

//--------------------------------------------------------------------------------------------------
// Functions: Helpers
//--------------------------------------------------------------------------------------------------

async fn run_session(broadcaster: Arc<Broadcaster>, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (sink, mut outbox) = ChannelSink::channel();
    let (replies, mut local) = mpsc::unbounded_channel::<ServerMessage>();

    let id = broadcaster.open_session(Arc::new(sink));

    let mut forward = tokio::spawn(async move {
        loop {
            let message = tokio::select! {
                message = outbox.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
                Some(message) = local.recv() => message,
            };

            let text = match serde_json::to_string(&message) {
                Ok(text) => text,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode status message");
                    continue;
                }
            };

            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }

        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    handle_client_message(&broadcaster, id, text.as_str(), &replies).await;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            _ = &mut forward => break,
        }
    }

    broadcaster.close(id).await;
    if !forward.is_finished() {
        let _ = forward.await;
    }

    tracing::debug!(session_id = %id, "status socket closed");
}

async fn handle_client_message(
    broadcaster: &Broadcaster,
    id: SessionId,
    text: &str,
    replies: &mpsc::UnboundedSender<ServerMessage>,
) {
    let message = match serde_json::from_str::<ClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(session_id = %id, error = %e, "unreadable client message");
            let _ = replies.send(ServerMessage::Error {
                message: format!("invalid message: {e}"),
            });
            return;
        }
    };

    match message {
        ClientMessage::Authenticate { token } => {
            // A rejected token has already been reported and the session closed.
            if let Err(e) = broadcaster.authenticate(id, &token).await {
                if e.is_client_error() && !matches!(e, HostwardenError::Authentication(_)) {
                    let _ = replies.send(ServerMessage::Error {
                        message: e.to_string(),
                    });
                }
            }
        }
    }
}
