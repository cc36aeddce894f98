//! WebSocket push channel.
//!
//! The credential is checked before the upgrade, so a rejected client never
//! touches the registry. After the upgrade one task drains the channel's
//! outbound queue into the socket while the handler reads client frames.

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use parley_shared::protocol::ClientEvent;
use parley_shared::{AuthError, UserId};

use crate::api::AppState;
use crate::auth::AuthUser;
use crate::error::ServerError;
use crate::registry::ChannelHandle;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Result<Response, ServerError> {
    let raw = params.token.as_deref().ok_or(AuthError::Missing)?;
    let user = state.authenticate(raw)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, user)))
}

async fn handle_socket(socket: WebSocket, state: AppState, user: AuthUser) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::channel(state.config.push_buffer);
    let handle = ChannelHandle::new(tx);
    let conn_id = handle.conn_id();

    debug!(user = %user.id, name = %user.display_name, conn = %conn_id, "Push channel opened");

    if let Err(e) = state.chat.connect(user.id, handle) {
        warn!(user = %user.id, error = %e, "Failed to register push channel");
        let _ = sink.close().await;
        return;
    }

    // Ends when every sender is gone, which happens once this connection is
    // replaced or unregistered.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if sink.send(WsMessage::Text(text)).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(WsMessage::Text(text)) => handle_client_frame(&state, user.id, &text),
            Ok(WsMessage::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(user = %user.id, error = %e, "Push channel read error");
                break;
            }
        }
    }

    if let Err(e) = state.chat.disconnect(user.id, conn_id) {
        warn!(user = %user.id, error = %e, "Failed to record disconnect");
    }
    writer.abort();
}

fn handle_client_frame(state: &AppState, user: UserId, text: &str) {
    match ClientEvent::from_json(text) {
        Ok(ClientEvent::TypingStart(signal)) => {
            state
                .chat
                .notify_typing(user, signal.recipient_id, signal.conversation_id, true);
        }
        Ok(ClientEvent::TypingStop(signal)) => {
            state
                .chat
                .notify_typing(user, signal.recipient_id, signal.conversation_id, false);
        }
        Err(e) => {
            debug!(user = %user, error = %e, "Ignoring malformed client frame");
        }
    }
}
