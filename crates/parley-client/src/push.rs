//! Push channel client.

use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, info, warn};

use parley_shared::protocol::{ClientEvent, ServerEvent, TypingSignal};
use parley_shared::{ConversationId, UserId};

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::typing::TypingSink;

const OUTBOUND_BUFFER: usize = 32;
const INBOUND_BUFFER: usize = 256;

/// Sending half of an open push channel.
#[derive(Clone)]
pub struct PushClient {
    outbound: mpsc::Sender<ClientEvent>,
}

impl PushClient {
    /// Open the channel. Pushed events arrive on the returned receiver,
    /// which closes when the server ends the connection.
    pub async fn connect(
        config: &ClientConfig,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), ClientError> {
        let url = push_url(&config.base_url, &config.token)?;
        let (socket, _) = tokio_tungstenite::connect_async(url).await?;
        let (mut sink, mut stream) = socket.split();
        info!(server = %config.base_url, "Push channel connected");

        let (out_tx, mut out_rx) = mpsc::channel::<ClientEvent>(OUTBOUND_BUFFER);
        let (in_tx, in_rx) = mpsc::channel::<ServerEvent>(INBOUND_BUFFER);

        tokio::spawn(async move {
            while let Some(event) = out_rx.recv().await {
                let text = match event.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(error = %e, "Failed to encode client event");
                        continue;
                    }
                };
                if sink.send(WsMessage::Text(text)).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(WsMessage::Text(text)) => match ServerEvent::from_json(&text) {
                        Ok(event) => {
                            if in_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!(error = %e, "Ignoring malformed server frame"),
                    },
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Push channel read failed");
                        break;
                    }
                }
            }
            info!("Push channel closed");
        });

        Ok((Self { outbound: out_tx }, in_rx))
    }

    /// Best effort: returns `false` if the channel is gone or backed up.
    pub fn send(&self, event: ClientEvent) -> bool {
        self.outbound.try_send(event).is_ok()
    }
}

impl TypingSink for PushClient {
    fn send_typing(&self, conversation_id: ConversationId, recipient_id: UserId, is_typing: bool) {
        let signal = TypingSignal {
            conversation_id,
            recipient_id,
        };
        let event = if is_typing {
            ClientEvent::TypingStart(signal)
        } else {
            ClientEvent::TypingStop(signal)
        };
        self.send(event);
    }
}

/// `http(s)://host` → `ws(s)://host/ws?token=...`
fn push_url(base_url: &str, token: &str) -> Result<String, ClientError> {
    let base = base_url.trim_end_matches('/');
    let ws_base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if base.starts_with("ws://") || base.starts_with("wss://") {
        base.to_string()
    } else {
        return Err(ClientError::InvalidUrl(base_url.to_string()));
    };
    Ok(format!("{ws_base}/ws?token={token}"))
}
