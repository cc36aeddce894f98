use thiserror::Error;

use parley_shared::ProtocolError;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A structured failure reported by the server; `message` is meant for
    /// the user.
    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("Push channel error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Invalid server URL: {0}")]
    InvalidUrl(String),

    #[error("Nothing to send")]
    EmptyDraft,

    #[error("No conversation is open")]
    NoConversation,

    #[error("Thread store stopped")]
    Closed,
}

impl ClientError {
    /// Text to show the user when an action fails.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::Server { message, .. } => message.clone(),
            ClientError::Http(_) | ClientError::WebSocket(_) => {
                "Could not reach the server. Please try again.".to_string()
            }
            other => other.to_string(),
        }
    }
}
