use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Missing credential")]
    Missing,

    #[error("Malformed credential: {0}")]
    Malformed(String),

    #[error("Invalid credential signature")]
    BadSignature,

    #[error("Credential expired")]
    Expired,

    #[error("Invalid issuer key")]
    InvalidIssuerKey,
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message must have text or an attachment")]
    EmptyMessage,

    #[error("Message too long: {len} characters (max {max})")]
    TooLong { len: usize, max: usize },
}
