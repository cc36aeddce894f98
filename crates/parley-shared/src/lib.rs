//! Types shared by the Parley server, store and client: identifiers, the
//! push-channel protocol, session credentials and message body rules.

pub mod auth;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod text;
pub mod types;

pub use error::{AuthError, ProtocolError};
pub use types::*;
