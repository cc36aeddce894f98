//! # parley-client
//!
//! Client-side reconciliation for the Parley messenger: the open thread's
//! state is owned by a single task and fed by user actions and pushed
//! events, so optimistic sends and live updates never race each other.

pub mod backend;
pub mod config;
pub mod error;
pub mod http;
pub mod presence;
pub mod push;
pub mod session;
pub mod thread;
pub mod typing;

pub use backend::ChatBackend;
pub use config::ClientConfig;
pub use error::ClientError;
pub use session::ChatSession;
pub use thread::{Draft, ThreadState, ThreadStore};
