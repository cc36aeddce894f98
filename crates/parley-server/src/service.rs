//! The chat core shared by every HTTP handler and push-channel session.
//!
//! Operations are split across modules by concern (`presence`, `typing`,
//! `delivery`, `reads`, `aggregator`, `history`, `directory`), each adding an
//! `impl ChatService` block.

use std::sync::{Arc, Mutex, MutexGuard};

use parley_shared::protocol::ServerEvent;
use parley_shared::{ConversationId, UserId};
use parley_store::{Conversation, Database};

use crate::error::ServerError;
use crate::registry::Registry;

#[derive(Clone)]
pub struct ChatService {
    db: Arc<Mutex<Database>>,
    registry: Arc<dyn Registry>,
}

impl ChatService {
    pub fn new(db: Database, registry: Arc<dyn Registry>) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            registry,
        }
    }

    pub fn registry(&self) -> &dyn Registry {
        self.registry.as_ref()
    }

    /// Lock the database. A poisoned lock means a previous writer panicked
    /// mid-operation and is reported as an unavailable upstream.
    pub(crate) fn db(&self) -> Result<MutexGuard<'_, Database>, ServerError> {
        self.db
            .lock()
            .map_err(|_| ServerError::UpstreamUnavailable("database lock poisoned".into()))
    }

    /// Load a conversation the caller takes part in.
    ///
    /// A missing conversation and one the caller is not part of are reported
    /// identically, so conversation ids cannot be probed.
    pub(crate) fn conversation_for(
        db: &Database,
        conversation_id: ConversationId,
        user: UserId,
    ) -> Result<Conversation, ServerError> {
        match db.find_conversation(conversation_id)? {
            Some(conv) if conv.has_participant(user) => Ok(conv),
            _ => Err(ServerError::AccessDenied),
        }
    }

    /// Push to `user` if reachable. Returns whether the event was queued.
    pub(crate) fn push_to(&self, user: UserId, event: ServerEvent) -> bool {
        match self.registry.lookup(user) {
            Some(handle) => handle.push(event),
            None => false,
        }
    }
}
