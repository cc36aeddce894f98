//! Connection registry.
//!
//! Maps an authenticated user to at most one live push channel. This is the
//! only state shared between connection handlers and the source of truth for
//! who is online.

use std::collections::HashMap;
use std::sync::RwLock;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

use parley_shared::protocol::ServerEvent;
use parley_shared::UserId;

/// Handle to one live push channel.
///
/// Pushing never blocks: a full or closed queue drops the event.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    conn_id: Uuid,
    tx: mpsc::Sender<ServerEvent>,
}

impl ChannelHandle {
    pub fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            conn_id: Uuid::new_v4(),
            tx,
        }
    }

    /// Identity of the underlying connection, used to tell a stale teardown
    /// apart from the current channel.
    pub fn conn_id(&self) -> Uuid {
        self.conn_id
    }

    /// Best-effort push. Returns whether the event was queued.
    pub fn push(&self, event: ServerEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                debug!(
                    conn = %self.conn_id,
                    event = event.name(),
                    "Dropping event for slow channel"
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Operations every handler context needs from the registry.
pub trait Registry: Send + Sync {
    /// Install `handle` for `user`, returning the channel it replaced.
    fn register(&self, user: UserId, handle: ChannelHandle) -> Option<ChannelHandle>;

    /// Remove the entry for `user` only if it is still `conn_id`.
    fn unregister(&self, user: UserId, conn_id: Uuid) -> bool;

    fn lookup(&self, user: UserId) -> Option<ChannelHandle>;

    /// Every registered channel except `user`'s.
    fn others(&self, user: UserId) -> Vec<(UserId, ChannelHandle)>;

    fn online_count(&self) -> usize;
}

/// Lock-guarded in-memory registry.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    channels: RwLock<HashMap<UserId, ChannelHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for ConnectionRegistry {
    fn register(&self, user: UserId, handle: ChannelHandle) -> Option<ChannelHandle> {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels.insert(user, handle)
    }

    fn unregister(&self, user: UserId, conn_id: Uuid) -> bool {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        match channels.get(&user) {
            Some(current) if current.conn_id == conn_id => {
                channels.remove(&user);
                true
            }
            _ => false,
        }
    }

    fn lookup(&self, user: UserId) -> Option<ChannelHandle> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels.get(&user).cloned()
    }

    fn others(&self, user: UserId) -> Vec<(UserId, ChannelHandle)> {
        let channels = self.channels.read().unwrap_or_else(|e| e.into_inner());
        channels
            .iter()
            .filter(|(id, _)| **id != user)
            .map(|(id, handle)| (*id, handle.clone()))
            .collect()
    }

    fn online_count(&self) -> usize {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
