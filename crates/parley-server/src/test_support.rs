//! Helpers shared by the server's unit tests.

use std::sync::Arc;

use tokio::sync::mpsc;

use parley_shared::protocol::ServerEvent;
use parley_shared::UserId;
use parley_store::Database;

use crate::registry::{ChannelHandle, ConnectionRegistry};
use crate::service::ChatService;

pub fn service() -> ChatService {
    let db = Database::open_in_memory().expect("in-memory database");
    ChatService::new(db, Arc::new(ConnectionRegistry::new()))
}

pub fn user(chat: &ChatService, name: &str) -> UserId {
    let id = UserId::new();
    chat.ensure_user(id, name).expect("upsert user");
    id
}

/// A fake push channel: the handle to register and the receiving end.
pub fn channel() -> (ChannelHandle, mpsc::Receiver<ServerEvent>) {
    let (tx, rx) = mpsc::channel(32);
    (ChannelHandle::new(tx), rx)
}

/// Connect `user` and return the receiving end of its push channel.
pub fn connect(chat: &ChatService, user: UserId) -> mpsc::Receiver<ServerEvent> {
    let (handle, rx) = channel();
    chat.connect(user, handle).expect("connect");
    rx
}

/// Everything queued on a fake channel so far.
pub fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Make every later UPDATE on `table` fail, as a storage fault would.
pub fn fail_updates_on(chat: &ChatService, table: &str) {
    chat.db()
        .expect("database lock")
        .conn()
        .execute_batch(&format!(
            "CREATE TEMP TRIGGER fail_{table} BEFORE UPDATE ON {table} \
             BEGIN SELECT RAISE(ABORT, 'disk I/O error'); END;"
        ))
        .expect("install failing trigger");
}
