//! State of the open conversation thread.
//!
//! [`ThreadState::apply`] is the only way the thread changes. [`ThreadStore`]
//! runs it on a dedicated task and publishes snapshots, so the send path and
//! the pushed-event path can both feed it without losing updates.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_shared::protocol::{ChatMessage, MessagePage, ReadReceipt};
use parley_shared::{Attachment, AttachmentKind, ConversationId, MessageId, MessageStatus, UserId};

use crate::error::ClientError;

/// Local id of a message that has not been confirmed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TempId(String);

impl TempId {
    pub fn new() -> Self {
        Self(format!("opt_{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TempId {
    fn default() -> Self {
        Self::new()
    }
}

/// A file picked in the compose box but not uploaded yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub original_name: String,
    pub mime_type: String,
    pub data: Vec<u8>,
    /// Where the UI can render the file from before it is uploaded.
    pub local_preview: String,
}

/// Compose box contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Draft {
    pub text: String,
    pub file: Option<PendingFile>,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            file: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.file.is_none()
    }
}

/// A message shown before the server has accepted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionalMessage {
    pub temp_id: TempId,
    pub sender_id: UserId,
    pub text: String,
    /// Points at the local preview, not at the server.
    pub attachment: Option<Attachment>,
    pub created_at: DateTime<Utc>,
    /// What to put back in the compose box if the send fails.
    draft: Draft,
}

impl ProvisionalMessage {
    fn from_draft(
        temp_id: TempId,
        sender_id: UserId,
        draft: Draft,
        created_at: DateTime<Utc>,
    ) -> Self {
        let attachment = draft.file.as_ref().map(|f| Attachment {
            kind: AttachmentKind::from_mime(&f.mime_type),
            original_name: f.original_name.clone(),
            mime_type: f.mime_type.clone(),
            size: f.data.len() as u64,
            url: f.local_preview.clone(),
        });
        Self {
            temp_id,
            sender_id,
            text: draft.text.trim().to_string(),
            attachment,
            created_at,
            draft,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadEntry {
    Provisional(ProvisionalMessage),
    Confirmed(ChatMessage),
}

impl ThreadEntry {
    pub fn server_id(&self) -> Option<MessageId> {
        match self {
            ThreadEntry::Confirmed(m) => Some(m.id),
            ThreadEntry::Provisional(_) => None,
        }
    }

    pub fn temp_id(&self) -> Option<&TempId> {
        match self {
            ThreadEntry::Provisional(p) => Some(&p.temp_id),
            ThreadEntry::Confirmed(_) => None,
        }
    }

    pub fn status(&self) -> MessageStatus {
        match self {
            ThreadEntry::Provisional(_) => MessageStatus::Sent,
            ThreadEntry::Confirmed(m) => m.status,
        }
    }
}

/// Every change the thread can undergo.
#[derive(Debug, Clone)]
pub enum ThreadAction {
    /// Show a conversation starting from its newest page.
    Open {
        conversation_id: ConversationId,
        page: MessagePage,
    },
    /// Older history fetched by "load more".
    PrependHistory {
        conversation_id: ConversationId,
        page: MessagePage,
    },
    SetCompose(Draft),
    /// Show a message immediately and clear the compose box.
    OptimisticInsert {
        temp_id: TempId,
        draft: Draft,
        created_at: DateTime<Utc>,
    },
    /// The server accepted the send identified by `temp_id`.
    Confirm { temp_id: TempId, message: ChatMessage },
    /// The send identified by `temp_id` failed.
    Rollback { temp_id: TempId, error: String },
    /// `new_message` pushed by the server.
    Incoming(ChatMessage),
    /// `message_sent` pushed by the server.
    SentEcho(ChatMessage),
    /// `messages_read` pushed by the server.
    PeerRead {
        conversation_id: ConversationId,
        reader: UserId,
        at: DateTime<Utc>,
    },
    DismissError,
    Close,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadState {
    pub viewer: UserId,
    pub conversation_id: Option<ConversationId>,
    /// Oldest first.
    pub entries: Vec<ThreadEntry>,
    /// Highest history page loaded so far.
    pub page: u32,
    pub has_more: bool,
    pub compose: Draft,
    pub last_error: Option<String>,
    /// `message_sent` echoes that arrived while sends were in flight.
    held_echoes: Vec<ChatMessage>,
}

impl ThreadState {
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            conversation_id: None,
            entries: Vec::new(),
            page: 0,
            has_more: false,
            compose: Draft::default(),
            last_error: None,
            held_echoes: Vec::new(),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, ThreadEntry::Provisional(_)))
            .count()
    }

    pub fn find(&self, id: MessageId) -> Option<&ChatMessage> {
        self.entries.iter().find_map(|e| match e {
            ThreadEntry::Confirmed(m) if m.id == id => Some(m),
            _ => None,
        })
    }

    fn is_open(&self, conversation_id: ConversationId) -> bool {
        self.conversation_id == Some(conversation_id)
    }

    fn position_of(&self, id: MessageId) -> Option<usize> {
        self.entries.iter().position(|e| e.server_id() == Some(id))
    }

    fn position_of_temp(&self, temp_id: &TempId) -> Option<usize> {
        self.entries.iter().position(|e| e.temp_id() == Some(temp_id))
    }

    /// Merge a server copy into a known message without regressing it.
    fn merge_known(&mut self, idx: usize, incoming: &ChatMessage) {
        if let ThreadEntry::Confirmed(existing) = &mut self.entries[idx] {
            existing.status = existing.status.advance(incoming.status);
            for receipt in &incoming.read_by {
                if !existing.read_by.iter().any(|r| r.reader_id == receipt.reader_id) {
                    existing.read_by.push(receipt.clone());
                }
            }
        }
    }

    /// Append unless already present, in which case only advance it.
    fn upsert(&mut self, message: ChatMessage) {
        match self.position_of(message.id) {
            Some(idx) => self.merge_known(idx, &message),
            None => self.entries.push(ThreadEntry::Confirmed(message)),
        }
    }

    fn flush_held_echoes(&mut self) {
        if self.in_flight() > 0 {
            return;
        }
        for echo in std::mem::take(&mut self.held_echoes) {
            self.upsert(echo);
        }
    }

    pub fn apply(&mut self, action: ThreadAction) {
        match action {
            ThreadAction::Open {
                conversation_id,
                page,
            } => {
                self.conversation_id = Some(conversation_id);
                self.entries = page
                    .messages
                    .into_iter()
                    .map(ThreadEntry::Confirmed)
                    .collect();
                self.page = page.page;
                self.has_more = page.has_more;
                self.compose = Draft::default();
                self.last_error = None;
                self.held_echoes.clear();
            }

            ThreadAction::PrependHistory {
                conversation_id,
                page,
            } => {
                if !self.is_open(conversation_id) {
                    return;
                }
                let older: Vec<ThreadEntry> = page
                    .messages
                    .into_iter()
                    .filter(|m| self.position_of(m.id).is_none())
                    .map(ThreadEntry::Confirmed)
                    .collect();
                self.entries.splice(0..0, older);
                self.page = self.page.max(page.page);
                self.has_more = page.has_more;
            }

            ThreadAction::SetCompose(draft) => self.compose = draft,

            ThreadAction::OptimisticInsert {
                temp_id,
                draft,
                created_at,
            } => {
                let provisional =
                    ProvisionalMessage::from_draft(temp_id, self.viewer, draft, created_at);
                self.entries.push(ThreadEntry::Provisional(provisional));
                self.compose = Draft::default();
                self.last_error = None;
            }

            ThreadAction::Confirm { temp_id, message } => {
                let Some(idx) = self.position_of_temp(&temp_id) else {
                    debug!(temp_id = temp_id.as_str(), "Confirmation for unknown send");
                    // The thread may have been switched while the send was in flight.
                    if self.is_open(message.conversation_id) {
                        self.upsert(message);
                    }
                    return;
                };

                let held = self
                    .held_echoes
                    .iter()
                    .position(|m| m.id == message.id)
                    .map(|i| self.held_echoes.remove(i));

                if let Some(existing) = self.position_of(message.id) {
                    self.entries.remove(idx);
                    let existing = if existing > idx { existing - 1 } else { existing };
                    self.merge_known(existing, &message);
                } else {
                    self.entries[idx] = ThreadEntry::Confirmed(message);
                }
                if let Some(echo) = held {
                    self.upsert(echo);
                }
                self.flush_held_echoes();
            }

            ThreadAction::Rollback { temp_id, error } => {
                if let Some(idx) = self.position_of_temp(&temp_id) {
                    if let ThreadEntry::Provisional(p) = self.entries.remove(idx) {
                        self.compose = p.draft;
                    }
                }
                self.last_error = Some(error);
                self.flush_held_echoes();
            }

            ThreadAction::Incoming(message) => {
                if !self.is_open(message.conversation_id) {
                    return;
                }
                self.upsert(message);
            }

            ThreadAction::SentEcho(message) => {
                if !self.is_open(message.conversation_id) {
                    return;
                }
                if let Some(idx) = self.position_of(message.id) {
                    self.merge_known(idx, &message);
                } else if self.in_flight() > 0 {
                    self.held_echoes.push(message);
                } else {
                    self.entries.push(ThreadEntry::Confirmed(message));
                }
            }

            ThreadAction::PeerRead {
                conversation_id,
                reader,
                at,
            } => {
                if !self.is_open(conversation_id) || reader == self.viewer {
                    return;
                }
                let viewer = self.viewer;
                for entry in &mut self.entries {
                    if let ThreadEntry::Confirmed(m) = entry {
                        if m.sender_id == viewer && m.status != MessageStatus::Read {
                            m.status = MessageStatus::Read;
                            if !m.read_by.iter().any(|r| r.reader_id == reader) {
                                m.read_by.push(ReadReceipt {
                                    reader_id: reader,
                                    read_at: at,
                                });
                            }
                        }
                    }
                }
            }

            ThreadAction::DismissError => self.last_error = None,

            ThreadAction::Close => {
                let viewer = self.viewer;
                *self = ThreadState::new(viewer);
            }
        }
    }
}

struct Command {
    action: ThreadAction,
    applied: oneshot::Sender<()>,
}

/// Single-writer owner of a [`ThreadState`].
#[derive(Clone)]
pub struct ThreadStore {
    tx: mpsc::Sender<Command>,
    snapshot: watch::Receiver<ThreadState>,
}

impl ThreadStore {
    /// Spawn the owning task. Must be called inside a tokio runtime.
    pub fn spawn(viewer: UserId) -> Self {
        let (tx, mut rx) = mpsc::channel::<Command>(256);
        let (snapshot_tx, snapshot) = watch::channel(ThreadState::new(viewer));

        tokio::spawn(async move {
            while let Some(Command { action, applied }) = rx.recv().await {
                snapshot_tx.send_modify(|state| state.apply(action));
                let _ = applied.send(());
            }
            debug!("Thread store stopped");
        });

        Self { tx, snapshot }
    }

    /// Queue `action` and wait until it has been applied.
    pub async fn dispatch(&self, action: ThreadAction) -> Result<(), ClientError> {
        let (applied, done) = oneshot::channel();
        self.tx
            .send(Command { action, applied })
            .await
            .map_err(|_| ClientError::Closed)?;
        done.await.map_err(|_| {
            warn!("Thread store dropped an action");
            ClientError::Closed
        })
    }

    pub fn snapshot(&self) -> ThreadState {
        self.snapshot.borrow().clone()
    }

    /// Observe every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ThreadState> {
        self.snapshot.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(conv: ConversationId, sender: UserId, text: &str) -> ChatMessage {
        ChatMessage {
            id: MessageId::new(),
            conversation_id: conv,
            sender_id: sender,
            text: text.to_string(),
            attachment: None,
            status: MessageStatus::Sent,
            read_by: Vec::new(),
            created_at: Utc::now(),
        }
    }

    fn opened(viewer: UserId, conv: ConversationId, messages: Vec<ChatMessage>) -> ThreadState {
        let mut state = ThreadState::new(viewer);
        let total = messages.len() as u64;
        state.apply(ThreadAction::Open {
            conversation_id: conv,
            page: MessagePage {
                messages,
                total,
                page: 1,
                pages: 1,
                has_more: false,
            },
        });
        state
    }

    fn texts(state: &ThreadState) -> Vec<String> {
        state
            .entries
            .iter()
            .map(|e| match e {
                ThreadEntry::Provisional(p) => format!("~{}", p.text),
                ThreadEntry::Confirmed(m) => m.text.clone(),
            })
            .collect()
    }

    #[test]
    fn confirm_replaces_in_place() {
        let me = UserId::new();
        let peer = UserId::new();
        let conv = ConversationId::new();
        let mut state = opened(me, conv, vec![message(conv, peer, "hi")]);

        let temp = TempId::new();
        state.apply(ThreadAction::SetCompose(Draft::text("hello")));
        state.apply(ThreadAction::OptimisticInsert {
            temp_id: temp.clone(),
            draft: Draft::text("hello"),
            created_at: Utc::now(),
        });
        assert_eq!(texts(&state), vec!["hi", "~hello"]);
        assert!(state.compose.is_empty());

        // A genuinely concurrent peer message lands after the provisional one
        // and must not be mistaken for its echo.
        state.apply(ThreadAction::Incoming(message(conv, peer, "hello")));
        assert_eq!(texts(&state), vec!["hi", "~hello", "hello"]);

        let confirmed = message(conv, me, "hello");
        state.apply(ThreadAction::Confirm {
            temp_id: temp,
            message: confirmed.clone(),
        });
        assert_eq!(texts(&state), vec!["hi", "hello", "hello"]);
        assert_eq!(state.entries[1].server_id(), Some(confirmed.id));
        assert_eq!(state.in_flight(), 0);
    }

    #[test]
    fn confirm_after_switching_threads_stays_out() {
        let me = UserId::new();
        let first = ConversationId::new();
        let second = ConversationId::new();
        let mut state = opened(me, first, vec![]);

        let temp = TempId::new();
        state.apply(ThreadAction::OptimisticInsert {
            temp_id: temp.clone(),
            draft: Draft::text("for the first thread"),
            created_at: Utc::now(),
        });

        state.apply(ThreadAction::Open {
            conversation_id: second,
            page: MessagePage {
                messages: vec![],
                total: 0,
                page: 1,
                pages: 0,
                has_more: false,
            },
        });
        state.apply(ThreadAction::Confirm {
            temp_id: temp,
            message: message(first, me, "for the first thread"),
        });

        assert_eq!(state.conversation_id, Some(second));
        assert!(state.entries.is_empty());
    }

    #[test]
    fn rollback_restores_compose_and_surfaces_error() {
        let me = UserId::new();
        let conv = ConversationId::new();
        let mut state = opened(me, conv, vec![]);

        let temp = TempId::new();
        let draft = Draft::text("  retry me ");
        state.apply(ThreadAction::OptimisticInsert {
            temp_id: temp.clone(),
            draft: draft.clone(),
            created_at: Utc::now(),
        });
        state.apply(ThreadAction::Rollback {
            temp_id: temp,
            error: "Message too long".into(),
        });

        assert!(state.entries.is_empty());
        assert_eq!(state.compose, draft);
        assert_eq!(state.last_error.as_deref(), Some("Message too long"));

        state.apply(ThreadAction::DismissError);
        assert!(state.last_error.is_none());
    }

    #[test]
    fn incoming_is_deduplicated_by_id() {
        let me = UserId::new();
        let peer = UserId::new();
        let conv = ConversationId::new();
        let existing = message(conv, peer, "once");
        let mut state = opened(me, conv, vec![existing.clone()]);

        let mut again = existing.clone();
        again.status = MessageStatus::Delivered;
        state.apply(ThreadAction::Incoming(again));

        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries[0].status(), MessageStatus::Delivered);
    }

    #[test]
    fn other_conversations_are_ignored() {
        let me = UserId::new();
        let conv = ConversationId::new();
        let mut state = opened(me, conv, vec![]);

        state.apply(ThreadAction::Incoming(message(
            ConversationId::new(),
            UserId::new(),
            "elsewhere",
        )));
        assert!(state.entries.is_empty());
    }

    #[test]
    fn echo_during_send_is_held_then_merged() {
        let me = UserId::new();
        let conv = ConversationId::new();
        let mut state = opened(me, conv, vec![]);

        let temp = TempId::new();
        state.apply(ThreadAction::OptimisticInsert {
            temp_id: temp.clone(),
            draft: Draft::text("mine"),
            created_at: Utc::now(),
        });

        let confirmed = message(conv, me, "mine");
        let mut echo = confirmed.clone();
        echo.status = MessageStatus::Delivered;
        state.apply(ThreadAction::SentEcho(echo));
        assert_eq!(state.entries.len(), 1);

        state.apply(ThreadAction::Confirm {
            temp_id: temp,
            message: confirmed,
        });
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.entries[0].status(), MessageStatus::Delivered);
    }

    #[test]
    fn echo_from_another_device_is_appended() {
        let me = UserId::new();
        let conv = ConversationId::new();
        let mut state = opened(me, conv, vec![]);

        let from_tab = message(conv, me, "sent from my phone");
        state.apply(ThreadAction::SentEcho(from_tab.clone()));
        state.apply(ThreadAction::SentEcho(from_tab));
        assert_eq!(texts(&state), vec!["sent from my phone"]);
    }

    #[test]
    fn echo_held_across_failed_send_is_released() {
        let me = UserId::new();
        let conv = ConversationId::new();
        let mut state = opened(me, conv, vec![]);

        let temp = TempId::new();
        state.apply(ThreadAction::OptimisticInsert {
            temp_id: temp.clone(),
            draft: Draft::text("fails"),
            created_at: Utc::now(),
        });
        state.apply(ThreadAction::SentEcho(message(conv, me, "other tab")));
        assert_eq!(texts(&state), vec!["~fails"]);

        state.apply(ThreadAction::Rollback {
            temp_id: temp,
            error: "offline".into(),
        });
        assert_eq!(texts(&state), vec!["other tab"]);
    }

    #[test]
    fn peer_read_marks_only_own_messages() {
        let me = UserId::new();
        let peer = UserId::new();
        let conv = ConversationId::new();
        let mut state = opened(
            me,
            conv,
            vec![message(conv, me, "mine"), message(conv, peer, "theirs")],
        );

        state.apply(ThreadAction::PeerRead {
            conversation_id: conv,
            reader: peer,
            at: Utc::now(),
        });

        assert_eq!(state.entries[0].status(), MessageStatus::Read);
        assert_eq!(state.entries[1].status(), MessageStatus::Sent);
        let ThreadEntry::Confirmed(mine) = &state.entries[0] else {
            panic!("expected confirmed entry");
        };
        assert_eq!(mine.read_by[0].reader_id, peer);
    }

    #[test]
    fn status_never_regresses() {
        let me = UserId::new();
        let conv = ConversationId::new();
        let mut read = message(conv, me, "done");
        read.status = MessageStatus::Read;
        let mut state = opened(me, conv, vec![read.clone()]);

        let mut stale = read;
        stale.status = MessageStatus::Delivered;
        state.apply(ThreadAction::SentEcho(stale));
        assert_eq!(state.entries[0].status(), MessageStatus::Read);
    }

    #[test]
    fn prepend_history_skips_duplicates() {
        let me = UserId::new();
        let peer = UserId::new();
        let conv = ConversationId::new();
        let boundary = message(conv, peer, "m30");
        let mut state = ThreadState::new(me);
        state.apply(ThreadAction::Open {
            conversation_id: conv,
            page: MessagePage {
                messages: vec![boundary.clone(), message(conv, peer, "m31")],
                total: 31,
                page: 1,
                pages: 2,
                has_more: true,
            },
        });

        state.apply(ThreadAction::PrependHistory {
            conversation_id: conv,
            page: MessagePage {
                messages: vec![message(conv, peer, "m1"), boundary],
                total: 31,
                page: 2,
                pages: 2,
                has_more: false,
            },
        });

        assert_eq!(texts(&state), vec!["m1", "m30", "m31"]);
        assert_eq!(state.page, 2);
        assert!(!state.has_more);
    }

    #[test]
    fn provisional_attachment_uses_local_preview() {
        let me = UserId::new();
        let conv = ConversationId::new();
        let mut state = opened(me, conv, vec![]);

        state.apply(ThreadAction::OptimisticInsert {
            temp_id: TempId::new(),
            draft: Draft {
                text: String::new(),
                file: Some(PendingFile {
                    original_name: "cat.png".into(),
                    mime_type: "image/png".into(),
                    data: vec![1, 2, 3],
                    local_preview: "blob:local/cat".into(),
                }),
            },
            created_at: Utc::now(),
        });

        let ThreadEntry::Provisional(p) = &state.entries[0] else {
            panic!("expected provisional entry");
        };
        let attachment = p.attachment.as_ref().unwrap();
        assert_eq!(attachment.url, "blob:local/cat");
        assert_eq!(attachment.kind, AttachmentKind::Image);
        assert!(p.temp_id.as_str().starts_with("opt_"));
    }

    #[tokio::test]
    async fn store_applies_actions_in_order() {
        let me = UserId::new();
        let conv = ConversationId::new();
        let store = ThreadStore::spawn(me);

        store
            .dispatch(ThreadAction::Open {
                conversation_id: conv,
                page: MessagePage {
                    messages: vec![],
                    total: 0,
                    page: 1,
                    pages: 0,
                    has_more: false,
                },
            })
            .await
            .unwrap();

        let a = store.clone();
        let b = store.clone();
        let peer = UserId::new();
        let (r1, r2) = tokio::join!(
            a.dispatch(ThreadAction::Incoming(message(conv, peer, "x"))),
            b.dispatch(ThreadAction::OptimisticInsert {
                temp_id: TempId::new(),
                draft: Draft::text("y"),
                created_at: Utc::now(),
            }),
        );
        r1.unwrap();
        r2.unwrap();

        let snapshot = store.snapshot();
        assert_eq!(snapshot.entries.len(), 2);
        assert_eq!(snapshot.in_flight(), 1);
    }
}
