//! Client session: ties the REST backend, the push channel, the thread
//! store and the presence view together.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use parley_shared::protocol::{
    ChatMessage, ConversationDto, ConversationSummary, SendMessageRequest, ServerEvent,
};
use parley_shared::{ConversationId, UserId};

use crate::backend::ChatBackend;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::http::HttpBackend;
use crate::presence::PresenceView;
use crate::push::PushClient;
use crate::thread::{Draft, TempId, ThreadAction, ThreadStore};
use crate::typing::TypingNotifier;

#[derive(Debug, Clone, Copy)]
struct OpenThread {
    conversation_id: ConversationId,
    peer: UserId,
}

pub struct ChatSession {
    viewer: UserId,
    backend: Arc<dyn ChatBackend>,
    thread: ThreadStore,
    presence: Mutex<PresenceView>,
    typing: Option<TypingNotifier>,
    page_size: u32,
    open: Mutex<Option<OpenThread>>,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChatSession {
    /// Must be called inside a tokio runtime.
    pub fn new(viewer: UserId, backend: Arc<dyn ChatBackend>, page_size: u32) -> Self {
        Self {
            viewer,
            backend,
            thread: ThreadStore::spawn(viewer),
            presence: Mutex::new(PresenceView::new()),
            typing: None,
            page_size,
            open: Mutex::new(None),
        }
    }

    pub fn with_typing(mut self, notifier: TypingNotifier) -> Self {
        self.typing = Some(notifier);
        self
    }

    /// Connect to a server over HTTP and the push channel. Pushed events
    /// arrive on the returned receiver; feed them to [`Self::run_events`].
    pub async fn connect(
        config: &ClientConfig,
        viewer: UserId,
    ) -> Result<(Self, mpsc::Receiver<ServerEvent>), ClientError> {
        let backend = Arc::new(HttpBackend::new(config));
        let (push, events) = PushClient::connect(config).await?;
        let typing = TypingNotifier::spawn(Arc::new(push), config.typing_idle);

        let session = Self::new(viewer, backend, config.page_size).with_typing(typing);
        info!(viewer = %viewer, "Session started");
        Ok((session, events))
    }

    pub fn viewer(&self) -> UserId {
        self.viewer
    }

    pub fn thread(&self) -> &ThreadStore {
        &self.thread
    }

    pub fn presence(&self) -> PresenceView {
        locked(&self.presence).clone()
    }

    fn open_thread(&self) -> Option<OpenThread> {
        *locked(&self.open)
    }

    /// Fetch the conversation list and seed presence from it.
    pub async fn refresh_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        let conversations = self.backend.list_conversations().await?;
        locked(&self.presence).seed(&conversations);
        Ok(conversations)
    }

    pub async fn start_conversation(&self, peer: UserId) -> Result<ConversationDto, ClientError> {
        self.backend.start_conversation(peer).await
    }

    /// Show `conversation_id` from its newest page and mark it read.
    pub async fn open(&self, conversation_id: ConversationId, peer: UserId) -> Result<(), ClientError> {
        let page = self
            .backend
            .fetch_messages(conversation_id, 1, self.page_size)
            .await?;

        if let Some(typing) = &self.typing {
            typing.stop();
        }
        *locked(&self.open) = Some(OpenThread {
            conversation_id,
            peer,
        });
        self.thread
            .dispatch(ThreadAction::Open {
                conversation_id,
                page,
            })
            .await?;

        self.mark_read(conversation_id).await;
        Ok(())
    }

    pub async fn close(&self) -> Result<(), ClientError> {
        if let Some(typing) = &self.typing {
            typing.stop();
        }
        *locked(&self.open) = None;
        self.thread.dispatch(ThreadAction::Close).await
    }

    /// Load the next older page. Returns `false` when there is nothing older.
    pub async fn load_older(&self) -> Result<bool, ClientError> {
        let open = self.open_thread().ok_or(ClientError::NoConversation)?;
        let state = self.thread.snapshot();
        if !state.has_more {
            return Ok(false);
        }

        let page = self
            .backend
            .fetch_messages(open.conversation_id, state.page + 1, self.page_size)
            .await?;
        self.thread
            .dispatch(ThreadAction::PrependHistory {
                conversation_id: open.conversation_id,
                page,
            })
            .await?;
        Ok(true)
    }

    pub async fn set_compose(&self, draft: Draft) -> Result<(), ClientError> {
        self.thread.dispatch(ThreadAction::SetCompose(draft)).await
    }

    pub fn keystroke(&self) {
        if let (Some(typing), Some(open)) = (&self.typing, self.open_thread()) {
            typing.keystroke(open.conversation_id, open.peer);
        }
    }

    pub async fn dismiss_error(&self) -> Result<(), ClientError> {
        self.thread.dispatch(ThreadAction::DismissError).await
    }

    /// Optimistically show `draft`, then send it. On failure the provisional
    /// message is removed, the draft goes back into the compose box and the
    /// error is surfaced on the thread.
    pub async fn send(&self, draft: Draft) -> Result<ChatMessage, ClientError> {
        if draft.is_empty() {
            return Err(ClientError::EmptyDraft);
        }
        let open = self.open_thread().ok_or(ClientError::NoConversation)?;

        let temp_id = TempId::new();
        self.thread
            .dispatch(ThreadAction::OptimisticInsert {
                temp_id: temp_id.clone(),
                draft: draft.clone(),
                created_at: Utc::now(),
            })
            .await?;
        if let Some(typing) = &self.typing {
            typing.stop();
        }

        match self.deliver(open.conversation_id, draft).await {
            Ok(message) => {
                debug!(temp_id = temp_id.as_str(), id = %message.id, "Send confirmed");
                self.thread
                    .dispatch(ThreadAction::Confirm {
                        temp_id,
                        message: message.clone(),
                    })
                    .await?;
                Ok(message)
            }
            Err(e) => {
                warn!(temp_id = temp_id.as_str(), error = %e, "Send failed");
                self.thread
                    .dispatch(ThreadAction::Rollback {
                        temp_id,
                        error: e.user_message(),
                    })
                    .await?;
                Err(e)
            }
        }
    }

    async fn deliver(
        &self,
        conversation_id: ConversationId,
        draft: Draft,
    ) -> Result<ChatMessage, ClientError> {
        let attachment = match draft.file {
            Some(file) => Some(
                self.backend
                    .upload(&file.original_name, &file.mime_type, file.data)
                    .await?,
            ),
            None => None,
        };
        let text = draft.text.trim();

        self.backend
            .send_message(SendMessageRequest {
                conversation_id,
                text: (!text.is_empty()).then(|| text.to_string()),
                attachment,
            })
            .await
    }

    async fn mark_read(&self, conversation_id: ConversationId) {
        if let Err(e) = self.backend.mark_read(conversation_id).await {
            warn!(conversation = %conversation_id, error = %e, "Failed to mark read");
        }
    }

    /// Apply one pushed event.
    pub async fn handle_event(&self, event: ServerEvent) -> Result<(), ClientError> {
        locked(&self.presence).apply(&event);

        match event {
            ServerEvent::NewMessage(envelope) => {
                let message = envelope.message;
                let viewing = self
                    .open_thread()
                    .is_some_and(|o| o.conversation_id == message.conversation_id);
                let from_peer = message.sender_id != self.viewer;
                let conversation_id = message.conversation_id;

                self.thread.dispatch(ThreadAction::Incoming(message)).await?;
                if viewing && from_peer {
                    self.mark_read(conversation_id).await;
                }
            }
            ServerEvent::MessageSent(envelope) => {
                self.thread
                    .dispatch(ThreadAction::SentEcho(envelope.message))
                    .await?;
            }
            ServerEvent::MessagesRead(read) => {
                self.thread
                    .dispatch(ThreadAction::PeerRead {
                        conversation_id: read.conversation_id,
                        reader: read.read_by,
                        at: Utc::now(),
                    })
                    .await?;
            }
            ServerEvent::UserOnline(_) | ServerEvent::UserOffline(_) | ServerEvent::UserTyping(_) => {}
        }
        Ok(())
    }

    /// Apply pushed events until the channel closes.
    pub async fn run_events(&self, mut events: mpsc::Receiver<ServerEvent>) {
        while let Some(event) = events.recv().await {
            let name = event.name();
            match self.handle_event(event).await {
                Ok(()) => {}
                Err(ClientError::Closed) => break,
                Err(e) => warn!(event = name, error = %e, "Failed to apply event"),
            }
        }
        debug!("Event stream ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::Notify;

    use parley_shared::protocol::{MessageEnvelope, MessagePage, MessagesRead, UserOnline};
    use parley_shared::{Attachment, AttachmentKind, MessageId, MessageStatus};

    use crate::thread::{PendingFile, ThreadEntry};

    #[derive(Default)]
    struct FakeBackend {
        history: Mutex<Vec<ChatMessage>>,
        sent: Mutex<Vec<SendMessageRequest>>,
        reads: Mutex<Vec<ConversationId>>,
        uploads: Mutex<Vec<String>>,
        fail_with: Mutex<Option<String>>,
        gate: Option<Arc<Notify>>,
        sender: Mutex<Option<UserId>>,
    }

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

    #[async_trait]
    impl ChatBackend for FakeBackend {
        async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
            Ok(Vec::new())
        }

        async fn start_conversation(&self, _peer: UserId) -> Result<ConversationDto, ClientError> {
            Err(ClientError::Closed)
        }

        async fn fetch_messages(
            &self,
            _conversation_id: ConversationId,
            page: u32,
            page_size: u32,
        ) -> Result<MessagePage, ClientError> {
            let history = self.history.lock().unwrap();
            let total = history.len() as u64;
            let end = history.len().saturating_sub(((page - 1) * page_size) as usize);
            let start = end.saturating_sub(page_size as usize);
            let pages = (total as u32).div_ceil(page_size);
            Ok(MessagePage {
                messages: history[start..end].to_vec(),
                total,
                page,
                pages,
                has_more: (page as u64) * (page_size as u64) < total,
            })
        }

        async fn send_message(
            &self,
            request: SendMessageRequest,
        ) -> Result<ChatMessage, ClientError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.sent.lock().unwrap().push(request.clone());
            if let Some(message) = self.fail_with.lock().unwrap().clone() {
                return Err(ClientError::Server {
                    status: 400,
                    message,
                });
            }
            let sender = self.sender.lock().unwrap().unwrap_or_default();
            let mut m = message(
                request.conversation_id,
                sender,
                request.text.as_deref().unwrap_or_default(),
            );
            m.attachment = request.attachment;
            Ok(m)
        }

        async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), ClientError> {
            self.reads.lock().unwrap().push(conversation_id);
            Ok(())
        }

        async fn upload(
            &self,
            original_name: &str,
            mime_type: &str,
            data: Vec<u8>,
        ) -> Result<Attachment, ClientError> {
            self.uploads.lock().unwrap().push(original_name.to_string());
            Ok(Attachment {
                kind: AttachmentKind::from_mime(mime_type),
                original_name: original_name.to_string(),
                mime_type: mime_type.to_string(),
                size: data.len() as u64,
                url: "/uploads/abc".to_string(),
            })
        }
    }

    struct Fixture {
        me: UserId,
        peer: UserId,
        conv: ConversationId,
        backend: Arc<FakeBackend>,
        session: Arc<ChatSession>,
    }

    async fn setup(backend: FakeBackend) -> Fixture {
        let me = UserId::new();
        let peer = UserId::new();
        let conv = ConversationId::new();
        *backend.sender.lock().unwrap() = Some(me);
        let backend = Arc::new(backend);
        let session = Arc::new(ChatSession::new(me, backend.clone(), 30));
        session.open(conv, peer).await.unwrap();
        Fixture {
            me,
            peer,
            conv,
            backend,
            session,
        }
    }

    fn texts(session: &ChatSession) -> Vec<String> {
        session
            .thread()
            .snapshot()
            .entries
            .iter()
            .map(|e| match e {
                ThreadEntry::Provisional(p) => format!("~{}", p.text),
                ThreadEntry::Confirmed(m) => m.text.clone(),
            })
            .collect()
    }

    #[tokio::test]
    async fn open_loads_newest_page_and_marks_read() {
        let backend = FakeBackend::default();
        let conv_for_history = ConversationId::new();
        {
            let mut history = backend.history.lock().unwrap();
            for i in 1..=45 {
                history.push(message(conv_for_history, UserId::new(), &format!("m{i}")));
            }
        }
        let me = UserId::new();
        let backend = Arc::new(backend);
        let session = ChatSession::new(me, backend.clone(), 30);

        session.open(conv_for_history, UserId::new()).await.unwrap();
        let state = session.thread().snapshot();
        assert_eq!(state.entries.len(), 30);
        assert!(state.has_more);
        assert_eq!(texts(&session).first().map(String::as_str), Some("m16"));
        assert_eq!(*backend.reads.lock().unwrap(), vec![conv_for_history]);

        assert!(session.load_older().await.unwrap());
        assert_eq!(texts(&session).len(), 45);
        assert_eq!(texts(&session)[0], "m1");
        assert!(!session.load_older().await.unwrap());
    }

    #[tokio::test]
    async fn successful_send_confirms_in_place() {
        let f = setup(FakeBackend::default()).await;

        let sent = f.session.send(Draft::text("  hello ")).await.unwrap();
        assert_eq!(sent.text, "hello");

        let state = f.session.thread().snapshot();
        assert_eq!(state.in_flight(), 0);
        assert_eq!(state.entries.len(), 1);
        assert_eq!(state.find(sent.id).map(|m| m.sender_id), Some(f.me));
        assert_eq!(f.backend.sent.lock().unwrap()[0].text.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn failed_send_rolls_back_and_restores_compose() {
        let backend = FakeBackend::default();
        *backend.fail_with.lock().unwrap() = Some("Message text is too long".to_string());
        let f = setup(backend).await;

        let err = f.session.send(Draft::text("draft")).await.unwrap_err();
        assert!(matches!(err, ClientError::Server { status: 400, .. }));

        let state = f.session.thread().snapshot();
        assert!(state.entries.is_empty());
        assert_eq!(state.compose.text, "draft");
        assert_eq!(state.last_error.as_deref(), Some("Message text is too long"));

        f.session.dismiss_error().await.unwrap();
        assert!(f.session.thread().snapshot().last_error.is_none());
    }

    #[tokio::test]
    async fn empty_draft_and_closed_thread_are_rejected() {
        let f = setup(FakeBackend::default()).await;
        assert!(matches!(
            f.session.send(Draft::text("   ")).await,
            Err(ClientError::EmptyDraft)
        ));

        f.session.close().await.unwrap();
        assert!(matches!(
            f.session.send(Draft::text("hi")).await,
            Err(ClientError::NoConversation)
        ));
        assert!(f.backend.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn attachment_is_uploaded_before_send() {
        let f = setup(FakeBackend::default()).await;
        let draft = Draft {
            text: String::new(),
            file: Some(PendingFile {
                original_name: "cat.png".to_string(),
                mime_type: "image/png".to_string(),
                data: vec![1, 2, 3],
                local_preview: "blob:local/1".to_string(),
            }),
        };

        let sent = f.session.send(draft).await.unwrap();
        assert_eq!(*f.backend.uploads.lock().unwrap(), vec!["cat.png".to_string()]);
        let request = f.backend.sent.lock().unwrap()[0].clone();
        assert_eq!(request.text, None);
        assert_eq!(
            request.attachment.map(|a| a.url),
            Some("/uploads/abc".to_string())
        );
        assert_eq!(sent.attachment.map(|a| a.kind), Some(AttachmentKind::Image));
    }

    #[tokio::test]
    async fn concurrent_incoming_is_not_taken_for_the_echo() {
        let gate = Arc::new(Notify::new());
        let f = setup(FakeBackend {
            gate: Some(gate.clone()),
            ..FakeBackend::default()
        })
        .await;

        let session = f.session.clone();
        let sending = tokio::spawn(async move { session.send(Draft::text("same")).await });

        // Wait for the provisional entry.
        let mut watch = f.session.thread().subscribe();
        watch.wait_for(|s| s.in_flight() == 1).await.unwrap();

        let from_peer = message(f.conv, f.peer, "same");
        f.session
            .handle_event(ServerEvent::NewMessage(MessageEnvelope {
                conversation_id: f.conv,
                message: from_peer.clone(),
            }))
            .await
            .unwrap();
        assert_eq!(texts(&f.session), vec!["~same", "same"]);

        gate.notify_one();
        let mine = sending.await.unwrap().unwrap();

        let state = f.session.thread().snapshot();
        assert_eq!(state.in_flight(), 0);
        assert_eq!(state.entries.len(), 2);
        assert_eq!(state.entries[0].server_id(), Some(mine.id));
        assert_eq!(state.entries[1].server_id(), Some(from_peer.id));

        // The echo of our own send arriving late changes nothing.
        f.session
            .handle_event(ServerEvent::MessageSent(MessageEnvelope {
                conversation_id: f.conv,
                message: mine,
            }))
            .await
            .unwrap();
        assert_eq!(f.session.thread().snapshot().entries.len(), 2);
    }

    #[tokio::test]
    async fn incoming_in_open_thread_is_marked_read() {
        let f = setup(FakeBackend::default()).await;
        f.backend.reads.lock().unwrap().clear();

        let incoming = message(f.conv, f.peer, "yo");
        f.session
            .handle_event(ServerEvent::NewMessage(MessageEnvelope {
                conversation_id: f.conv,
                message: incoming,
            }))
            .await
            .unwrap();
        assert_eq!(*f.backend.reads.lock().unwrap(), vec![f.conv]);

        // Messages for other conversations are neither shown nor marked.
        let elsewhere = ConversationId::new();
        f.session
            .handle_event(ServerEvent::NewMessage(MessageEnvelope {
                conversation_id: elsewhere,
                message: message(elsewhere, f.peer, "psst"),
            }))
            .await
            .unwrap();
        assert_eq!(f.backend.reads.lock().unwrap().len(), 1);
        assert_eq!(texts(&f.session), vec!["yo"]);
    }

    #[tokio::test]
    async fn peer_read_and_presence_are_applied() {
        let f = setup(FakeBackend::default()).await;
        let sent = f.session.send(Draft::text("seen?")).await.unwrap();

        let (tx, rx) = mpsc::channel(8);
        tx.send(ServerEvent::UserOnline(UserOnline { user_id: f.peer }))
            .await
            .unwrap();
        tx.send(ServerEvent::MessagesRead(MessagesRead {
            conversation_id: f.conv,
            read_by: f.peer,
        }))
        .await
        .unwrap();
        drop(tx);
        f.session.run_events(rx).await;

        assert!(f.session.presence().is_online(f.peer));
        let state = f.session.thread().snapshot();
        let m = state.find(sent.id).unwrap();
        assert_eq!(m.status, MessageStatus::Read);
        assert_eq!(m.read_by[0].reader_id, f.peer);
    }
}
