//! Domain model structs persisted in the SQLite database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_shared::protocol::{ChatMessage, PublicProfile, ReadReceipt};
use parley_shared::{Attachment, ConversationId, MessageId, MessageStatus, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A known user identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub display_name: String,
    pub about: String,
    pub avatar_color: String,
    /// Written only by the connection registry on connect/disconnect.
    pub is_online: bool,
    /// Written only by the connection registry on disconnect.
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn profile(&self) -> PublicProfile {
        PublicProfile {
            id: self.id,
            display_name: self.display_name.clone(),
            about: self.about.clone(),
            avatar_color: self.avatar_color.clone(),
            is_online: self.is_online,
            last_seen: self.last_seen,
        }
    }
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

/// A two-party conversation. Participants are stored in canonical order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub participants: (UserId, UserId),
    pub last_message_id: Option<MessageId>,
    pub last_activity_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Conversation {
    pub fn has_participant(&self, user: UserId) -> bool {
        self.participants.0 == user || self.participants.1 == user
    }

    /// The participant that is not `user`, or `None` if `user` is not a member.
    pub fn other_participant(&self, user: UserId) -> Option<UserId> {
        if self.participants.0 == user {
            Some(self.participants.1)
        } else if self.participants.1 == user {
            Some(self.participants.0)
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A message ready to be inserted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    /// Already trimmed and escaped.
    pub body: String,
    pub attachment: Option<Attachment>,
}

/// A persisted message together with its read receipts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub body: String,
    pub attachment: Option<Attachment>,
    pub status: MessageStatus,
    pub read_by: Vec<ReadReceipt>,
    pub created_at: DateTime<Utc>,
}

impl From<Message> for ChatMessage {
    fn from(m: Message) -> Self {
        Self {
            id: m.id,
            conversation_id: m.conversation_id,
            sender_id: m.sender_id,
            text: m.body,
            attachment: m.attachment,
            status: m.status,
            read_by: m.read_by,
            created_at: m.created_at,
        }
    }
}
