//! Conversation aggregator: the per-user conversation list with peer
//! profile, latest message preview and unread count.

use tracing::debug;

use parley_shared::constants::PREVIEW_LEN;
use parley_shared::protocol::{
    ConversationDto, ConversationSummary, LastMessagePreview, PublicProfile,
};
use parley_shared::text::truncate_preview;
use parley_shared::{AttachmentKind, UserId};
use parley_store::{Database, Message, StoreError};

use crate::error::ServerError;
use crate::service::ChatService;

impl ChatService {
    /// Conversations `user` takes part in, most recently active first.
    ///
    /// Fetching the list counts as the user being reachable: anything still
    /// `sent` to them is advanced to `delivered` first.
    pub fn list_conversations(&self, user: UserId) -> Result<Vec<ConversationSummary>, ServerError> {
        let db = self.db()?;

        let advanced = db.mark_delivered_for_recipient(user)?;
        if advanced > 0 {
            debug!(user = %user, advanced, "Delivered on list fetch");
        }

        let conversations = db.list_conversations_for(user)?;
        let mut summaries = Vec::with_capacity(conversations.len());

        for conversation in conversations {
            let Some(peer_id) = conversation.other_participant(user) else {
                continue;
            };
            let peer = db.get_user(peer_id)?.profile();

            let last_message = match conversation.last_message_id {
                Some(id) => match db.get_message(id) {
                    Ok(message) => Some(preview(&message)),
                    Err(StoreError::NotFound) => None,
                    Err(e) => return Err(e.into()),
                },
                None => None,
            };

            summaries.push(ConversationSummary {
                id: conversation.id,
                peer,
                last_message,
                last_activity_at: conversation.last_activity_at,
                unread_count: db.unread_count(conversation.id, user)?,
            });
        }

        Ok(summaries)
    }

    /// The conversation between `user` and `peer`, created on first use.
    pub fn find_or_create(&self, user: UserId, peer: UserId) -> Result<ConversationDto, ServerError> {
        if user == peer {
            return Err(ServerError::BadRequest(
                "cannot start a conversation with yourself".into(),
            ));
        }

        let db = self.db()?;
        if db.find_user(peer)?.is_none() {
            return Err(ServerError::NotFound("User".into()));
        }
        let conversation = db.find_or_create_conversation(user, peer)?;

        Ok(ConversationDto {
            id: conversation.id,
            participants: [
                profile_of(&db, conversation.participants.0)?,
                profile_of(&db, conversation.participants.1)?,
            ],
            last_message_id: conversation.last_message_id,
            last_activity_at: conversation.last_activity_at,
        })
    }
}

fn profile_of(db: &Database, id: UserId) -> Result<PublicProfile, ServerError> {
    Ok(db.get_user(id)?.profile())
}

fn preview(message: &Message) -> LastMessagePreview {
    // An attachment wins over any caption; documents show their file name.
    let text = match &message.attachment {
        Some(a) if a.kind == AttachmentKind::Document && !a.original_name.is_empty() => {
            truncate_preview(&a.original_name, PREVIEW_LEN)
        }
        Some(a) => a.kind.placeholder().to_string(),
        None => truncate_preview(&message.body, PREVIEW_LEN),
    };

    LastMessagePreview {
        id: message.id,
        sender_id: message.sender_id,
        preview: text,
        status: message.status,
        created_at: message.created_at,
    }
}
