//! Delivery pipeline: persist, then fan out to the recipient and echo to the
//! sender.

use tracing::{debug, info, warn};

use parley_shared::protocol::{ChatMessage, MessageEnvelope, SendMessageRequest, ServerEvent};
use parley_shared::text::prepare_body;
use parley_shared::{MessageStatus, UserId};
use parley_store::NewMessage;

use crate::error::ServerError;
use crate::service::ChatService;

impl ChatService {
    /// Accept a message from `sender`.
    ///
    /// Nothing is pushed unless the message was persisted. The returned
    /// record carries the persisted `sent` status even when the recipient
    /// was reached; the recipient and sender channels see `delivered`.
    pub fn send_message(
        &self,
        sender: UserId,
        request: SendMessageRequest,
    ) -> Result<ChatMessage, ServerError> {
        let body = prepare_body(request.text.as_deref(), request.attachment.is_some())?;

        // Pushes are queued under the database lock so two sends into the
        // same conversation reach every channel in insertion order.
        let db = self.db()?;
        let conversation = Self::conversation_for(&db, request.conversation_id, sender)?;
        let recipient = conversation
            .other_participant(sender)
            .ok_or(ServerError::AccessDenied)?;

        let new = NewMessage {
            conversation_id: conversation.id,
            sender_id: sender,
            body,
            attachment: request.attachment,
        };
        let message = db.transaction(|db| {
            let message = db.insert_message(&new)?;
            db.touch_conversation(conversation.id, message.id, message.created_at)?;
            Ok(message)
        })?;

        let persisted = ChatMessage::from(message);
        let conversation_id = persisted.conversation_id;

        let mut pushed = persisted.clone();
        pushed.status = MessageStatus::Delivered;

        let reached = self.push_to(
            recipient,
            ServerEvent::NewMessage(MessageEnvelope {
                message: pushed.clone(),
                conversation_id,
            }),
        );

        if reached {
            // Already with the recipient; list or reconnect catch-up repairs
            // the stored status.
            if let Err(e) = db.mark_delivered(persisted.id) {
                warn!(message = %persisted.id, error = %e, "Failed to record delivery");
            }
        } else {
            pushed.status = MessageStatus::Sent;
            debug!(recipient = %recipient, message = %persisted.id, "Recipient unreachable");
        }

        self.push_to(
            sender,
            ServerEvent::MessageSent(MessageEnvelope {
                message: pushed,
                conversation_id,
            }),
        );
        drop(db);

        info!(
            sender = %sender,
            conversation = %conversation_id,
            message = %persisted.id,
            delivered = reached,
            "Message accepted"
        );

        Ok(persisted)
    }
}
