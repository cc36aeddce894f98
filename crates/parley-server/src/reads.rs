//! Read synchronizer.

use tracing::info;

use parley_shared::protocol::{MessagesRead, ServerEvent};
use parley_shared::{ConversationId, UserId};

use crate::error::ServerError;
use crate::service::ChatService;

impl ChatService {
    /// Mark everything the other participant sent in `conversation_id` as
    /// read by `reader`, and tell the other participant if anything changed.
    ///
    /// Idempotent: repeating the call with nothing new returns 0 and pushes
    /// nothing.
    pub fn mark_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<usize, ServerError> {
        let (count, other) = {
            let db = self.db()?;
            let conversation = Self::conversation_for(&db, conversation_id, reader)?;
            let count = db.mark_conversation_read(conversation_id, reader)?;
            (count, conversation.other_participant(reader))
        };

        if count == 0 {
            return Ok(0);
        }

        info!(reader = %reader, conversation = %conversation_id, count, "Messages read");

        if let Some(other) = other {
            self.push_to(
                other,
                ServerEvent::MessagesRead(MessagesRead {
                    conversation_id,
                    read_by: reader,
                }),
            );
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{connect, drain, service, user};
    use parley_shared::protocol::SendMessageRequest;
    use parley_shared::MessageStatus;

    fn send(chat: &ChatService, from: UserId, conv: ConversationId, body: &str) {
        chat.send_message(
            from,
            SendMessageRequest {
                conversation_id: conv,
                text: Some(body.into()),
                attachment: None,
            },
        )
        .unwrap();
    }

    #[test]
    fn read_is_idempotent_and_notifies_once() {
        let chat = service();
        let a = user(&chat, "A");
        let b = user(&chat, "B");
        let conv = chat.find_or_create(a, b).unwrap().id;
        let mut a_rx = connect(&chat, a);

        send(&chat, a, conv, "one");
        send(&chat, a, conv, "two");
        send(&chat, b, conv, "mine");
        drain(&mut a_rx);

        assert_eq!(chat.mark_read(conv, b).unwrap(), 2);
        assert_eq!(
            drain(&mut a_rx),
            vec![ServerEvent::MessagesRead(MessagesRead {
                conversation_id: conv,
                read_by: b,
            })]
        );

        assert_eq!(chat.mark_read(conv, b).unwrap(), 0);
        assert!(drain(&mut a_rx).is_empty());

        let page = chat.get_messages(conv, b, 1, 30).unwrap();
        for message in &page.messages {
            if message.sender_id == a {
                assert_eq!(message.status, MessageStatus::Read);
                assert_eq!(message.read_by.len(), 1);
                assert_eq!(message.read_by[0].reader_id, b);
            } else {
                assert_ne!(message.status, MessageStatus::Read);
            }
        }
    }

    #[test]
    fn outsider_cannot_mark_read() {
        let chat = service();
        let a = user(&chat, "A");
        let b = user(&chat, "B");
        let c = user(&chat, "C");
        let conv = chat.find_or_create(a, b).unwrap().id;
        send(&chat, a, conv, "private");

        assert!(matches!(
            chat.mark_read(conv, c),
            Err(ServerError::AccessDenied)
        ));
        assert_eq!(chat.db().unwrap().unread_count(conv, b).unwrap(), 1);
    }

    #[test]
    fn read_status_survives_later_reconciliation() {
        let chat = service();
        let a = user(&chat, "A");
        let b = user(&chat, "B");
        let conv = chat.find_or_create(a, b).unwrap().id;
        send(&chat, a, conv, "hello");

        chat.mark_read(conv, b).unwrap();
        let _b_rx = connect(&chat, b);

        let page = chat.get_messages(conv, a, 1, 30).unwrap();
        assert_eq!(page.messages[0].status, MessageStatus::Read);
    }
}
