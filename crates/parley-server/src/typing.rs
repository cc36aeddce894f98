//! Typing relay. Signals are routed to the recipient's live channel and
//! never persisted; an unreachable recipient simply misses them.

use tracing::trace;

use parley_shared::protocol::{ServerEvent, UserTyping};
use parley_shared::{ConversationId, UserId};

use crate::service::ChatService;

impl ChatService {
    /// Returns whether the signal reached a live channel.
    pub fn notify_typing(
        &self,
        sender: UserId,
        recipient: UserId,
        conversation_id: ConversationId,
        is_typing: bool,
    ) -> bool {
        if sender == recipient {
            return false;
        }

        let delivered = self.push_to(
            recipient,
            ServerEvent::UserTyping(UserTyping {
                user_id: sender,
                conversation_id,
                is_typing,
            }),
        );

        trace!(
            sender = %sender,
            recipient = %recipient,
            conversation = %conversation_id,
            is_typing,
            delivered,
            "Typing signal"
        );

        delivered
    }
}
