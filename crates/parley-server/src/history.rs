//! History paginator.
//!
//! Pages are counted from the newest message backwards and each page is
//! returned oldest first. Offsets are recomputed per request, so a page
//! fetched after new messages arrive can overlap the previous one.

use tracing::debug;

use parley_shared::constants::MAX_PAGE_SIZE;
use parley_shared::protocol::{ChatMessage, MessagePage};
use parley_shared::{ConversationId, UserId};

use crate::error::ServerError;
use crate::service::ChatService;

impl ChatService {
    pub fn get_messages(
        &self,
        conversation_id: ConversationId,
        user: UserId,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage, ServerError> {
        if page == 0 {
            return Err(ServerError::BadRequest("page starts at 1".into()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ServerError::BadRequest(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let (mut messages, total) = {
            let db = self.db()?;
            Self::conversation_for(&db, conversation_id, user)?;
            let total = db.count_messages(conversation_id)?;
            let offset = u64::from(page - 1) * u64::from(page_size);
            let window = db.get_messages_newest_first(conversation_id, page_size, offset)?;
            (window, total)
        };
        messages.reverse();

        let size = u64::from(page_size);
        let pages = total.div_ceil(size) as u32;
        let has_more = u64::from(page) * size < total;

        debug!(
            user = %user,
            conversation = %conversation_id,
            page,
            returned = messages.len(),
            total,
            "History page"
        );

        Ok(MessagePage {
            messages: messages.into_iter().map(ChatMessage::from).collect(),
            total,
            page,
            pages,
            has_more,
        })
    }
}
