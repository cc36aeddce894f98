use async_trait::async_trait;

use parley_shared::protocol::{
    ChatMessage, ConversationDto, ConversationSummary, MessagePage, SendMessageRequest,
};
use parley_shared::{Attachment, ConversationId, UserId};

use crate::error::ClientError;

/// Request/response operations the client needs from the server.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError>;

    async fn start_conversation(&self, peer: UserId) -> Result<ConversationDto, ClientError>;

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage, ClientError>;

    async fn send_message(&self, request: SendMessageRequest) -> Result<ChatMessage, ClientError>;

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), ClientError>;

    async fn upload(
        &self,
        original_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<Attachment, ClientError>;
}
