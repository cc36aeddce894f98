//! [`ChatBackend`] over the server's REST API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use parley_shared::protocol::{
    ChatMessage, ConversationDto, ConversationResponse, ConversationSummary,
    ConversationsResponse, MessagePage, MessageResponse, SendMessageRequest,
    StartConversationRequest, UploadResponse,
};
use parley_shared::{Attachment, ConversationId, UserId};

use crate::backend::ChatBackend;
use crate::config::ClientConfig;
use crate::error::ClientError;

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: String,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.clone(),
            token: config.token.clone(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.bearer_auth(&self.token)
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let resp = check(self.authed(builder).send().await?).await?;
        Ok(resp.json().await?)
    }
}

/// Turn a non-success response into [`ClientError::Server`] carrying the
/// server's message.
async fn check(resp: Response) -> Result<Response, ClientError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let message = match resp.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => format!("The server responded {status}"),
    };
    debug!(status = status.as_u16(), %message, "Request failed");
    Err(ClientError::Server {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn list_conversations(&self) -> Result<Vec<ConversationSummary>, ClientError> {
        let body: ConversationsResponse = self
            .send(self.client.get(self.url("/conversations")))
            .await?;
        Ok(body.conversations)
    }

    async fn start_conversation(&self, peer: UserId) -> Result<ConversationDto, ClientError> {
        let body: ConversationResponse = self
            .send(
                self.client
                    .post(self.url("/conversations"))
                    .json(&StartConversationRequest { user_id: peer }),
            )
            .await?;
        Ok(body.conversation)
    }

    async fn fetch_messages(
        &self,
        conversation_id: ConversationId,
        page: u32,
        page_size: u32,
    ) -> Result<MessagePage, ClientError> {
        self.send(
            self.client
                .get(self.url(&format!("/messages/{conversation_id}")))
                .query(&[("page", page), ("limit", page_size)]),
        )
        .await
    }

    async fn send_message(&self, request: SendMessageRequest) -> Result<ChatMessage, ClientError> {
        let body: MessageResponse = self
            .send(self.client.post(self.url("/messages")).json(&request))
            .await?;
        Ok(body.message)
    }

    async fn mark_read(&self, conversation_id: ConversationId) -> Result<(), ClientError> {
        let req = self
            .client
            .patch(self.url(&format!("/messages/{conversation_id}/read")));
        check(self.authed(req).send().await?).await?;
        Ok(())
    }

    async fn upload(
        &self,
        original_name: &str,
        mime_type: &str,
        data: Vec<u8>,
    ) -> Result<Attachment, ClientError> {
        let part = reqwest::multipart::Part::bytes(data)
            .file_name(original_name.to_string())
            .mime_str(mime_type)?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let body: UploadResponse = self
            .send(self.client.post(self.url("/uploads")).multipart(form))
            .await?;
        Ok(body.attachment)
    }
}
