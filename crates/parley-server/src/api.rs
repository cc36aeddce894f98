use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::{header, Method, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use parley_shared::constants::DEFAULT_PAGE_SIZE;
use parley_shared::protocol::{
    ConversationResponse, ConversationsResponse, DirectoryPage, MessagePage, MessageResponse,
    ReadAck, SendMessageRequest, StartConversationRequest, UploadResponse, UserResponse,
};
use parley_shared::{ConversationId, UserId};

use crate::auth::{AuthUser, TokenVerifier};
use crate::config::ServerConfig;
use crate::directory::DirectoryQuery;
use crate::error::ServerError;
use crate::service::ChatService;
use crate::upload_store::UploadStore;
use crate::ws::ws_handler;

/// Room for multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub chat: ChatService,
    pub verifier: Arc<TokenVerifier>,
    pub uploads: Arc<UploadStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers(Any);

    let body_limit = state.uploads.max_size() + MULTIPART_OVERHEAD;

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .route(
            "/conversations",
            get(list_conversations).post(start_conversation),
        )
        .route("/messages", post(send_message))
        .route("/messages/:conversation_id", get(get_messages))
        .route("/messages/:conversation_id/read", patch(mark_read))
        .route("/uploads", post(upload))
        .route("/uploads/:id", get(download))
        .route("/users", get(list_users))
        .route("/users/me", get(me))
        .route("/users/:id", get(user_profile))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance: String,
    online: usize,
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    page: Option<u32>,
    limit: Option<u32>,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance: state.config.instance_name.clone(),
        online: state.chat.registry().online_count(),
    })
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

async fn list_conversations(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<ConversationsResponse>, ServerError> {
    let conversations = state.chat.list_conversations(user.id)?;
    Ok(Json(ConversationsResponse { conversations }))
}

async fn start_conversation(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<StartConversationRequest>,
) -> Result<Json<ConversationResponse>, ServerError> {
    let conversation = state.chat.find_or_create(user.id, body.user_id)?;
    Ok(Json(ConversationResponse { conversation }))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

async fn get_messages(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<ConversationId>,
    Query(query): Query<PageQuery>,
) -> Result<Json<MessagePage>, ServerError> {
    let page = state.chat.get_messages(
        conversation_id,
        user.id,
        query.page.unwrap_or(1),
        query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
    )?;
    Ok(Json(page))
}

async fn send_message(
    State(state): State<AppState>,
    user: AuthUser,
    Json(body): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<MessageResponse>), ServerError> {
    if let Some(attachment) = &body.attachment {
        if !state.uploads.accepts(user.id, attachment).await {
            return Err(ServerError::InvalidMessage(
                "Attachment was not uploaded to this server".into(),
            ));
        }
    }

    let message = state.chat.send_message(user.id, body)?;
    Ok((StatusCode::CREATED, Json(MessageResponse { message })))
}

async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(conversation_id): Path<ConversationId>,
) -> Result<Json<ReadAck>, ServerError> {
    state.chat.mark_read(conversation_id, user.id)?;
    Ok(Json(ReadAck { success: true }))
}

// ---------------------------------------------------------------------------
// Uploads
// ---------------------------------------------------------------------------

async fn upload(
    State(state): State<AppState>,
    user: AuthUser,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ServerError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let original_name = field.file_name().unwrap_or("file").to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ServerError::BadRequest(format!("Failed to read upload: {}", e)))?;

        let attachment = state
            .uploads
            .store(user.id, &original_name, &mime_type, &data)
            .await?;
        return Ok((StatusCode::CREATED, Json(UploadResponse { attachment })));
    }

    Err(ServerError::BadRequest(
        "Missing 'file' field in multipart form".to_string(),
    ))
}

async fn download(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ServerError> {
    let stored = state.uploads.get(id).await?;
    let disposition = format!(
        "inline; filename=\"{}\"",
        stored.original_name.replace('"', "")
    );
    Ok((
        [
            (header::CONTENT_TYPE, stored.mime_type),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        stored.data,
    ))
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

async fn list_users(
    State(state): State<AppState>,
    user: AuthUser,
    Query(query): Query<DirectoryQuery>,
) -> Result<Json<DirectoryPage>, ServerError> {
    Ok(Json(state.chat.search_users(user.id, &query)?))
}

async fn me(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<UserResponse>, ServerError> {
    let profile = state.chat.profile(user.id)?;
    Ok(Json(UserResponse { user: profile }))
}

async fn user_profile(
    State(state): State<AppState>,
    _user: AuthUser,
    Path(id): Path<UserId>,
) -> Result<Json<UserResponse>, ServerError> {
    let profile = state.chat.profile(id)?;
    Ok(Json(UserResponse { user: profile }))
}

/// Bind and serve until the listener fails.
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "HTTP API listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
