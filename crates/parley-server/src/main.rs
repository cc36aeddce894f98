//! # parley-server
//!
//! Realtime core of the Parley two-party messenger.
//!
//! This binary provides:
//! - **Push channel** (WebSocket) carrying presence, typing and message events
//! - **Delivery pipeline** that persists messages before fanning them out and
//!   advances `sent` → `delivered` → `read`
//! - **Conversation list** with unread counts and **paged history**
//! - **Attachment uploads** stored on disk
//! - **REST API** (axum) for everything request/response shaped

mod aggregator;
mod api;
mod auth;
mod config;
mod delivery;
mod directory;
mod error;
mod history;
mod presence;
mod reads;
mod registry;
mod service;
mod typing;
mod upload_store;
mod ws;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use parley_store::Database;

use crate::api::AppState;
use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::registry::ConnectionRegistry;
use crate::service::ChatService;
use crate::upload_store::UploadStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.auth_issuer_pubkey == [0u8; 32] {
        warn!("AUTH_ISSUER_PUBKEY is not set; all clients will be rejected");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = Database::open_at(&config.database_path)?;
    info!(path = %config.database_path.display(), "Database ready");

    let chat = ChatService::new(db, Arc::new(ConnectionRegistry::new()));

    let uploads = Arc::new(
        UploadStore::new(config.upload_storage_path.clone(), config.max_upload_size).await?,
    );

    let verifier = Arc::new(TokenVerifier::new(config.auth_issuer_pubkey));

    let http_addr = config.http_addr;
    let app_state = AppState {
        chat,
        verifier,
        uploads,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
