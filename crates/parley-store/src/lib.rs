//! # parley-store
//!
//! Durable storage for Parley, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for users,
//! conversations, messages and read receipts. Callers that share a handle
//! across tasks wrap it in a mutex; every helper completes its write before
//! returning.

pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod reads;
pub mod users;

mod error;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
