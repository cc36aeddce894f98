//! v001 -- Initial schema creation.
//!
//! Creates the three core tables: `users`, `conversations` and `messages`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID issued by the identity provider
    display_name TEXT NOT NULL,
    about        TEXT NOT NULL DEFAULT '',
    avatar_color TEXT NOT NULL,
    is_online    INTEGER NOT NULL DEFAULT 0,  -- boolean 0/1, written on connect/disconnect only
    last_seen    TEXT,                        -- RFC-3339, written on disconnect only
    created_at   TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Conversations (exactly two participants, stored in canonical order)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id               TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    participant_a    TEXT NOT NULL,              -- FK -> users(id), smaller id
    participant_b    TEXT NOT NULL,              -- FK -> users(id), larger id
    last_message_id  TEXT,                       -- nullable, latest message
    last_activity_at TEXT NOT NULL,
    created_at       TEXT NOT NULL,

    CHECK (participant_a < participant_b),
    UNIQUE (participant_a, participant_b),
    FOREIGN KEY (participant_a) REFERENCES users(id),
    FOREIGN KEY (participant_b) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_conversations_a ON conversations(participant_a, last_activity_at DESC);
CREATE INDEX IF NOT EXISTS idx_conversations_b ON conversations(participant_b, last_activity_at DESC);

-- ----------------------------------------------------------------
-- Messages
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              TEXT PRIMARY KEY NOT NULL,  -- UUID v4
    conversation_id TEXT NOT NULL,              -- FK -> conversations(id)
    sender_id       TEXT NOT NULL,              -- FK -> users(id)
    body            TEXT NOT NULL DEFAULT '',   -- escaped text, may be empty
    attachment_kind TEXT,                       -- image | video | document
    attachment_name TEXT,
    attachment_mime TEXT,
    attachment_size INTEGER,
    attachment_url  TEXT,
    status          TEXT NOT NULL DEFAULT 'sent'
                    CHECK (status IN ('sent', 'delivered', 'read')),
    created_at      TEXT NOT NULL,

    CHECK (body <> '' OR attachment_url IS NOT NULL),
    FOREIGN KEY (conversation_id) REFERENCES conversations(id),
    FOREIGN KEY (sender_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation_ts
    ON messages(conversation_id, created_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
