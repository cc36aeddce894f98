//! CRUD operations for [`Conversation`] records.

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use parley_shared::{canonical_pair, ConversationId, MessageId, UserId};

use crate::database::{not_found, ts_from_sql, ts_to_sql, uuid_from_sql, Database};
use crate::error::{Result, StoreError};
use crate::models::Conversation;

const CONVERSATION_COLUMNS: &str =
    "id, participant_a, participant_b, last_message_id, last_activity_at, created_at";

impl Database {
    // ------------------------------------------------------------------
    // Create
    // ------------------------------------------------------------------

    /// Return the conversation between two users, creating it on first contact.
    ///
    /// The pair is canonicalised before lookup, so argument order does not
    /// matter. Both users must exist.
    pub fn find_or_create_conversation(&self, a: UserId, b: UserId) -> Result<Conversation> {
        if a == b {
            return Err(StoreError::Constraint(
                "a conversation needs two distinct participants".into(),
            ));
        }

        for user in [a, b] {
            if self.find_user(user)?.is_none() {
                return Err(StoreError::NotFound);
            }
        }

        let (first, second) = canonical_pair(a, b);
        let now = ts_to_sql(&Utc::now());

        // The UNIQUE(participant_a, participant_b) constraint makes concurrent
        // first contacts collapse onto a single row.
        let inserted = self.conn().execute(
            "INSERT OR IGNORE INTO conversations
                 (id, participant_a, participant_b, last_message_id, last_activity_at, created_at)
             VALUES (?1, ?2, ?3, NULL, ?4, ?4)",
            params![
                ConversationId::new().to_string(),
                first.to_string(),
                second.to_string(),
                now,
            ],
        )?;

        if inserted > 0 {
            tracing::debug!(a = %first, b = %second, "created conversation");
        }

        self.conn()
            .query_row(
                &format!(
                    "SELECT {CONVERSATION_COLUMNS} FROM conversations
                     WHERE participant_a = ?1 AND participant_b = ?2"
                ),
                params![first.to_string(), second.to_string()],
                row_to_conversation,
            )
            .map_err(not_found)
    }

    // ------------------------------------------------------------------
    // Read
    // ------------------------------------------------------------------

    pub fn get_conversation(&self, id: ConversationId) -> Result<Conversation> {
        self.find_conversation(id)?.ok_or(StoreError::NotFound)
    }

    pub fn find_conversation(&self, id: ConversationId) -> Result<Option<Conversation>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = ?1"),
                params![id.to_string()],
                row_to_conversation,
            )
            .optional()?)
    }

    /// All conversations `user` takes part in, most recent activity first.
    pub fn list_conversations_for(&self, user: UserId) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations
             WHERE participant_a = ?1 OR participant_b = ?1
             ORDER BY last_activity_at DESC, rowid DESC"
        ))?;

        let rows = stmt.query_map(params![user.to_string()], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    // ------------------------------------------------------------------
    // Update
    // ------------------------------------------------------------------

    /// Point the conversation at its newest message.
    pub fn touch_conversation(
        &self,
        id: ConversationId,
        last_message_id: MessageId,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE conversations SET last_message_id = ?2, last_activity_at = ?3 WHERE id = ?1",
            params![id.to_string(), last_message_id.to_string(), ts_to_sql(&at)],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let id_str: String = row.get(0)?;
    let a_str: String = row.get(1)?;
    let b_str: String = row.get(2)?;
    let last_message: Option<String> = row.get(3)?;
    let activity_str: String = row.get(4)?;
    let created_str: String = row.get(5)?;

    Ok(Conversation {
        id: ConversationId(uuid_from_sql(0, &id_str)?),
        participants: (
            UserId(uuid_from_sql(1, &a_str)?),
            UserId(uuid_from_sql(2, &b_str)?),
        ),
        last_message_id: last_message
            .map(|s| uuid_from_sql(3, &s).map(MessageId))
            .transpose()?,
        last_activity_at: ts_from_sql(4, &activity_str)?,
        created_at: ts_from_sql(5, &created_str)?,
    })
}
