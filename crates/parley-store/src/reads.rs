//! Read receipts and unread counts.

use chrono::{DateTime, Utc};
use rusqlite::params;

use parley_shared::protocol::ReadReceipt;
use parley_shared::{ConversationId, MessageId, UserId};

use crate::database::{ts_from_sql, ts_to_sql, uuid_from_sql, Database};
use crate::error::Result;

impl Database {
    /// Mark every message in the conversation that `reader` did not author and
    /// has not yet read as read by `reader`.
    ///
    /// Runs as one transaction. Returns the number of messages newly marked;
    /// a second call with no new messages in between returns 0.
    pub fn mark_conversation_read(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
    ) -> Result<usize> {
        self.mark_conversation_read_at(conversation_id, reader, Utc::now())
    }

    pub fn mark_conversation_read_at(
        &self,
        conversation_id: ConversationId,
        reader: UserId,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let tx = self.conn().unchecked_transaction()?;

        let inserted = tx.execute(
            "INSERT INTO message_reads (message_id, reader_id, read_at)
             SELECT m.id, ?2, ?3 FROM messages m
             WHERE m.conversation_id = ?1
               AND m.sender_id <> ?2
               AND NOT EXISTS (
                   SELECT 1 FROM message_reads r
                   WHERE r.message_id = m.id AND r.reader_id = ?2
               )",
            params![conversation_id.to_string(), reader.to_string(), ts_to_sql(&at)],
        )?;

        tx.execute(
            "UPDATE messages SET status = 'read'
             WHERE conversation_id = ?1
               AND sender_id <> ?2
               AND status <> 'read'
               AND EXISTS (
                   SELECT 1 FROM message_reads r
                   WHERE r.message_id = messages.id AND r.reader_id = ?2
               )",
            params![conversation_id.to_string(), reader.to_string()],
        )?;

        tx.commit()?;
        Ok(inserted)
    }

    /// Messages authored by the other participant that `viewer` has not read.
    pub fn unread_count(&self, conversation_id: ConversationId, viewer: UserId) -> Result<u64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM messages m
             WHERE m.conversation_id = ?1
               AND m.sender_id <> ?2
               AND NOT EXISTS (
                   SELECT 1 FROM message_reads r
                   WHERE r.message_id = m.id AND r.reader_id = ?2
               )",
            params![conversation_id.to_string(), viewer.to_string()],
            |row| row.get(0),
        )?)
    }

    pub fn reads_for_message(&self, message_id: MessageId) -> Result<Vec<ReadReceipt>> {
        let mut stmt = self.conn().prepare(
            "SELECT reader_id, read_at FROM message_reads
             WHERE message_id = ?1 ORDER BY read_at ASC",
        )?;

        let rows = stmt.query_map(params![message_id.to_string()], |row| {
            let reader: String = row.get(0)?;
            let read_at: String = row.get(1)?;
            Ok(ReadReceipt {
                reader_id: UserId(uuid_from_sql(0, &reader)?),
                read_at: ts_from_sql(1, &read_at)?,
            })
        })?;

        let mut receipts = Vec::new();
        for row in rows {
            receipts.push(row?);
        }
        Ok(receipts)
    }
}
