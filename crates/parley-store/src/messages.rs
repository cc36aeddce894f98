use chrono::Utc;
use rusqlite::params;

use parley_shared::{Attachment, AttachmentKind, ConversationId, MessageId, MessageStatus, UserId};

use crate::database::{conversion_err, not_found, ts_from_sql, ts_to_sql, uuid_from_sql, Database};
use crate::error::{Result, StoreError};
use crate::models::{Message, NewMessage};

const MESSAGE_COLUMNS: &str = "id, conversation_id, sender_id, body, attachment_kind, \
     attachment_name, attachment_mime, attachment_size, attachment_url, status, created_at";

#[derive(Debug, thiserror::Error)]
#[error("unknown enum value: {0}")]
struct UnknownValue(String);

impl Database {
    /// Persist a new message with status `sent`.
    pub fn insert_message(&self, new: &NewMessage) -> Result<Message> {
        if new.body.is_empty() && new.attachment.is_none() {
            return Err(StoreError::Constraint(
                "message must have text or an attachment".into(),
            ));
        }

        let message = Message {
            id: MessageId::new(),
            conversation_id: new.conversation_id,
            sender_id: new.sender_id,
            body: new.body.clone(),
            attachment: new.attachment.clone(),
            status: MessageStatus::Sent,
            read_by: Vec::new(),
            created_at: Utc::now(),
        };

        let att = message.attachment.as_ref();
        self.conn().execute(
            &format!(
                "INSERT INTO messages ({MESSAGE_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
            ),
            params![
                message.id.to_string(),
                message.conversation_id.to_string(),
                message.sender_id.to_string(),
                message.body,
                att.map(|a| a.kind.as_str()),
                att.map(|a| a.original_name.as_str()),
                att.map(|a| a.mime_type.as_str()),
                att.map(|a| a.size as i64),
                att.map(|a| a.url.as_str()),
                message.status.as_str(),
                ts_to_sql(&message.created_at),
            ],
        )?;

        Ok(message)
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        let mut message = self
            .conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(not_found)?;
        message.read_by = self.reads_for_message(message.id)?;
        Ok(message)
    }

    pub fn count_messages(&self, conversation_id: ConversationId) -> Result<u64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1",
            params![conversation_id.to_string()],
            |row| row.get(0),
        )?)
    }

    /// Fetch a window of messages, newest first.
    pub fn get_messages_newest_first(
        &self,
        conversation_id: ConversationId,
        limit: u32,
        offset: u64,
    ) -> Result<Vec<Message>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE conversation_id = ?1
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?2 OFFSET ?3"
        ))?;

        let rows = stmt.query_map(
            params![conversation_id.to_string(), limit, offset as i64],
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            let mut message = row?;
            message.read_by = self.reads_for_message(message.id)?;
            messages.push(message);
        }
        Ok(messages)
    }

    /// Advance a single message from `sent` to `delivered`.
    ///
    /// Returns `false` if the message was already past `sent`; the status
    /// never moves backwards.
    pub fn mark_delivered(&self, id: MessageId) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = 'delivered' WHERE id = ?1 AND status = 'sent'",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    /// Advance every `sent` message addressed to `recipient` to `delivered`.
    ///
    /// Used when the recipient becomes reachable again. Returns the number of
    /// messages advanced.
    pub fn mark_delivered_for_recipient(&self, recipient: UserId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE messages SET status = 'delivered'
             WHERE status = 'sent'
               AND sender_id <> ?1
               AND conversation_id IN (
                   SELECT id FROM conversations
                   WHERE participant_a = ?1 OR participant_b = ?1
               )",
            params![recipient.to_string()],
        )?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id_str: String = row.get(0)?;
    let conversation_str: String = row.get(1)?;
    let sender_str: String = row.get(2)?;
    let kind: Option<String> = row.get(4)?;
    let status_str: String = row.get(9)?;
    let ts_str: String = row.get(10)?;

    let attachment = match kind {
        Some(kind) => {
            let kind = AttachmentKind::parse(&kind)
                .ok_or_else(|| conversion_err(4, UnknownValue(kind.clone())))?;
            let size: i64 = row.get(7)?;
            Some(Attachment {
                kind,
                original_name: row.get(5)?,
                mime_type: row.get(6)?,
                size: size.max(0) as u64,
                url: row.get(8)?,
            })
        }
        None => None,
    };

    let status = MessageStatus::parse(&status_str)
        .ok_or_else(|| conversion_err(9, UnknownValue(status_str.clone())))?;

    Ok(Message {
        id: MessageId(uuid_from_sql(0, &id_str)?),
        conversation_id: ConversationId(uuid_from_sql(1, &conversation_str)?),
        sender_id: UserId(uuid_from_sql(2, &sender_str)?),
        body: row.get(3)?,
        attachment,
        status,
        read_by: Vec::new(),
        created_at: ts_from_sql(10, &ts_str)?,
    })
}
