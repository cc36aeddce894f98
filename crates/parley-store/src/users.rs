//! CRUD operations for [`User`] records.

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rusqlite::{params, OptionalExtension};

use parley_shared::constants::AVATAR_PALETTE;
use parley_shared::UserId;

use crate::database::{not_found, ts_from_sql, ts_to_sql, uuid_from_sql, Database};
use crate::error::Result;
use crate::models::User;

const USER_COLUMNS: &str =
    "id, display_name, about, avatar_color, is_online, last_seen, created_at";

impl Database {
    /// Insert a user on first sight, or refresh the display name.
    ///
    /// Presence columns are left untouched on update.
    pub fn upsert_user(&self, id: UserId, display_name: &str) -> Result<User> {
        let color = AVATAR_PALETTE
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(AVATAR_PALETTE[0]);

        self.conn().execute(
            "INSERT INTO users (id, display_name, avatar_color, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name",
            params![id.to_string(), display_name, color, ts_to_sql(&Utc::now())],
        )?;

        self.get_user(id)
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .map_err(not_found)
    }

    pub fn find_user(&self, id: UserId) -> Result<Option<User>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.to_string()],
                row_to_user,
            )
            .optional()?)
    }

    pub fn set_user_online(&self, id: UserId) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET is_online = 1 WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(())
    }

    pub fn set_user_offline(&self, id: UserId, last_seen: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "UPDATE users SET is_online = 0, last_seen = ?2 WHERE id = ?1",
            params![id.to_string(), ts_to_sql(&last_seen)],
        )?;
        Ok(())
    }

    /// List users other than `exclude`, online first then by name.
    ///
    /// `search` is a case-insensitive substring match on the display name.
    /// Returns the page and the total number of matches.
    pub fn search_users(
        &self,
        exclude: UserId,
        search: &str,
        limit: u32,
        offset: u32,
    ) -> Result<(Vec<User>, u64)> {
        let pattern = format!("%{}%", escape_like(search.trim()));

        let total: u64 = self.conn().query_row(
            "SELECT COUNT(*) FROM users
             WHERE id <> ?1 AND display_name LIKE ?2 ESCAPE '\\'",
            params![exclude.to_string(), pattern],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn().prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE id <> ?1 AND display_name LIKE ?2 ESCAPE '\\'
             ORDER BY is_online DESC, display_name COLLATE NOCASE ASC
             LIMIT ?3 OFFSET ?4"
        ))?;

        let rows = stmt.query_map(
            params![exclude.to_string(), pattern, limit, offset],
            row_to_user,
        )?;

        let mut users = Vec::new();
        for row in rows {
            users.push(row?);
        }
        Ok((users, total))
    }
}

fn escape_like(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let id_str: String = row.get(0)?;
    let last_seen: Option<String> = row.get(5)?;
    let created_str: String = row.get(6)?;

    Ok(User {
        id: UserId(uuid_from_sql(0, &id_str)?),
        display_name: row.get(1)?,
        about: row.get(2)?,
        avatar_color: row.get(3)?,
        is_online: row.get(4)?,
        last_seen: last_seen.map(|s| ts_from_sql(5, &s)).transpose()?,
        created_at: ts_from_sql(6, &created_str)?,
    })
}
