use rusqlite::Connection;

const UP_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS message_reads (
    message_id TEXT NOT NULL,                 -- FK -> messages(id)
    reader_id  TEXT NOT NULL,                 -- FK -> users(id)
    read_at    TEXT NOT NULL,                 -- ISO-8601

    PRIMARY KEY (message_id, reader_id),
    FOREIGN KEY (message_id) REFERENCES messages(id) ON DELETE CASCADE,
    FOREIGN KEY (reader_id) REFERENCES users(id)
);

CREATE INDEX IF NOT EXISTS idx_message_reads_reader ON message_reads(reader_id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
