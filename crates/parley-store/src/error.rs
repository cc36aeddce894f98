use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Creating the directory that holds the database file failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// No user, conversation or message with the requested id.
    #[error("Record not found")]
    NotFound,

    /// Rejected write, e.g. a conversation with oneself or an empty message.
    #[error("Constraint violated: {0}")]
    Constraint(String),

    #[error("Migration error: {0}")]
    Migration(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
