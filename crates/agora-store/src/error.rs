use agora_shared::{ParseEnumError, ReminderStatus};
use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Failed to determine a platform data directory.
    #[error("Could not determine application data directory")]
    NoDataDir,

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A query expected exactly one row but found none.
    #[error("Record not found")]
    NotFound,

    /// Migration failure.
    #[error("Migration error: {0}")]
    Migration(String),

    /// A stored override tree could not be encoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A text column held a value outside its enum.
    #[error("Invalid value: {0}")]
    InvalidValue(#[from] ParseEnumError),

    /// Reminder status changes are one-way: pending -> done | cancelled.
    #[error("Invalid reminder transition: {from} -> {to}")]
    InvalidTransition {
        from: ReminderStatus,
        to: ReminderStatus,
    },

    /// A room link that would loop onto itself or duplicate an existing edge.
    #[error("Invalid room link: {0}")]
    InvalidLink(String),

    /// The shared handle could not be used (e.g. its lock was poisoned).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StoreError>;
