//! Error types for the courier-store crate.
//!
//! Store operations return [`StoreError`]; argument checks performed before
//! anything is persisted return [`ValidationError`].

use std::io;

use thiserror::Error;

use crate::MessageId;

/// Top-level store error type.
#[derive(Debug, Error)]
pub enum StoreError {
    /// `SQLite` reported an error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O operation failed (creating the database directory).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Message not found in the store.
    #[error("Message not found: {0}")]
    NotFound(MessageId),

    /// A stored or supplied message id is not a valid ULID.
    #[error("Invalid message id: {0}")]
    InvalidId(String),

    /// A persisted record could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// The store configuration is unusable.
    #[error("Invalid store configuration: {0}")]
    Configuration(String),

    /// Internal error (blocking task failure, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Invalid arguments to `enqueue`. Nothing is persisted when these occur.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ValidationError {
    #[error("recipient must not be empty")]
    EmptyRecipient,

    #[error("message body must not be empty")]
    EmptyBody,
}

/// Specialized `Result` type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Blocking store task failed: {e}"))
    }
}
