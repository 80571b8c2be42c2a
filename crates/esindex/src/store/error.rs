//! Index store error types.

use thiserror::Error;

use crate::db::DatabaseError;
use crate::secrets::SecretError;

/// Errors from reading or writing the search index.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Sealing or opening a record failed.
    #[error("Encryption error: {0}")]
    Encryption(#[from] SecretError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking write task was cancelled or panicked.
    #[error("Index task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, IndexError>;
