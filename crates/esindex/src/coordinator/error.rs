use thiserror::Error;

use crate::api::ApiError;
use crate::db::DatabaseError;
use crate::store::IndexError;

use super::state::IndexingState;

#[derive(Error, Debug)]
pub enum IndexingError {
    #[error("Page fetch failed after {attempts} attempt(s): {source}")]
    PageFetch {
        attempts: u32,
        #[source]
        source: ApiError,
    },

    #[error("Watermark storage error: {0}")]
    Watermark(#[from] DatabaseError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Cannot move from {from} to {to}")]
    InvalidTransition {
        from: IndexingState,
        to: IndexingState,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

pub type Result<T> = std::result::Result<T, IndexingError>;
