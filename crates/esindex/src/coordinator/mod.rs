//! Orchestration of a user's indexing run.

pub mod error;
pub mod progress;
pub mod retry;
pub mod runner;
pub mod state;
pub mod storage;
mod task;
pub mod watermark;

pub use error::IndexingError;
pub use progress::{
    estimate_remaining, IndexingEstimate, IndexingProgress, ProgressBroadcaster,
};
pub use retry::BackoffPolicy;
pub use runner::{
    CoordinatorParts, CoordinatorSettings, IndexMode, IndexingCoordinator, IndexingSpeed,
    ALL_MAIL_LABEL, DEFAULT_INDEX_TIMEOUT, DEFAULT_PAGE_TIMEOUT,
};
pub use state::{IndexingState, PauseReason, PauseReasons};
pub use storage::{DiskSpace, DEFAULT_LOW_STORAGE_BYTES, STORAGE_HEADROOM};
pub use task::MessageOutcome;
pub use watermark::IndexWatermark;
