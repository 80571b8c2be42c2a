pub mod api;
pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod fetch;
pub mod indexer;
pub mod logging;
pub mod operation;
pub mod sanitize;
pub mod secrets;
pub mod session;
pub mod store;

pub use api::{
    ApiError, ApiSession, HttpMailApi, HttpMailApiOptions, MailApi, MessageDetail, MessageStub,
};
pub use config::{load_config, Config};
pub use coordinator::{
    CoordinatorParts, CoordinatorSettings, IndexWatermark, IndexingCoordinator, IndexingError,
    IndexingProgress, IndexingSpeed, IndexingState, MessageOutcome, PauseReason,
};
pub use error::{ConfigError, EsIndexError, Result};
pub use fetch::{MessageDetailFetchOperation, PagedFetchOperation};
pub use indexer::{DecryptAndIndexStage, KeyCandidate, KeyRing, MessageDecryptor};
pub use logging::{init_tracing, LogFormat};
pub use operation::{Completion, Operation, OperationQueue, OperationState};
pub use secrets::{resolve_secret, resolve_secret_optional, IndexCipher, SecretError};
pub use session::IndexingSession;
pub use store::{IndexStore, SqliteIndexStore, SqliteWatermarkStore, WatermarkStore};
