use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EsIndexError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("API error: {0}")]
    Api(#[from] crate::api::ApiError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Index error: {0}")]
    Index(#[from] crate::store::IndexError),

    #[error("Indexing error: {0}")]
    Indexing(#[from] crate::coordinator::IndexingError),

    #[error("Stage error: {0}")]
    Stage(#[from] crate::indexer::StageError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid retry policy '{name}': {reason}")]
    InvalidRetry { name: String, reason: String },

    #[error("Secret for '{name}' could not be resolved: {source}")]
    Secret {
        name: String,
        #[source]
        source: crate::secrets::SecretError,
    },
}

pub type Result<T> = std::result::Result<T, EsIndexError>;
