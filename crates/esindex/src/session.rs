//! Wires a configured [`IndexingCoordinator`] for one signed-in user.

use std::sync::Arc;

use crate::api::HttpMailApi;
use crate::config::Config;
use crate::coordinator::{CoordinatorParts, DiskSpace, IndexingCoordinator};
use crate::db::Database;
use crate::error::{ConfigError, Result};
use crate::indexer::{KeyRing, MessageDecryptor};
use crate::secrets::IndexCipher;
use crate::store::{SqliteIndexStore, SqliteWatermarkStore};

/// Everything a host needs to drive indexing for one user.
///
/// The host owns this object for the lifetime of the user's session and
/// hands out clones of the coordinator.
pub struct IndexingSession {
    database: Database,
    coordinator: IndexingCoordinator,
}

impl IndexingSession {
    /// Opens the database, resolves secrets and builds the coordinator.
    ///
    /// `disk_space` reports free space on the database volume; pass `None`
    /// if the platform offers no way to ask.
    pub fn open(
        config: &Config,
        user_id: impl Into<String>,
        decryptor: Arc<dyn MessageDecryptor>,
        keys: KeyRing,
        disk_space: Option<Arc<dyn DiskSpace>>,
    ) -> Result<Self> {
        let user_id = user_id.into();

        let db_path = config
            .database
            .resolved_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "No database path configured and no home directory found"
                    .to_string(),
            })?;
        let database = Database::open(&db_path)?;

        let key = config
            .index_key
            .resolve()
            .map_err(|source| ConfigError::Secret {
                name: "index_key".to_string(),
                source,
            })?;
        let cipher = IndexCipher::from_secret(&key)?;

        let api = HttpMailApi::new(config.api.options(), config.api.session()?)?;
        let index_store = SqliteIndexStore::new(database.clone(), user_id.clone(), cipher);

        let coordinator = IndexingCoordinator::new(
            CoordinatorParts {
                user_id,
                api: Arc::new(api),
                decryptor,
                keys: Arc::new(keys),
                index_store: Arc::new(index_store),
                watermark_store: Arc::new(SqliteWatermarkStore::new(database.clone())),
                disk_space,
            },
            config.indexing.settings(),
        );

        Ok(Self {
            database,
            coordinator,
        })
    }

    pub fn coordinator(&self) -> &IndexingCoordinator {
        &self.coordinator
    }

    pub fn database(&self) -> &Database {
        &self.database
    }
}
