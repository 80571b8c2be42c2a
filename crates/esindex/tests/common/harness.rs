//! Test harness wiring a coordinator to the fakes and a temporary database.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tempfile::TempDir;

use esindex::coordinator::{
    BackoffPolicy, CoordinatorParts, CoordinatorSettings, IndexWatermark, IndexingCoordinator,
    IndexingState,
};
use esindex::db::Database;
use esindex::indexer::{KeyCandidate, KeyRing};
use esindex::secrets::IndexCipher;
use esindex::store::{IndexStore, SqliteIndexStore, SqliteWatermarkStore, WatermarkStore};

use super::builders::PRIMARY_KEY;
use super::fakes::{FakeDecryptor, FakeDiskSpace, FakeMailApi, FakeMessage};

pub const USER_ID: &str = "user-1";
pub const INDEX_KEY: &str = "00112233445566778899aabbccddeeff00112233445566778899aabbccddeeff";

/// Upper bound for any single wait in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Isolated environment: a temp-dir database, a fake API and the stores.
pub struct TestHarness {
    temp_dir: TempDir,
    pub db: Database,
    pub api: Arc<FakeMailApi>,
    pub disk_space: Arc<FakeDiskSpace>,
    pub index_store: Arc<SqliteIndexStore>,
    pub watermark_store: Arc<SqliteWatermarkStore>,
}

impl TestHarness {
    pub fn new(messages: Vec<FakeMessage>) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db = Database::open(&temp_dir.path().join("esindex.db")).expect("Failed to open db");
        let cipher = IndexCipher::from_hex_key(INDEX_KEY).expect("valid key");

        Self {
            index_store: Arc::new(SqliteIndexStore::new(db.clone(), USER_ID, cipher)),
            watermark_store: Arc::new(SqliteWatermarkStore::new(db.clone())),
            api: Arc::new(FakeMailApi::new(messages)),
            disk_space: Arc::new(FakeDiskSpace::default()),
            db,
            temp_dir,
        }
    }

    /// Settings with small pages and millisecond backoff.
    pub fn settings(page_size: u32) -> CoordinatorSettings {
        CoordinatorSettings {
            page_size,
            max_concurrent: 4,
            reduced_concurrent: 1,
            page_retry: BackoffPolicy::new(3, Duration::from_millis(5), Duration::from_millis(50)),
            message_retry: BackoffPolicy::new(
                3,
                Duration::from_millis(5),
                Duration::from_millis(50),
            ),
            ..CoordinatorSettings::default()
        }
    }

    /// The key ring tries a wrong key first, then the right one.
    pub fn keys() -> KeyRing {
        KeyRing::new(vec![
            KeyCandidate::new("old", "-----BEGIN PGP-----", SecretString::from("p1")),
            KeyCandidate::new(PRIMARY_KEY, "-----BEGIN PGP-----", SecretString::from("p2")),
        ])
    }

    pub fn coordinator(&self, settings: CoordinatorSettings) -> IndexingCoordinator {
        IndexingCoordinator::new(
            CoordinatorParts {
                user_id: USER_ID.to_string(),
                api: self.api.clone(),
                decryptor: Arc::new(FakeDecryptor),
                keys: Arc::new(Self::keys()),
                index_store: self.index_store.clone(),
                watermark_store: self.watermark_store.clone(),
                disk_space: Some(self.disk_space.clone()),
            },
            settings,
        )
    }

    pub fn watermark(&self) -> Option<IndexWatermark> {
        self.watermark_store.load(USER_ID).expect("load watermark")
    }

    pub fn save_watermark(&self, watermark: &IndexWatermark) {
        self.watermark_store.save(watermark).expect("save watermark");
    }

    pub fn indexed_count(&self) -> u64 {
        self.index_store.count().expect("count")
    }

    pub fn is_indexed(&self, id: &str) -> bool {
        self.index_store.contains(id).expect("contains")
    }

    pub fn index_size(&self) -> u64 {
        self.index_store.content_size().expect("content size")
    }
}

/// Waits for the run task to exit and returns the final state.
pub async fn run_to_stop(coordinator: &IndexingCoordinator) -> IndexingState {
    tokio::time::timeout(TEST_TIMEOUT, coordinator.wait_until_stopped())
        .await
        .expect("coordinator did not stop in time")
}

/// Waits until the coordinator reaches `state`.
pub async fn wait_for_state(coordinator: &IndexingCoordinator, state: IndexingState) {
    let mut rx = coordinator.subscribe_state();
    tokio::time::timeout(TEST_TIMEOUT, rx.wait_for(|s| *s == state))
        .await
        .expect("state not reached in time")
        .expect("state channel closed");
}
