//! Decrypts a downloaded message and writes its searchable record.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};

use crate::api::MessageDetail;
use crate::operation::Completion;
use crate::sanitize::hash_id;
use crate::store::{IndexError, IndexRecord, IndexStore};

use super::content::extract_text;
use super::decrypt::{decrypt_with_candidates, DecryptionFailed, KeyRing, MessageDecryptor};

#[derive(Error, Debug)]
pub enum StageError {
    #[error("Message detail has not been downloaded")]
    NotDownloaded,

    #[error(transparent)]
    Decryption(#[from] DecryptionFailed),

    #[error("Index write failed: {0}")]
    Index(#[from] IndexError),
}

/// What was written for a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    /// Body decrypted and indexed with its metadata.
    Indexed,
    /// The message has no body; only metadata was indexed.
    MetadataOnly,
}

pub type StageResult = Result<StageOutcome, StageError>;

/// Turns a downloaded [`MessageDetail`] into an [`IndexRecord`].
///
/// Holds no per-message state. Plaintext lives only until the record is
/// sealed by the store.
#[derive(Clone)]
pub struct DecryptAndIndexStage {
    decryptor: Arc<dyn MessageDecryptor>,
    keys: Arc<KeyRing>,
    store: Arc<dyn IndexStore>,
}

impl DecryptAndIndexStage {
    pub fn new(
        decryptor: Arc<dyn MessageDecryptor>,
        keys: Arc<KeyRing>,
        store: Arc<dyn IndexStore>,
    ) -> Self {
        Self {
            decryptor,
            keys,
            store,
        }
    }

    /// Decrypts and indexes one message.
    ///
    /// Returns `Cancelled` without writing if `cancel` fires before the
    /// upsert.
    pub async fn process(
        &self,
        detail: MessageDetail,
        cancel: &CancellationToken,
    ) -> Completion<StageResult> {
        if cancel.is_cancelled() {
            return Completion::Cancelled;
        }
        if !detail.details_downloaded {
            return Completion::Finished(Err(StageError::NotDownloaded));
        }

        let span = info_span!("index.message", message = %hash_id(detail.id()));
        async move {
            let decryptor = self.decryptor.clone();
            let keys = self.keys.clone();
            let decrypted = tokio::task::spawn_blocking(move || {
                let body = match detail.body.as_deref() {
                    Some(ciphertext) if !ciphertext.is_empty() => {
                        let plaintext =
                            decrypt_with_candidates(decryptor.as_ref(), ciphertext, &keys)?;
                        Some(extract_text(&plaintext, detail.mime_type.as_deref()))
                    }
                    _ => None,
                };
                Ok::<_, DecryptionFailed>(IndexRecord::from_detail(&detail, body))
            })
            .await;

            let record = match decrypted {
                Ok(Ok(record)) => record,
                Ok(Err(failed)) => {
                    debug!(attempts = failed.attempts, error = %failed.first, "Decryption failed");
                    return Completion::Finished(Err(StageError::Decryption(failed)));
                }
                Err(e) => {
                    return Completion::Finished(Err(StageError::Index(IndexError::Task(
                        e.to_string(),
                    ))))
                }
            };

            self.write(record, cancel).await
        }
        .instrument(span)
        .await
    }

    /// Indexes subject, participants and labels only. Nothing is fetched
    /// or decrypted, so `detail` may be a bare listing entry.
    pub async fn index_metadata(
        &self,
        detail: &MessageDetail,
        cancel: &CancellationToken,
    ) -> Completion<StageResult> {
        let record = IndexRecord::from_detail(detail, None);
        self.write(record, cancel)
            .instrument(info_span!("index.metadata", message = %hash_id(detail.id())))
            .await
    }

    async fn write(
        &self,
        record: IndexRecord,
        cancel: &CancellationToken,
    ) -> Completion<StageResult> {
        if cancel.is_cancelled() {
            return Completion::Cancelled;
        }

        let outcome = if record.body.is_some() {
            StageOutcome::Indexed
        } else {
            StageOutcome::MetadataOnly
        };

        let store = self.store.clone();
        let written = tokio::task::spawn_blocking(move || store.upsert(&record)).await;
        match written {
            Ok(Ok(())) => {
                debug!(?outcome, "Message indexed");
                Completion::Finished(Ok(outcome))
            }
            Ok(Err(e)) => Completion::Finished(Err(StageError::Index(e))),
            Err(e) => Completion::Finished(Err(StageError::Index(IndexError::Task(
                e.to_string(),
            )))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{DetailPayload, MessageStub};
    use crate::db::Database;
    use crate::indexer::decrypt::{DecryptError, KeyCandidate};
    use crate::secrets::IndexCipher;
    use crate::store::SqliteIndexStore;
    use secrecy::SecretString;

    const KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    /// "Decrypts" bodies of the form `enc(<key_id>):<plaintext>`.
    struct PrefixDecryptor;

    impl MessageDecryptor for PrefixDecryptor {
        fn decrypt(&self, ciphertext: &str, key: &KeyCandidate) -> Result<String, DecryptError> {
            let prefix = format!("enc({}):", key.key_id);
            ciphertext
                .strip_prefix(&prefix)
                .map(str::to_string)
                .ok_or_else(|| DecryptError::KeyMismatch {
                    key_id: key.key_id.clone(),
                })
        }
    }

    fn setup() -> (DecryptAndIndexStage, Arc<SqliteIndexStore>) {
        let db = Database::open_in_memory().unwrap();
        let store = Arc::new(SqliteIndexStore::new(
            db,
            "u1",
            IndexCipher::from_hex_key(KEY).unwrap(),
        ));
        let keys = KeyRing::new(vec![
            KeyCandidate::new("old", "armored", SecretString::from("p")),
            KeyCandidate::new("primary", "armored", SecretString::from("p")),
        ]);
        let stage =
            DecryptAndIndexStage::new(Arc::new(PrefixDecryptor), Arc::new(keys), store.clone());
        (stage, store)
    }

    fn downloaded(id: &str, body: Option<&str>) -> MessageDetail {
        let stub: MessageStub =
            serde_json::from_value(serde_json::json!({"ID": id, "Time": 10, "Subject": "Hi"}))
                .unwrap();
        let mut detail = MessageDetail::from(stub.clone());
        detail.merge(DetailPayload {
            stub,
            body: body.map(str::to_string),
            header: None,
            mime_type: Some("text/html".to_string()),
        });
        detail
    }

    #[tokio::test]
    async fn test_indexes_with_second_key() {
        let (stage, store) = setup();
        let detail = downloaded("m1", Some("enc(primary):<p>Hello   there</p>"));

        let result = stage.process(detail, &CancellationToken::new()).await;
        assert!(matches!(result, Completion::Finished(Ok(StageOutcome::Indexed))));

        let record = store.get("m1").unwrap().unwrap();
        assert_eq!(record.body.as_deref(), Some("Hello there"));
    }

    #[tokio::test]
    async fn test_decryption_failure_writes_nothing() {
        let (stage, store) = setup();
        let detail = downloaded("m1", Some("enc(unknown):text"));

        let result = stage.process(detail, &CancellationToken::new()).await;
        match result {
            Completion::Finished(Err(StageError::Decryption(failed))) => {
                assert_eq!(failed.attempts, 2);
                assert_eq!(
                    failed.first,
                    DecryptError::KeyMismatch {
                        key_id: "old".to_string()
                    }
                );
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(!store.contains("m1").unwrap());
    }

    #[tokio::test]
    async fn test_missing_body_is_metadata_only() {
        let (stage, store) = setup();
        let result = stage
            .process(downloaded("m1", None), &CancellationToken::new())
            .await;
        assert!(matches!(result, Completion::Finished(Ok(StageOutcome::MetadataOnly))));
        assert!(store.get("m1").unwrap().unwrap().body.is_none());
    }

    #[tokio::test]
    async fn test_metadata_only_needs_no_download() {
        let (stage, store) = setup();
        let stub: MessageStub =
            serde_json::from_value(serde_json::json!({"ID": "m1", "Time": 10, "Subject": "Hi"}))
                .unwrap();

        let result = stage
            .index_metadata(&MessageDetail::from(stub), &CancellationToken::new())
            .await;
        assert!(matches!(result, Completion::Finished(Ok(StageOutcome::MetadataOnly))));

        let record = store.get("m1").unwrap().unwrap();
        assert_eq!(record.subject, "Hi");
        assert!(record.body.is_none());
    }

    #[tokio::test]
    async fn test_not_downloaded_is_rejected() {
        let (stage, _) = setup();
        let stub: MessageStub =
            serde_json::from_value(serde_json::json!({"ID": "m1", "Time": 10})).unwrap();
        let result = stage
            .process(MessageDetail::from(stub), &CancellationToken::new())
            .await;
        assert!(matches!(result, Completion::Finished(Err(StageError::NotDownloaded))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (stage, store) = setup();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = stage
            .process(downloaded("m1", Some("enc(primary):x")), &cancel)
            .await;
        assert!(result.is_cancelled());
        assert_eq!(store.count().unwrap(), 0);
    }
}
