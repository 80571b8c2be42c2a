//! Searchable index records and their storage.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::api::{MessageDetail, Recipient};
use crate::db::{index_repo, Database};
use crate::secrets::IndexCipher;

use super::error::Result;

/// The searchable content of one message.
///
/// Holds decrypted text, so it is only ever persisted sealed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    pub message_id: String,
    pub conversation_id: String,
    pub time: i64,
    pub label_ids: Vec<String>,
    pub subject: String,
    pub sender: Option<Recipient>,
    pub recipients: Vec<Recipient>,
    /// Extracted plain text. `None` for metadata-only records.
    pub body: Option<String>,
    pub unread: bool,
    pub num_attachments: u32,
    pub size: u64,
    pub expiration_time: i64,
}

impl IndexRecord {
    pub fn from_detail(detail: &MessageDetail, body: Option<String>) -> Self {
        let stub = &detail.stub;
        let recipients = stub
            .to_list
            .iter()
            .chain(&stub.cc_list)
            .chain(&stub.bcc_list)
            .cloned()
            .collect();

        Self {
            message_id: stub.id.clone(),
            conversation_id: stub.conversation_id.clone(),
            time: stub.time,
            label_ids: stub.label_ids.clone(),
            subject: stub.subject.clone(),
            sender: stub.sender.clone(),
            recipients,
            body,
            unread: stub.unread,
            num_attachments: stub.num_attachments,
            size: stub.size,
            expiration_time: stub.expiration_time,
        }
    }
}

/// Storage for one user's searchable records, keyed by message ID.
///
/// Calls block; async callers run them on the blocking pool.
pub trait IndexStore: Send + Sync {
    /// Inserts or replaces the record for `record.message_id`.
    fn upsert(&self, record: &IndexRecord) -> Result<()>;

    fn get(&self, message_id: &str) -> Result<Option<IndexRecord>>;

    fn contains(&self, message_id: &str) -> Result<bool>;

    /// Returns whether a record was removed.
    fn remove(&self, message_id: &str) -> Result<bool>;

    fn count(&self) -> Result<u64>;

    /// Bytes of indexed content, as counted against the storage limit.
    fn content_size(&self) -> Result<u64>;

    /// `(time, message_id)` of the oldest record.
    fn oldest(&self) -> Result<Option<(i64, String)>>;

    /// Drops the oldest records until the content size is at most
    /// `target`. Returns how many were dropped.
    fn shrink(&self, target: u64) -> Result<usize>;

    /// Removes every record of this user.
    fn clear(&self) -> Result<()>;
}

/// [`IndexStore`] backed by the `search_index` table, sealed with AES-256-GCM.
pub struct SqliteIndexStore {
    db: Database,
    user_id: String,
    cipher: IndexCipher,
}

impl SqliteIndexStore {
    pub fn new(db: Database, user_id: impl Into<String>, cipher: IndexCipher) -> Self {
        Self {
            db,
            user_id: user_id.into(),
            cipher,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }
}

impl IndexStore for SqliteIndexStore {
    fn upsert(&self, record: &IndexRecord) -> Result<()> {
        let plaintext = serde_json::to_vec(record)?;
        let content = self.cipher.seal(&plaintext)?;

        let row = index_repo::IndexRow {
            user_id: self.user_id.clone(),
            message_id: record.message_id.clone(),
            time: record.time,
            label_ids: serde_json::to_string(&record.label_ids)?,
            content_size: plaintext.len() as i64,
            content,
            indexed_at: Utc::now().to_rfc3339(),
        };
        index_repo::upsert(&self.db, &row)?;
        Ok(())
    }

    fn get(&self, message_id: &str) -> Result<Option<IndexRecord>> {
        let Some(row) = index_repo::find(&self.db, &self.user_id, message_id)? else {
            return Ok(None);
        };
        let plaintext = self.cipher.open(&row.content)?;
        Ok(Some(serde_json::from_slice(&plaintext)?))
    }

    fn contains(&self, message_id: &str) -> Result<bool> {
        Ok(index_repo::exists(&self.db, &self.user_id, message_id)?)
    }

    fn remove(&self, message_id: &str) -> Result<bool> {
        Ok(index_repo::delete(&self.db, &self.user_id, message_id)?)
    }

    fn count(&self) -> Result<u64> {
        Ok(index_repo::count_by_user(&self.db, &self.user_id)?)
    }

    fn content_size(&self) -> Result<u64> {
        Ok(index_repo::content_size_by_user(&self.db, &self.user_id)?)
    }

    fn oldest(&self) -> Result<Option<(i64, String)>> {
        Ok(index_repo::oldest(&self.db, &self.user_id)?)
    }

    fn shrink(&self, target: u64) -> Result<usize> {
        let deleted = index_repo::shrink_to(&self.db, &self.user_id, target)?;
        log::info!("Shrunk index by {} records to fit {} bytes", deleted, target);
        Ok(deleted)
    }

    fn clear(&self) -> Result<()> {
        let deleted = index_repo::delete_by_user(&self.db, &self.user_id)?;
        log::info!("Cleared {} index records", deleted);
        Ok(())
    }
}
