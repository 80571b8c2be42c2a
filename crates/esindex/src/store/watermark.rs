//! Watermark persistence.

use chrono::{DateTime, Utc};

use crate::coordinator::IndexWatermark;
use crate::db::watermark_repo::{self, WatermarkRow};
use crate::db::{Database, DatabaseError};

/// Durable storage for per-user watermarks.
pub trait WatermarkStore: Send + Sync {
    fn load(&self, user_id: &str) -> Result<Option<IndexWatermark>, DatabaseError>;

    fn save(&self, watermark: &IndexWatermark) -> Result<(), DatabaseError>;

    /// Returns whether a watermark existed.
    fn delete(&self, user_id: &str) -> Result<bool, DatabaseError>;
}

/// [`WatermarkStore`] backed by the `index_watermarks` table.
#[derive(Clone)]
pub struct SqliteWatermarkStore {
    db: Database,
}

impl SqliteWatermarkStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl WatermarkStore for SqliteWatermarkStore {
    fn load(&self, user_id: &str) -> Result<Option<IndexWatermark>, DatabaseError> {
        watermark_repo::find(&self.db, user_id)?
            .map(from_row)
            .transpose()
    }

    fn save(&self, watermark: &IndexWatermark) -> Result<(), DatabaseError> {
        watermark_repo::upsert(&self.db, &to_row(watermark))
    }

    fn delete(&self, user_id: &str) -> Result<bool, DatabaseError> {
        watermark_repo::delete(&self.db, user_id)
    }
}

fn to_row(wm: &IndexWatermark) -> WatermarkRow {
    WatermarkRow {
        user_id: wm.user_id.clone(),
        last_indexed_time: wm.last_indexed_time,
        last_indexed_message_id: wm.last_indexed_message_id.clone(),
        processed_count: wm.processed_count as i64,
        failed_count: wm.failed_count as i64,
        total_messages: wm.total_messages.map(|t| t as i64),
        is_complete: wm.is_complete,
        number_of_pauses: i64::from(wm.number_of_pauses),
        number_of_interruptions: i64::from(wm.number_of_interruptions),
        started_at: wm.started_at.to_rfc3339(),
        updated_at: wm.updated_at.to_rfc3339(),
    }
}

fn from_row(row: WatermarkRow) -> Result<IndexWatermark, DatabaseError> {
    Ok(IndexWatermark {
        started_at: parse_timestamp(&row.started_at)?,
        updated_at: parse_timestamp(&row.updated_at)?,
        user_id: row.user_id,
        last_indexed_time: row.last_indexed_time,
        last_indexed_message_id: row.last_indexed_message_id,
        processed_count: row.processed_count.max(0) as u64,
        failed_count: row.failed_count.max(0) as u64,
        total_messages: row.total_messages.map(|t| t.max(0) as u64),
        is_complete: row.is_complete,
        number_of_pauses: row.number_of_pauses.clamp(0, i64::from(u32::MAX)) as u32,
        number_of_interruptions: row.number_of_interruptions.clamp(0, i64::from(u32::MAX)) as u32,
    })
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::CorruptRow {
            table: "index_watermarks",
            reason: format!("invalid timestamp '{}': {}", value, e),
        })
}
