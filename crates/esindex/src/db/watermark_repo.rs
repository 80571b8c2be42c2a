//! Watermark repository: persistence for the `index_watermarks` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw watermark row. Timestamps are RFC 3339 strings.
#[derive(Debug, Clone, PartialEq)]
pub struct WatermarkRow {
    pub user_id: String,
    pub last_indexed_time: i64,
    pub last_indexed_message_id: Option<String>,
    pub processed_count: i64,
    pub failed_count: i64,
    pub total_messages: Option<i64>,
    pub is_complete: bool,
    pub number_of_pauses: i64,
    pub number_of_interruptions: i64,
    pub started_at: String,
    pub updated_at: String,
}

impl WatermarkRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            last_indexed_time: row.get("last_indexed_time")?,
            last_indexed_message_id: row.get("last_indexed_message_id")?,
            processed_count: row.get("processed_count")?,
            failed_count: row.get("failed_count")?,
            total_messages: row.get("total_messages")?,
            is_complete: row.get("is_complete")?,
            number_of_pauses: row.get("number_of_pauses")?,
            number_of_interruptions: row.get("number_of_interruptions")?,
            started_at: row.get("started_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

pub fn find(db: &Database, user_id: &str) -> Result<Option<WatermarkRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM index_watermarks WHERE user_id = ?1",
                params![user_id],
                WatermarkRow::from_row,
            )
            .optional()?)
    })
}

pub fn upsert(db: &Database, row: &WatermarkRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO index_watermarks (
                user_id, last_indexed_time, last_indexed_message_id, processed_count,
                failed_count, total_messages, is_complete, number_of_pauses,
                number_of_interruptions, started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(user_id) DO UPDATE SET
                last_indexed_time = excluded.last_indexed_time,
                last_indexed_message_id = excluded.last_indexed_message_id,
                processed_count = excluded.processed_count,
                failed_count = excluded.failed_count,
                total_messages = excluded.total_messages,
                is_complete = excluded.is_complete,
                number_of_pauses = excluded.number_of_pauses,
                number_of_interruptions = excluded.number_of_interruptions,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at",
            params![
                row.user_id,
                row.last_indexed_time,
                row.last_indexed_message_id,
                row.processed_count,
                row.failed_count,
                row.total_messages,
                row.is_complete,
                row.number_of_pauses,
                row.number_of_interruptions,
                row.started_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Deletes a user's watermark. Returns whether one existed.
pub fn delete(db: &Database, user_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM index_watermarks WHERE user_id = ?1",
            params![user_id],
        )?;
        Ok(deleted > 0)
    })
}
