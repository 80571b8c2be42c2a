//! Search index repository: CRUD operations for the `search_index` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw search index row. `content` is already sealed.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub user_id: String,
    pub message_id: String,
    pub time: i64,
    /// JSON array of label IDs.
    pub label_ids: String,
    pub content: Vec<u8>,
    pub content_size: i64,
    pub indexed_at: String,
}

impl IndexRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            user_id: row.get("user_id")?,
            message_id: row.get("message_id")?,
            time: row.get("time")?,
            label_ids: row.get("label_ids")?,
            content: row.get("content")?,
            content_size: row.get("content_size")?,
            indexed_at: row.get("indexed_at")?,
        })
    }
}

/// Inserts a row, replacing any existing row for the same message.
pub fn upsert(db: &Database, row: &IndexRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO search_index
                (user_id, message_id, time, label_ids, content, content_size, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(user_id, message_id) DO UPDATE SET
                time = excluded.time,
                label_ids = excluded.label_ids,
                content = excluded.content,
                content_size = excluded.content_size,
                indexed_at = excluded.indexed_at",
            params![
                row.user_id,
                row.message_id,
                row.time,
                row.label_ids,
                row.content,
                row.content_size,
                row.indexed_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find(
    db: &Database,
    user_id: &str,
    message_id: &str,
) -> Result<Option<IndexRow>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT * FROM search_index WHERE user_id = ?1 AND message_id = ?2",
                params![user_id, message_id],
                IndexRow::from_row,
            )
            .optional()?)
    })
}

pub fn exists(db: &Database, user_id: &str, message_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM search_index WHERE user_id = ?1 AND message_id = ?2",
            params![user_id, message_id],
            |r| r.get(0),
        )?;
        Ok(count > 0)
    })
}

/// Deletes one message. Returns whether a row was removed.
pub fn delete(db: &Database, user_id: &str, message_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let deleted = conn.execute(
            "DELETE FROM search_index WHERE user_id = ?1 AND message_id = ?2",
            params![user_id, message_id],
        )?;
        Ok(deleted > 0)
    })
}

/// Deletes every row of a user. Returns the number of rows removed.
pub fn delete_by_user(db: &Database, user_id: &str) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn.execute(
            "DELETE FROM search_index WHERE user_id = ?1",
            params![user_id],
        )?)
    })
}

pub fn count_by_user(db: &Database, user_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM search_index WHERE user_id = ?1",
            params![user_id],
            |r| r.get(0),
        )?;
        Ok(count.max(0) as u64)
    })
}

/// Sum of `content_size` over a user's rows.
pub fn content_size_by_user(db: &Database, user_id: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(content_size), 0) FROM search_index WHERE user_id = ?1",
            params![user_id],
            |r| r.get(0),
        )?;
        Ok(size.max(0) as u64)
    })
}

/// `(time, message_id)` of a user's oldest row.
pub fn oldest(db: &Database, user_id: &str) -> Result<Option<(i64, String)>, DatabaseError> {
    db.with_conn(|conn| {
        Ok(conn
            .query_row(
                "SELECT time, message_id FROM search_index WHERE user_id = ?1
                 ORDER BY time ASC, message_id ASC LIMIT 1",
                params![user_id],
                |r| Ok((r.get(0)?, r.get(1)?)),
            )
            .optional()?)
    })
}

/// Deletes a user's oldest rows until their `content_size` sums to at most
/// `target`. Returns the number of rows removed.
pub fn shrink_to(db: &Database, user_id: &str, target: u64) -> Result<usize, DatabaseError> {
    db.with_conn(|conn| {
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(content_size), 0) FROM search_index WHERE user_id = ?1",
            params![user_id],
            |r| r.get(0),
        )?;
        let mut excess = total - i64::try_from(target).unwrap_or(i64::MAX);
        if excess <= 0 {
            return Ok(0);
        }

        let mut cutoff: Option<(i64, String)> = None;
        let mut stmt = conn.prepare(
            "SELECT time, message_id, content_size FROM search_index WHERE user_id = ?1
             ORDER BY time ASC, message_id ASC",
        )?;
        let mut rows = stmt.query(params![user_id])?;
        while let Some(row) = rows.next()? {
            cutoff = Some((row.get(0)?, row.get(1)?));
            excess -= row.get::<_, i64>(2)?;
            if excess <= 0 {
                break;
            }
        }
        drop(rows);

        let Some((time, message_id)) = cutoff else {
            return Ok(0);
        };
        Ok(conn.execute(
            "DELETE FROM search_index WHERE user_id = ?1
             AND (time < ?2 OR (time = ?2 AND message_id <= ?3))",
            params![user_id, time, message_id],
        )?)
    })
}
