//! The persisted resume point of a user's indexing run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::api::MessageStub;

/// Per-user indexing progress.
///
/// `last_indexed_time` only moves backwards in time, except when the index
/// is shrunk to fit a storage limit and the cursor jumps to the oldest
/// record kept. Everything newer than it, down to the page that produced
/// it, has been fully processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexWatermark {
    pub user_id: String,
    /// Epoch seconds. Starts at the time the first run began.
    pub last_indexed_time: i64,
    /// ID of the oldest committed message, used to break time ties.
    pub last_indexed_message_id: Option<String>,
    pub processed_count: u64,
    pub failed_count: u64,
    pub total_messages: Option<u64>,
    pub is_complete: bool,
    pub number_of_pauses: u32,
    pub number_of_interruptions: u32,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexWatermark {
    pub fn new(user_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            last_indexed_time: now.timestamp(),
            last_indexed_message_id: None,
            processed_count: 0,
            failed_count: 0,
            total_messages: None,
            is_complete: false,
            number_of_pauses: 0,
            number_of_interruptions: 0,
            started_at: now,
            updated_at: now,
        }
    }

    /// Records a fully processed page.
    ///
    /// Moves the watermark to `min(current, oldest time in page)` and adds
    /// the page's counts. Must only be called after every message of the
    /// page has finished.
    pub fn commit_page(
        &mut self,
        page: &[MessageStub],
        processed: u64,
        failed: u64,
        now: DateTime<Utc>,
    ) {
        let oldest = page
            .iter()
            .min_by(|a, b| a.time.cmp(&b.time).then_with(|| a.id.cmp(&b.id)));

        if let Some(oldest) = oldest {
            if oldest.time <= self.last_indexed_time {
                self.last_indexed_time = oldest.time;
                self.last_indexed_message_id = Some(oldest.id.clone());
            }
        }

        self.processed_count += processed;
        self.failed_count += failed;
        self.updated_at = now;
    }

    pub fn mark_complete(&mut self, now: DateTime<Utc>) {
        self.is_complete = true;
        self.updated_at = now;
    }

    /// True while the index cannot be trusted to cover the whole mailbox.
    pub fn is_index_incomplete(&self) -> bool {
        !self.is_complete || self.failed_count > 0
    }

    /// Fraction of the estimated total processed so far, if known.
    pub fn progress_ratio(&self) -> Option<f64> {
        match self.total_messages {
            Some(0) => Some(1.0),
            Some(total) => {
                let done = (self.processed_count + self.failed_count) as f64;
                Some((done / total as f64).min(1.0))
            }
            None => None,
        }
    }
}
