//! Progress snapshots and their broadcaster.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use super::state::{IndexingState, PauseReason};
use super::watermark::IndexWatermark;

/// Indexing progress as seen by the host application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexingProgress {
    pub user_id: String,
    pub state: IndexingState,
    pub pause_reasons: Vec<PauseReason>,
    pub processed_count: u64,
    pub failed_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_messages: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_indexed_time: Option<i64>,
    /// Pages committed since the coordinator was created.
    pub pages_committed: u64,
    pub is_complete: bool,
    /// Seconds left at the current run's pace. Needs a known total and at
    /// least one message processed by this run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_remaining_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent_complete: Option<u8>,
    pub number_of_pauses: u32,
    pub number_of_interruptions: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl IndexingProgress {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            state: IndexingState::Idle,
            pause_reasons: Vec::new(),
            processed_count: 0,
            failed_count: 0,
            total_messages: None,
            last_indexed_time: None,
            pages_committed: 0,
            is_complete: false,
            estimated_remaining_secs: None,
            percent_complete: None,
            number_of_pauses: 0,
            number_of_interruptions: 0,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    /// Copies the persisted counters of a watermark.
    pub fn apply_watermark(&mut self, wm: &IndexWatermark) {
        self.processed_count = wm.processed_count;
        self.failed_count = wm.failed_count;
        self.total_messages = wm.total_messages;
        self.last_indexed_time = Some(wm.last_indexed_time);
        self.is_complete = wm.is_complete;
        self.number_of_pauses = wm.number_of_pauses;
        self.number_of_interruptions = wm.number_of_interruptions;
        self.updated_at = Utc::now();
    }

    /// True when search results may be missing messages.
    pub fn is_index_incomplete(&self) -> bool {
        !self.is_complete || self.failed_count > 0
    }

    /// Refreshes the estimate from the pace since the run started.
    pub fn apply_estimate(&mut self, processed_at_start: u64, elapsed: Duration) {
        let estimate = self.total_messages.and_then(|total| {
            estimate_remaining(total, self.processed_count, processed_at_start, elapsed)
        });
        match estimate {
            Some(estimate) => {
                self.estimated_remaining_secs = Some(estimate.remaining_secs);
                self.percent_complete = Some(estimate.percent);
            }
            None if self.is_complete => {
                self.estimated_remaining_secs = Some(0);
                self.percent_complete = Some(100);
            }
            None => {}
        }
    }
}

/// Remaining time and share done, extrapolated from a run's pace.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexingEstimate {
    pub remaining_secs: u64,
    /// Rounded up, at most 100.
    pub percent: u8,
}

/// Extrapolates the time needed for `total - processed` messages from the
/// `processed - processed_at_start` handled in `elapsed`.
///
/// Returns `None` while there is no pace to go by.
pub fn estimate_remaining(
    total: u64,
    processed: u64,
    processed_at_start: u64,
    elapsed: Duration,
) -> Option<IndexingEstimate> {
    let done_this_run = processed.checked_sub(processed_at_start)?;
    if total == 0 || done_this_run == 0 || elapsed.is_zero() {
        return None;
    }

    let remaining = total.saturating_sub(processed) as f64;
    let secs_per_message = elapsed.as_secs_f64() / done_this_run as f64;
    let percent = (processed as f64 / total as f64 * 100.0).ceil().min(100.0);

    Some(IndexingEstimate {
        remaining_secs: (secs_per_message * remaining).ceil() as u64,
        percent: percent as u8,
    })
}

/// Broadcasts progress snapshots to any number of subscribers.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    sender: Arc<broadcast::Sender<IndexingProgress>>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, progress: IndexingProgress) {
        // No subscribers is fine.
        let _ = self.sender.send(progress);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IndexingProgress> {
        self.sender.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
