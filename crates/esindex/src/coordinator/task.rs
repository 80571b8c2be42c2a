//! The per-message fetch → decrypt → index chain.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::api::{ApiError, MailApi, MessageDetail, MessageStub};
use crate::fetch::MessageDetailFetchOperation;
use crate::indexer::{DecryptAndIndexStage, DecryptionFailed, StageError, StageOutcome};
use crate::operation::{Completion, Operation, OperationHandle};
use crate::sanitize::hash_id;
use crate::store::IndexStore;

use super::retry::BackoffPolicy;
use super::runner::IndexMode;

/// Result of indexing one message.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageOutcome {
    Indexed,
    MetadataOnly,
    /// A record already existed; nothing was fetched.
    AlreadyIndexed,
    /// Another task was already working on this message.
    Skipped,
    FetchFailed(ApiError),
    DecryptFailed(DecryptionFailed),
    IndexFailed(String),
    /// Cut off by the page watchdog before it finished.
    TimedOut,
}

impl MessageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            MessageOutcome::Indexed | MessageOutcome::MetadataOnly | MessageOutcome::AlreadyIndexed
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            MessageOutcome::FetchFailed(_)
                | MessageOutcome::DecryptFailed(_)
                | MessageOutcome::IndexFailed(_)
                | MessageOutcome::TimedOut
        )
    }
}

/// Per-page success and failure counts.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(super) struct PageTally {
    pub processed: u64,
    pub failed: u64,
}

impl PageTally {
    pub fn record(&mut self, outcome: &MessageOutcome) {
        if outcome.is_success() {
            self.processed += 1;
        } else if outcome.is_failure() {
            self.failed += 1;
        }
    }
}

/// Shared collaborators of every message task.
pub(super) struct Pipeline {
    pub user_id: String,
    pub api: Arc<dyn MailApi>,
    pub stage: DecryptAndIndexStage,
    pub index_store: Arc<dyn IndexStore>,
    pub message_retry: BackoffPolicy,
    pub mode: IndexMode,
    pub in_flight: InFlight,
}

/// Message IDs that currently have a task.
#[derive(Default)]
pub(super) struct InFlight {
    ids: Mutex<HashSet<String>>,
}

impl InFlight {
    fn ids(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }
}

/// Releases a claimed message ID when dropped.
pub(super) struct InFlightGuard {
    pipeline: Arc<Pipeline>,
    message_id: String,
}

impl InFlightGuard {
    /// Claims `message_id`, or returns `None` if a task already holds it.
    pub fn claim(pipeline: &Arc<Pipeline>, message_id: &str) -> Option<Self> {
        if !pipeline.in_flight.ids().insert(message_id.to_string()) {
            return None;
        }
        Some(Self {
            pipeline: pipeline.clone(),
            message_id: message_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.pipeline.in_flight.ids().remove(&self.message_id);
    }
}

/// Fetches, decrypts and indexes one message, or indexes its listing
/// metadata in [`IndexMode::MetadataOnly`].
pub(super) struct IndexMessageTask {
    pipeline: Arc<Pipeline>,
    stub: MessageStub,
    guard: InFlightGuard,
}

impl IndexMessageTask {
    pub fn new(pipeline: Arc<Pipeline>, stub: MessageStub, guard: InFlightGuard) -> Self {
        Self {
            pipeline,
            stub,
            guard,
        }
    }
}

#[async_trait]
impl Operation for IndexMessageTask {
    type Output = MessageOutcome;

    fn name(&self) -> String {
        format!("index-message-{}", hash_id(&self.stub.id))
    }

    async fn execute(self, handle: &OperationHandle) -> Completion<MessageOutcome> {
        let Self {
            pipeline,
            stub,
            guard: _guard,
        } = self;

        if handle.is_cancelled() {
            return Completion::Cancelled;
        }

        let store = pipeline.index_store.clone();
        let id = stub.id.clone();
        match tokio::task::spawn_blocking(move || store.contains(&id)).await {
            Ok(Ok(true)) => return Completion::Finished(MessageOutcome::AlreadyIndexed),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => return Completion::Finished(MessageOutcome::IndexFailed(e.to_string())),
            Err(e) => return Completion::Finished(MessageOutcome::IndexFailed(e.to_string())),
        }

        if pipeline.mode == IndexMode::MetadataOnly {
            return pipeline
                .stage
                .index_metadata(&MessageDetail::from(stub), handle.cancellation_token())
                .await
                .map(|result| match result {
                    Ok(_) => MessageOutcome::MetadataOnly,
                    Err(e) => MessageOutcome::IndexFailed(e.to_string()),
                });
        }

        let detail = match pipeline.fetch_detail(MessageDetail::from(stub), handle).await {
            Completion::Cancelled => return Completion::Cancelled,
            Completion::Finished(Ok(detail)) => detail,
            Completion::Finished(Err(error)) => {
                return Completion::Finished(MessageOutcome::FetchFailed(error))
            }
        };

        pipeline
            .stage
            .process(detail, handle.cancellation_token())
            .await
            .map(|result| match result {
                Ok(StageOutcome::Indexed) => MessageOutcome::Indexed,
                Ok(StageOutcome::MetadataOnly) => MessageOutcome::MetadataOnly,
                Err(StageError::Decryption(failed)) => MessageOutcome::DecryptFailed(failed),
                Err(e) => MessageOutcome::IndexFailed(e.to_string()),
            })
    }
}

impl Pipeline {
    /// Runs the detail fetch, retrying retryable failures per `message_retry`.
    async fn fetch_detail(
        &self,
        mut detail: MessageDetail,
        handle: &OperationHandle,
    ) -> Completion<Result<MessageDetail, ApiError>> {
        let mut attempt = 0;
        loop {
            let operation =
                MessageDetailFetchOperation::new(self.api.clone(), self.user_id.clone(), detail);
            let failed = match operation.execute(handle).await {
                Completion::Cancelled => return Completion::Cancelled,
                Completion::Finished(Ok(detail)) => return Completion::Finished(Ok(detail)),
                Completion::Finished(Err(failed)) => failed,
            };

            attempt += 1;
            if !failed.error.is_retryable() || !self.message_retry.should_retry(attempt) {
                warn!(
                    message = %hash_id(failed.detail.id()),
                    attempts = attempt,
                    error = %failed.error,
                    "Giving up on message detail"
                );
                return Completion::Finished(Err(failed.error));
            }

            let delay = self.message_retry.delay(attempt, failed.error.retry_after());
            debug!(
                message = %hash_id(failed.detail.id()),
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Retrying message detail"
            );
            detail = failed.detail;

            tokio::select! {
                _ = handle.cancellation_token().cancelled() => return Completion::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
