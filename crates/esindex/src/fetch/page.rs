//! Fetches one page of message stubs for a label.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info_span, warn, Instrument};

use crate::api::{ApiError, ListQuery, MailApi, MessageStub};
use crate::operation::{Completion, Operation, OperationHandle};
use crate::sanitize::hash_id;

/// Number of stubs requested per page.
pub const DEFAULT_PAGE_SIZE: u32 = 150;

pub type PageResult = Result<Vec<MessageStub>, ApiError>;

/// Lists messages older than `end_time` for one label, newest first.
///
/// A page shorter than the requested size means there is nothing older left.
/// Errors are returned as-is; retry policy belongs to the caller.
pub struct PagedFetchOperation {
    api: Arc<dyn MailApi>,
    user_id: String,
    query: ListQuery,
}

impl PagedFetchOperation {
    pub fn new(
        api: Arc<dyn MailApi>,
        user_id: impl Into<String>,
        label_id: impl Into<String>,
        end_time: Option<i64>,
        end_id: Option<String>,
        page_size: u32,
    ) -> Self {
        Self {
            api,
            user_id: user_id.into(),
            query: ListQuery {
                label_id: label_id.into(),
                end_time,
                end_id,
                page_size: page_size.max(1),
            },
        }
    }

    pub fn query(&self) -> &ListQuery {
        &self.query
    }

    pub fn page_size(&self) -> u32 {
        self.query.page_size
    }
}

#[async_trait]
impl Operation for PagedFetchOperation {
    type Output = PageResult;

    fn name(&self) -> String {
        format!("fetch-page-{}", self.query.label_id)
    }

    async fn execute(self, handle: &OperationHandle) -> Completion<PageResult> {
        if handle.is_cancelled() {
            return Completion::Cancelled;
        }

        let span = info_span!(
            "fetch.page",
            user = %hash_id(&self.user_id),
            label = %self.query.label_id,
            end_time = ?self.query.end_time,
            page_size = self.query.page_size,
        );

        async move {
            let result = tokio::select! {
                biased;
                _ = handle.cancellation_token().cancelled() => return Completion::Cancelled,
                result = self.api.list_messages(&self.query) => result,
            };

            if handle.is_cancelled() {
                return Completion::Cancelled;
            }

            match &result {
                Ok(stubs) => debug!(count = stubs.len(), "Page fetched"),
                Err(e) => {
                    warn!(code = e.code(), status = ?e.status(), error = %e, "Page fetch failed")
                }
            }
            Completion::Finished(result)
        }
        .instrument(span)
        .await
    }
}
