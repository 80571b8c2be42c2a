//! Fetches the full detail of a single message.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info_span, Instrument};

use crate::api::{ApiError, MailApi, MessageDetail};
use crate::operation::{Completion, Operation, OperationHandle};
use crate::sanitize::hash_id;

/// A failed detail fetch. Hands the untouched record back so the caller can
/// retry without cloning.
#[derive(Error, Debug)]
#[error("Detail fetch failed: {error}")]
pub struct DetailFetchFailed {
    pub detail: MessageDetail,
    #[source]
    pub error: ApiError,
}

pub type DetailResult = Result<MessageDetail, DetailFetchFailed>;

/// Downloads the body and headers of one message.
///
/// Details that are already downloaded are returned without a request.
pub struct MessageDetailFetchOperation {
    api: Arc<dyn MailApi>,
    user_id: String,
    detail: MessageDetail,
}

impl MessageDetailFetchOperation {
    pub fn new(api: Arc<dyn MailApi>, user_id: impl Into<String>, detail: MessageDetail) -> Self {
        Self {
            api,
            user_id: user_id.into(),
            detail,
        }
    }
}

#[async_trait]
impl Operation for MessageDetailFetchOperation {
    type Output = DetailResult;

    fn name(&self) -> String {
        format!("fetch-detail-{}", hash_id(self.detail.id()))
    }

    async fn execute(self, handle: &OperationHandle) -> Completion<DetailResult> {
        if handle.is_cancelled() {
            return Completion::Cancelled;
        }

        let Self {
            api,
            user_id,
            mut detail,
        } = self;
        if detail.details_downloaded {
            return Completion::Finished(Ok(detail));
        }

        let span = info_span!(
            "fetch.detail",
            user = %hash_id(&user_id),
            message = %hash_id(detail.id()),
        );

        async move {
            let result = tokio::select! {
                biased;
                _ = handle.cancellation_token().cancelled() => return Completion::Cancelled,
                result = api.message_detail(detail.id()) => result,
            };

            // Nothing may be merged once cancelled.
            if handle.is_cancelled() {
                return Completion::Cancelled;
            }

            match result {
                Ok(payload) => {
                    detail.merge(payload);
                    debug!("Detail downloaded");
                    Completion::Finished(Ok(detail))
                }
                Err(error) => {
                    debug!(code = error.code(), status = ?error.status(), "Detail fetch failed");
                    Completion::Finished(Err(DetailFetchFailed { detail, error }))
                }
            }
        }
        .instrument(span)
        .await
    }
}
