//! Bounded-concurrency operation queue.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, trace};

use super::state::{Completion, OperationHandle, OperationState};

/// A unit of work that can run on an [`OperationQueue`].
///
/// Implementations own their inputs and must check
/// `handle.is_cancelled()` before any side effect.
#[async_trait]
pub trait Operation: Send + 'static {
    type Output: Send + 'static;

    fn name(&self) -> String;

    async fn execute(self, handle: &OperationHandle) -> Completion<Self::Output>;
}

/// A submitted operation: its shared handle plus the task computing its result.
pub struct QueuedOperation<T> {
    handle: Arc<OperationHandle>,
    join: JoinHandle<Completion<T>>,
}

impl<T> QueuedOperation<T> {
    pub fn handle(&self) -> &Arc<OperationHandle> {
        &self.handle
    }

    /// Waits for the result. An aborted task reports `Cancelled`.
    pub async fn wait(self) -> Completion<T> {
        match self.join.await {
            Ok(completion) => completion,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Completion::Cancelled,
        }
    }
}

/// Runs operations with at most `max_concurrent` executing at a time.
///
/// Permits are handed out first-come first-served, so operations submitted
/// earlier tend to start earlier. Every operation's cancellation token is a
/// child of the queue's token, which may itself be a child of a wider token.
pub struct OperationQueue {
    name: String,
    max_concurrent: usize,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    tracker: TaskTracker,
    next_id: AtomicU64,
}

impl OperationQueue {
    pub fn new(name: impl Into<String>, max_concurrent: usize) -> Self {
        Self::with_parent(name, max_concurrent, &CancellationToken::new())
    }

    /// Creates a queue that is cancelled whenever `parent` is.
    pub fn with_parent(
        name: impl Into<String>,
        max_concurrent: usize,
        parent: &CancellationToken,
    ) -> Self {
        let max_concurrent = max_concurrent.max(1);
        Self {
            name: name.into(),
            max_concurrent,
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            cancel: parent.child_token(),
            tracker: TaskTracker::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Number of submitted operations that have not finished yet.
    pub fn pending(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Submits an operation. Must be called from within a tokio runtime.
    pub fn submit<O: Operation>(&self, operation: O) -> QueuedOperation<O::Output> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = Arc::new(OperationHandle::new(
            id,
            operation.name(),
            self.cancel.child_token(),
        ));
        trace!(queue = %self.name, id, name = handle.name(), "Operation submitted");

        let semaphore = self.semaphore.clone();
        let task_handle = handle.clone();
        let join = self.tracker.spawn(async move {
            let handle = task_handle;

            let permit = tokio::select! {
                biased;
                _ = handle.cancellation_token().cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };

            let _permit = match permit {
                Some(permit) if !handle.is_cancelled() => permit,
                _ => {
                    handle.transition(OperationState::Finished);
                    return Completion::Cancelled;
                }
            };

            handle.transition(OperationState::Executing);
            let completion = operation.execute(&handle).await;
            handle.transition(OperationState::Finished);
            completion
        });

        QueuedOperation { handle, join }
    }

    /// Cancels queued operations and signals executing ones.
    ///
    /// Operations that never started finish as `Cancelled` without running.
    pub fn cancel_all(&self) {
        debug!(queue = %self.name, pending = self.pending(), "Cancelling all operations");
        self.cancel.cancel();
    }

    /// Resolves once every submitted operation has reached `Finished`.
    pub async fn wait_until_all_finished(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

impl Drop for OperationQueue {
    fn drop(&mut self) {
        // Detached operations must not outlive their queue.
        self.cancel.cancel();
    }
}
