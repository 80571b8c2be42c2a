//! Operation lifecycle state and the per-operation handle.

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Lifecycle of a queued operation.
///
/// `Ready -> Executing -> Finished`, or `Ready -> Finished` when the
/// operation is cancelled before it starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationState {
    Ready,
    Executing,
    Finished,
}

impl OperationState {
    pub fn can_transition_to(self, next: OperationState) -> bool {
        matches!(
            (self, next),
            (OperationState::Ready, OperationState::Executing)
                | (OperationState::Ready, OperationState::Finished)
                | (OperationState::Executing, OperationState::Finished)
        )
    }
}

/// Outcome of an operation. Failures are carried inside `T`.
#[derive(Debug, Clone, PartialEq)]
pub enum Completion<T> {
    Finished(T),
    Cancelled,
}

impl<T> Completion<T> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Completion::Cancelled)
    }

    pub fn finished(self) -> Option<T> {
        match self {
            Completion::Finished(value) => Some(value),
            Completion::Cancelled => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> Completion<U> {
        match self {
            Completion::Finished(value) => Completion::Finished(f(value)),
            Completion::Cancelled => Completion::Cancelled,
        }
    }
}

/// Shared view of a single submitted operation.
///
/// State changes go through a `watch` channel so observers can await them.
#[derive(Debug)]
pub struct OperationHandle {
    id: u64,
    name: String,
    state: watch::Sender<OperationState>,
    cancel: CancellationToken,
}

impl OperationHandle {
    pub fn new(id: u64, name: impl Into<String>, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(OperationState::Ready);
        Self {
            id,
            name: name.into(),
            state,
            cancel,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> OperationState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<OperationState> {
        self.state.subscribe()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Applies a state transition. Returns false if the transition is not
    /// allowed from the current state.
    pub fn transition(&self, next: OperationState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    /// Resolves once the operation reaches `Finished`.
    pub async fn wait_finished(&self) {
        let mut rx = self.state.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|s| *s == OperationState::Finished).await;
    }
}
