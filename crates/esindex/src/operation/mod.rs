//! Asynchronous operation substrate: lifecycle state, cancellation and a
//! bounded queue.

pub mod queue;
pub mod state;

pub use queue::{Operation, OperationQueue, QueuedOperation};
pub use state::{Completion, OperationHandle, OperationState};
