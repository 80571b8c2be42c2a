//! Run state machine and pause reasons.

use serde::{Deserialize, Serialize};

/// State of a user's indexing run.
///
/// ```text
/// Idle ──► Running ⇄ Paused
///            ├─────► Completed ──► Partial
///            ├─────► Partial ────► Running
///            ├─────► LowStorage ─► Running
///            └─────► Failed ─────► Running
/// any ─────────────► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexingState {
    Idle,
    Running,
    Paused,
    Completed,
    /// Stopped at the storage limit; older messages are not indexed.
    Partial,
    /// Stopped because the device ran low on free space.
    LowStorage,
    Cancelled,
    Failed,
}

impl IndexingState {
    pub fn can_transition_to(self, next: IndexingState) -> bool {
        use IndexingState::*;
        match (self, next) {
            (Cancelled, _) => false,
            (_, Cancelled) => true,
            (Idle | Failed | Partial | LowStorage, Running | Paused) => true,
            (Running, Paused) => true,
            (Paused, Running) => true,
            // A pause requested during the last page still lets it finish.
            (Running | Paused, Completed | Failed | Partial | LowStorage) => true,
            // Lowering the limit shrinks a finished index.
            (Completed, Partial) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for IndexingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IndexingState::Idle => "idle",
            IndexingState::Running => "running",
            IndexingState::Paused => "paused",
            IndexingState::Completed => "completed",
            IndexingState::Partial => "partial",
            IndexingState::LowStorage => "low_storage",
            IndexingState::Cancelled => "cancelled",
            IndexingState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why indexing was paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// Explicit user request.
    User,
    LowBattery,
    NetworkUnavailable,
    Overheating,
    /// The host app moved to the background.
    Background,
}

impl PauseReason {
    pub const ALL: [PauseReason; 5] = [
        PauseReason::User,
        PauseReason::LowBattery,
        PauseReason::NetworkUnavailable,
        PauseReason::Overheating,
        PauseReason::Background,
    ];

    fn bit(self) -> u8 {
        match self {
            PauseReason::User => 1 << 0,
            PauseReason::LowBattery => 1 << 1,
            PauseReason::NetworkUnavailable => 1 << 2,
            PauseReason::Overheating => 1 << 3,
            PauseReason::Background => 1 << 4,
        }
    }

    /// Anything not requested by the user counts as an interruption.
    pub fn is_interruption(self) -> bool {
        self != PauseReason::User
    }
}

/// Set of active pause reasons. Indexing resumes only once it is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PauseReasons(u8);

impl PauseReasons {
    /// Adds a reason. Returns false if it was already present.
    pub fn insert(&mut self, reason: PauseReason) -> bool {
        let present = self.contains(reason);
        self.0 |= reason.bit();
        !present
    }

    /// Removes a reason. Returns false if it was not present.
    pub fn remove(&mut self, reason: PauseReason) -> bool {
        let present = self.contains(reason);
        self.0 &= !reason.bit();
        present
    }

    pub fn contains(&self, reason: PauseReason) -> bool {
        self.0 & reason.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn to_vec(&self) -> Vec<PauseReason> {
        PauseReason::ALL
            .into_iter()
            .filter(|r| self.contains(*r))
            .collect()
    }
}
