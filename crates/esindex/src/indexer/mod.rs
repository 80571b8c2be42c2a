//! Local decryption and indexing of downloaded messages.

pub mod content;
pub mod decrypt;
pub mod stage;

pub use content::extract_text;
pub use decrypt::{
    decrypt_with_candidates, DecryptError, DecryptionFailed, KeyCandidate, KeyRing,
    MessageDecryptor,
};
pub use stage::{DecryptAndIndexStage, StageError, StageOutcome, StageResult};
