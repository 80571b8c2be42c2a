//! Key candidates and multi-key decryption.

use secrecy::SecretString;
use thiserror::Error;

/// Failure of a single decryption attempt.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecryptError {
    #[error("Wrong passphrase for key {key_id}")]
    BadPassphrase { key_id: String },

    #[error("Message is not encrypted to key {key_id}")]
    KeyMismatch { key_id: String },

    #[error("Malformed ciphertext: {0}")]
    Malformed(String),

    #[error("No key candidates available")]
    NoCandidates,

    #[error("Decryption failed: {0}")]
    Other(String),
}

/// Every candidate failed. Keeps the first underlying error.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Decryption failed after {attempts} attempt(s): {first}")]
pub struct DecryptionFailed {
    pub first: DecryptError,
    pub attempts: usize,
}

/// One private key that may decrypt a message.
#[derive(Debug)]
pub struct KeyCandidate {
    pub key_id: String,
    pub armored_key: String,
    pub passphrase: SecretString,
}

impl KeyCandidate {
    pub fn new(
        key_id: impl Into<String>,
        armored_key: impl Into<String>,
        passphrase: SecretString,
    ) -> Self {
        Self {
            key_id: key_id.into(),
            armored_key: armored_key.into(),
            passphrase,
        }
    }
}

/// Ordered key candidates for a user. Primary key first.
#[derive(Debug, Default)]
pub struct KeyRing {
    candidates: Vec<KeyCandidate>,
}

impl KeyRing {
    pub fn new(candidates: Vec<KeyCandidate>) -> Self {
        Self { candidates }
    }

    pub fn push(&mut self, candidate: KeyCandidate) {
        self.candidates.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &KeyCandidate> {
        self.candidates.iter()
    }
}

/// The OpenPGP capability the stage relies on.
///
/// Implementations are provided by the host; nothing here knows the
/// primitives behind it.
pub trait MessageDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str, key: &KeyCandidate) -> Result<String, DecryptError>;
}

/// Tries each candidate in order and returns the first plaintext.
pub fn decrypt_with_candidates(
    decryptor: &dyn MessageDecryptor,
    ciphertext: &str,
    keys: &KeyRing,
) -> Result<String, DecryptionFailed> {
    let mut first = None;
    let mut attempts = 0;

    for key in keys.iter() {
        attempts += 1;
        match decryptor.decrypt(ciphertext, key) {
            Ok(plaintext) => return Ok(plaintext),
            Err(e) => {
                first.get_or_insert(e);
            }
        }
    }

    Err(DecryptionFailed {
        first: first.unwrap_or(DecryptError::NoCandidates),
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Succeeds only for `good_key`; fails with a key-specific error otherwise.
    struct OnlyKey {
        good_key: &'static str,
        calls: AtomicUsize,
    }

    impl MessageDecryptor for OnlyKey {
        fn decrypt(&self, ciphertext: &str, key: &KeyCandidate) -> Result<String, DecryptError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if key.key_id == self.good_key {
                Ok(format!("plain:{}", ciphertext))
            } else if key.key_id == "k1" {
                Err(DecryptError::BadPassphrase {
                    key_id: key.key_id.clone(),
                })
            } else {
                Err(DecryptError::KeyMismatch {
                    key_id: key.key_id.clone(),
                })
            }
        }
    }

    fn ring(ids: &[&str]) -> KeyRing {
        KeyRing::new(
            ids.iter()
                .map(|id| KeyCandidate::new(*id, "armored", SecretString::from("pass")))
                .collect(),
        )
    }

    #[test]
    fn test_first_success_wins() {
        let decryptor = OnlyKey {
            good_key: "k2",
            calls: AtomicUsize::new(0),
        };
        let result = decrypt_with_candidates(&decryptor, "ct", &ring(&["k1", "k2", "k3"]));
        assert_eq!(result.unwrap(), "plain:ct");
        assert_eq!(decryptor.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_all_fail_keeps_first_error() {
        let decryptor = OnlyKey {
            good_key: "none",
            calls: AtomicUsize::new(0),
        };
        let err = decrypt_with_candidates(&decryptor, "ct", &ring(&["k1", "k2"])).unwrap_err();
        assert_eq!(
            err.first,
            DecryptError::BadPassphrase {
                key_id: "k1".to_string()
            }
        );
        assert_eq!(err.attempts, 2);
    }

    #[test]
    fn test_empty_ring() {
        let decryptor = OnlyKey {
            good_key: "k1",
            calls: AtomicUsize::new(0),
        };
        let err = decrypt_with_candidates(&decryptor, "ct", &KeyRing::default()).unwrap_err();
        assert_eq!(err.first, DecryptError::NoCandidates);
        assert_eq!(err.attempts, 0);
    }

    #[test]
    fn test_candidate_debug_hides_passphrase() {
        let candidate = KeyCandidate::new("k1", "armored", SecretString::from("hunter2"));
        assert!(!format!("{:?}", candidate).contains("hunter2"));
    }
}
