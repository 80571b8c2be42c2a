//! Secret resolution and the index content cipher.
//!
//! Session tokens and the index key can come from three places, checked in
//! order:
//!
//! 1. **Direct value** in the config (local testing only)
//! 2. **File reference**, e.g. a mounted secret or a keychain export
//! 3. **Environment variable**

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use secrecy::{ExposeSecret, SecretString};
use std::fs;

/// Error type for secret resolution and index encryption failures.
#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source provided (need one of: direct value, file path, or env var name)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileReadError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("Decryption error: {0}")]
    DecryptionError(String),

    #[error("Invalid index key: {0}")]
    InvalidKey(String),
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Resolves a secret from a direct value, a file, or an environment
/// variable, in that order. Empty strings count as "not provided".
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|source| SecretError::FileReadError {
                path: expanded,
                source,
            });
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

/// Like [`resolve_secret`], but a missing source is `Ok(None)`.
pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    match resolve_secret(direct, file_path, env_var) {
        Ok(secret) => Ok(Some(secret)),
        Err(SecretError::NoSourceProvided) => Ok(None),
        Err(e) => Err(e),
    }
}

pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    [direct, file_path, env_var]
        .iter()
        .any(|s| s.is_some_and(|s| !s.is_empty()))
}

/// Expands a leading `~` to the home directory. `~user` is not supported.
fn expand_home(path: &str) -> String {
    if path == "~" || path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return path.replacen('~', &home.to_string_lossy(), 1);
        }
    }
    path.to_string()
}

// ============================================
// Index content encryption
// ============================================

/// Environment variable read by [`IndexCipher::from_env`].
pub const INDEX_KEY_ENV_VAR: &str = "ESINDEX_INDEX_KEY";

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// AES-256-GCM cipher for searchable index records.
///
/// Each user's index is sealed with its own key. Stored blobs are
/// `<12-byte nonce><ciphertext+tag>`.
#[derive(Clone)]
pub struct IndexCipher {
    cipher: Aes256Gcm,
}

impl IndexCipher {
    pub fn from_env() -> Result<Self> {
        let key_hex = std::env::var(INDEX_KEY_ENV_VAR).map_err(|_| {
            SecretError::InvalidKey(format!("Environment variable {} not set", INDEX_KEY_ENV_VAR))
        })?;
        Self::from_hex_key(&key_hex)
    }

    pub fn from_secret(key: &SecretString) -> Result<Self> {
        Self::from_hex_key(key.expose_secret())
    }

    /// Builds a cipher from a 64-character hex key.
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key_bytes = hex_decode(key_hex.trim())
            .map_err(|e| SecretError::InvalidKey(format!("Invalid hex key: {}", e)))?;

        if key_bytes.len() != KEY_SIZE {
            return Err(SecretError::InvalidKey(format!(
                "Key must be {} bytes ({} hex chars), got {} bytes",
                KEY_SIZE,
                KEY_SIZE * 2,
                key_bytes.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| SecretError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Generates a fresh random key, hex encoded, for a new user index.
    pub fn generate_key_hex() -> SecretString {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        SecretString::from(hex_encode(&key))
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| SecretError::EncryptionError(e.to_string()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend(ciphertext);
        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < NONCE_SIZE {
            return Err(SecretError::DecryptionError(
                "Ciphertext too short".to_string(),
            ));
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| SecretError::DecryptionError(e.to_string()))
    }
}

impl std::fmt::Debug for IndexCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("IndexCipher([REDACTED])")
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("Hex string must have even length".to_string());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            hex.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("Invalid hex at position {}", i))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    #[serial]
    fn test_direct_value_takes_priority() {
        std::env::set_var("ESINDEX_TEST_SECRET_1", "env_value");
        let result = resolve_secret(Some("direct"), None, Some("ESINDEX_TEST_SECRET_1")).unwrap();
        assert_eq!(result.expose_secret(), "direct");
        std::env::remove_var("ESINDEX_TEST_SECRET_1");
    }

    #[test]
    #[serial]
    fn test_file_takes_priority_over_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();

        std::env::set_var("ESINDEX_TEST_SECRET_2", "env_value");
        let result = resolve_secret(
            None,
            Some(file.path().to_str().unwrap()),
            Some("ESINDEX_TEST_SECRET_2"),
        )
        .unwrap();
        assert_eq!(result.expose_secret(), "from-file");
        std::env::remove_var("ESINDEX_TEST_SECRET_2");
    }

    #[test]
    #[serial]
    fn test_env_var_fallback_and_optional() {
        assert!(resolve_secret_optional(None, None, None).unwrap().is_none());

        std::env::set_var("ESINDEX_TEST_SECRET_3", "env_value\n");
        let result =
            resolve_secret_optional(Some(""), None, Some("ESINDEX_TEST_SECRET_3")).unwrap();
        assert_eq!(result.unwrap().expose_secret(), "env_value");
        std::env::remove_var("ESINDEX_TEST_SECRET_3");
    }

    #[test]
    fn test_missing_sources() {
        assert!(matches!(
            resolve_secret(None, None, None),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(matches!(
            resolve_secret(None, Some("/nonexistent/esindex/secret"), None),
            Err(SecretError::FileReadError { .. })
        ));
        assert!(matches!(
            resolve_secret(None, None, Some("ESINDEX_DEFINITELY_NOT_SET")),
            Err(SecretError::EnvVarNotSet { .. })
        ));
        assert!(!has_secret_source(Some(""), None, Some("")));
        assert!(has_secret_source(None, Some("/run/secrets/token"), None));
    }

    #[test]
    fn test_cipher_roundtrip_uses_fresh_nonces() {
        let cipher = IndexCipher::from_hex_key(TEST_KEY).unwrap();
        let a = cipher.seal(b"subject: hello").unwrap();
        let b = cipher.seal(b"subject: hello").unwrap();
        assert_ne!(a, b);
        assert_eq!(cipher.open(&a).unwrap(), b"subject: hello");
        assert_eq!(cipher.open(&b).unwrap(), b"subject: hello");
    }

    #[test]
    fn test_cipher_rejects_tampering_and_short_input() {
        let cipher = IndexCipher::from_hex_key(TEST_KEY).unwrap();
        let mut sealed = cipher.seal(b"body").unwrap();
        if let Some(last) = sealed.last_mut() {
            *last ^= 0xff;
        }
        assert!(matches!(cipher.open(&sealed), Err(SecretError::DecryptionError(_))));
        assert!(matches!(cipher.open(&[1, 2, 3]), Err(SecretError::DecryptionError(_))));
    }

    #[test]
    fn test_cipher_invalid_keys() {
        assert!(matches!(
            IndexCipher::from_hex_key("0123456789abcdef"),
            Err(SecretError::InvalidKey(_))
        ));
        let not_hex = format!("zz{}", "ab".repeat(31));
        assert!(matches!(
            IndexCipher::from_hex_key(&not_hex),
            Err(SecretError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_generated_key_is_usable() {
        let key = IndexCipher::generate_key_hex();
        assert_eq!(key.expose_secret().len(), 64);
        let cipher = IndexCipher::from_secret(&key).unwrap();
        let sealed = cipher.seal(b"x").unwrap();
        assert_eq!(cipher.open(&sealed).unwrap(), b"x");
    }

    #[test]
    fn test_cipher_debug_is_redacted() {
        let cipher = IndexCipher::from_hex_key(TEST_KEY).unwrap();
        assert_eq!(format!("{:?}", cipher), "IndexCipher([REDACTED])");
    }
}
