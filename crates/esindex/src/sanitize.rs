//! Helpers for sanitizing data before it enters tracing span attributes.
//!
//! Message IDs, user IDs and addresses identify mailbox content, so spans
//! carry short hashes and masked forms instead.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Returns a short deterministic hash of an identifier for correlation
/// without exposing the identifier itself.
pub fn hash_id(id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

/// Masks the local part of an email address.
///
/// - `alice@example.com` → `a****@example.com`
/// - `not-an-address` → `****`
pub fn redact_address(address: &str) -> String {
    match address.split_once('@') {
        Some((local, domain)) if !local.is_empty() => {
            let first: String = local.chars().take(1).collect();
            format!("{}****@{}", first, domain)
        }
        _ => "****".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_id_deterministic() {
        let h1 = hash_id("msg-123");
        assert_eq!(h1, hash_id("msg-123"));
        assert_eq!(h1.len(), 16);
        assert!(!h1.contains("msg"));
    }

    #[test]
    fn test_hash_id_different_ids_differ() {
        assert_ne!(hash_id("a"), hash_id("b"));
    }

    #[test]
    fn test_redact_address() {
        assert_eq!(redact_address("alice@example.com"), "a****@example.com");
        assert_eq!(redact_address("@example.com"), "****");
        assert_eq!(redact_address("plain"), "****");
    }
}
