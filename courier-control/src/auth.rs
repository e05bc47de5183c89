//! Authentication for the control socket
//!
//! Token-based authentication with SHA-256 hashed bearer tokens. Tokens are
//! stored as hashes in configuration; incoming tokens are hashed and compared
//! against the configured list.

use hex::encode;
use serde::Deserialize;
use sha2::{Digest, Sha256};

/// Authentication configuration for the control socket
///
/// When disabled, all requests are allowed and access control relies on the
/// socket's filesystem permissions. Generate a hash with:
///
/// ```bash
/// echo -n "your-secret-token" | sha256sum
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ControlAuthConfig {
    /// Enable or disable authentication
    #[serde(default)]
    pub enabled: bool,

    /// Valid bearer tokens as SHA-256 hex hashes
    #[serde(default)]
    pub token_hashes: Vec<String>,
}

impl ControlAuthConfig {
    /// Whether requests must carry a valid token
    #[must_use]
    pub const fn requires_auth(&self) -> bool {
        self.enabled
    }

    /// Validate a plaintext token against the configured hashes.
    ///
    /// Always `true` when authentication is disabled.
    #[must_use]
    pub fn validate_token(&self, token: &str) -> bool {
        if !self.enabled {
            return true;
        }

        let hash = encode(Sha256::digest(token.as_bytes()));
        self.token_hashes
            .iter()
            .any(|configured| constant_time_eq(configured, &hash))
    }
}

/// Compare two hex strings without short-circuiting on the first mismatch.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    // SHA-256 of "test-token"
    const TEST_TOKEN_HASH: &str =
        "4c5dc9b7708905f77f5e5d16316b5dfb425e68cb326dcd55a860e90a7707031e";

    #[test]
    fn test_disabled_allows_everything() {
        let config = ControlAuthConfig::default();
        assert!(!config.requires_auth());
        assert!(config.validate_token("anything"));
    }

    #[test]
    fn test_valid_token_accepted() {
        let config = ControlAuthConfig {
            enabled: true,
            token_hashes: vec![TEST_TOKEN_HASH.to_string()],
        };
        assert!(config.requires_auth());
        assert!(config.validate_token("test-token"));
    }

    #[test]
    fn test_invalid_token_rejected() {
        let config = ControlAuthConfig {
            enabled: true,
            token_hashes: vec![TEST_TOKEN_HASH.to_string()],
        };
        assert!(!config.validate_token("wrong-token"));
        assert!(!config.validate_token(""));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
