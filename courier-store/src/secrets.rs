//! Credential sealing for account passwords at rest.
//!
//! The store never interprets credentials itself; it passes them through a
//! [`SecretsProvider`] on every write and read. Real encryption (keyed AEAD,
//! KMS, ...) is an external concern plugged in at construction.

use crate::error::{Result, StoreError};

/// Seals credentials before they hit disk and opens them on the way out.
pub trait SecretsProvider: Send + Sync + std::fmt::Debug {
    /// Transform a plaintext credential into its stored form.
    fn seal(&self, plaintext: &str) -> Result<String>;

    /// Transform a stored credential back into plaintext.
    fn open(&self, sealed: &str) -> Result<String>;
}

/// Pass-through provider: credentials are stored as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextSecrets;

impl SecretsProvider for PlaintextSecrets {
    fn seal(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.to_string())
    }

    fn open(&self, sealed: &str) -> Result<String> {
        Ok(sealed.to_string())
    }
}

/// Reversible obfuscation used by tests to prove the provider is applied on
/// both paths. Not encryption.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReversedSecrets;

impl SecretsProvider for ReversedSecrets {
    fn seal(&self, plaintext: &str) -> Result<String> {
        Ok(plaintext.chars().rev().collect())
    }

    fn open(&self, sealed: &str) -> Result<String> {
        if sealed.is_empty() {
            return Err(StoreError::Secrets("empty sealed credential".to_string()));
        }
        Ok(sealed.chars().rev().collect())
    }
}
