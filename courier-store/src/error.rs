//! Error types for store operations

use thiserror::Error;

/// Errors that can occur while reading or writing the store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A JSON column could not be encoded or decoded.
    #[error("invalid JSON column: {0}")]
    Json(#[from] serde_json::Error),

    /// A referenced row does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Tenant deletion is restricted while accounts reference it.
    #[error("tenant '{0}' still owns accounts")]
    TenantHasAccounts(String),

    /// Schema migration failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// Credential sealing/opening failed.
    #[error("secrets error: {0}")]
    Secrets(String),
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;
