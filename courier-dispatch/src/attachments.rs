//! Attachment fetching behind a single `fetch` seam.
//!
//! The dispatcher only ever asks for `(bytes, filename)`; where the bytes
//! come from is the fetcher's business. The built-in fetcher covers inline
//! base64 content and the local filesystem; HTTP-backed modes belong to an
//! external collaborator implementing the same trait.

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use courier_store::{Attachment, FetchMode};
use thiserror::Error;

/// Errors raised while materializing attachment content.
#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("invalid inline content for '{0}'")]
    Decode(String),

    #[error("no fetcher available for mode {0:?}")]
    Unsupported(FetchMode),
}

/// Resolves an attachment reference to its content and final filename.
#[async_trait]
pub trait AttachmentFetcher: Send + Sync {
    /// Fetch one attachment: `(bytes, filename)`. The returned filename has
    /// any cache marker already stripped.
    async fn fetch(
        &self,
        attachment: &Attachment,
    ) -> std::result::Result<(Vec<u8>, String), AttachmentError>;
}

/// Built-in fetcher for inline base64 and filesystem attachments.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFetcher;

#[async_trait]
impl AttachmentFetcher for LocalFetcher {
    async fn fetch(
        &self,
        attachment: &Attachment,
    ) -> std::result::Result<(Vec<u8>, String), AttachmentError> {
        let filename = attachment.clean_filename();

        match attachment.mode() {
            FetchMode::Base64 => {
                let encoded = attachment
                    .storage_path
                    .strip_prefix("base64:")
                    .unwrap_or(&attachment.storage_path);
                let content = STANDARD
                    .decode(encoded.trim())
                    .map_err(|_| AttachmentError::Decode(filename.clone()))?;
                Ok((content, filename))
            }
            FetchMode::Filesystem => {
                let content = tokio::fs::read(&attachment.storage_path)
                    .await
                    .map_err(|source| AttachmentError::Io {
                        path: attachment.storage_path.clone(),
                        source,
                    })?;
                Ok((content, filename))
            }
            mode @ (FetchMode::HttpUrl | FetchMode::HttpEndpoint) => {
                Err(AttachmentError::Unsupported(mode))
            }
        }
    }
}
