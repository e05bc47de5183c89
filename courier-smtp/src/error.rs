//! Error types for SMTP client and pool operations.

use thiserror::Error;

/// Errors raised by the SMTP client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// TLS setup or handshake failure.
    #[error("TLS error: {0}")]
    Tls(String),

    /// The server's response could not be parsed.
    #[error("parse error: {0}")]
    Parse(String),

    /// Response bytes were not valid UTF-8.
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    /// The server answered a command with a failure code.
    #[error("SMTP error: {code} {message}")]
    Smtp { code: u16, message: String },

    /// An operation exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),
}

impl ClientError {
    /// Build an [`ClientError::Smtp`] from a parsed response.
    #[must_use]
    pub fn from_response(response: &crate::response::Response) -> Self {
        Self::Smtp {
            code: response.code,
            message: response.message(),
        }
    }
}

/// Errors raised by the connection pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// No slot became free within the acquire timeout.
    #[error("timed out waiting for a connection slot")]
    Timeout,

    /// The pool has been closed; waiters are rejected.
    #[error("pool is closed")]
    Closed,

    /// Establishing a new connection failed.
    #[error(transparent)]
    Connect(#[from] ClientError),
}

/// Result type for SMTP client operations.
pub type Result<T> = std::result::Result<T, ClientError>;
