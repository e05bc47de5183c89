//! Typed errors for dispatch operations.
//!
//! [`SendError`] describes what went wrong while delivering one message; the
//! retry strategy classifies it as permanent or temporary. [`DispatchError`]
//! covers tick-level failures that abort a whole pass.

use courier_smtp::{ClientError, PoolError};
use thiserror::Error;

/// A failed delivery attempt for a single message.
#[derive(Debug, Error)]
pub enum SendError {
    /// Could not reach or keep a connection to the server.
    #[error("connection failed: {0}")]
    Connection(String),

    /// An operation exceeded its deadline.
    #[error("timed out: {0}")]
    Timeout(String),

    /// TLS setup or negotiation failed.
    #[error("TLS failure: {0}")]
    Tls(String),

    /// The server answered with a failure code.
    #[error("{code} {message}")]
    Smtp { code: u16, message: String },

    /// The exchange went off-protocol or the envelope could not be built.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl SendError {
    /// The SMTP status code carried by this error, if any.
    #[must_use]
    pub const fn smtp_code(&self) -> Option<u16> {
        match self {
            Self::Smtp { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<ClientError> for SendError {
    fn from(error: ClientError) -> Self {
        match error {
            ClientError::Io(e) => Self::Connection(format!("I/O error: {e}")),
            ClientError::ConnectionClosed => {
                Self::Connection("connection closed unexpectedly".to_string())
            }
            ClientError::Tls(message) => Self::Tls(message),
            ClientError::Parse(message) => Self::Protocol(message),
            ClientError::Utf8(e) => Self::Protocol(format!("invalid UTF-8: {e}")),
            ClientError::Smtp { code, message } => Self::Smtp { code, message },
            ClientError::Timeout(message) => Self::Timeout(message),
        }
    }
}

impl From<PoolError> for SendError {
    fn from(error: PoolError) -> Self {
        match error {
            PoolError::Timeout => Self::Timeout("waiting for a connection slot".to_string()),
            PoolError::Closed => Self::Connection("connection pool is closed".to_string()),
            PoolError::Connect(e) => e.into(),
        }
    }
}

/// Tick-level dispatch failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The store failed; the whole tick is retried on the next interval.
    #[error(transparent)]
    Store(#[from] courier_store::StoreError),
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
