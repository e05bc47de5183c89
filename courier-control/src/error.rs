//! Error types for control operations

use thiserror::Error;

/// Errors that can occur during control operations
#[derive(Debug, Error)]
pub enum ControlError {
    /// I/O error communicating with the control socket
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol deserialization error
    #[error("protocol error: {0}")]
    ProtocolDeserialization(#[from] bincode::error::DecodeError),

    /// Protocol serialization error
    #[error("protocol error: {0}")]
    ProtocolSerialization(#[from] bincode::error::EncodeError),

    /// Server returned an error
    #[error("server error: {0}")]
    ServerError(String),

    /// Connection closed unexpectedly
    #[error("connection closed")]
    ConnectionClosed,

    /// Request timeout
    #[error("request timeout")]
    Timeout,
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
