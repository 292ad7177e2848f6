//! Protocol error types.

use thiserror::Error;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// The peer closed the connection before a complete frame arrived.
    #[error("connection closed after {received} of {expected} bytes")]
    UnexpectedEof { received: usize, expected: usize },

    /// IO error on the underlying stream.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
