//! Compute Node error types.

use thiserror::Error;

/// Compute Node errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] splitbench_proto::Error),

    /// A network operation exceeded its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Metrics accounting error.
    #[error("metrics error: {0}")]
    Metrics(#[from] splitbench_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
