//! Storage Node error types.

use thiserror::Error;

/// Storage Node errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Analytical engine error.
    #[error("engine error: {0}")]
    Engine(#[from] rusqlite::Error),

    /// Dataset loading error.
    #[error("dataset error: {0}")]
    Dataset(String),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] splitbench_proto::Error),

    /// Metrics accounting error.
    #[error("metrics error: {0}")]
    Metrics(#[from] splitbench_core::Error),

    /// Transport error.
    #[error("transport error: {0}")]
    Transport(String),

    /// A network operation exceeded its deadline.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
