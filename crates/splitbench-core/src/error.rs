//! Core error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while accounting and persisting metrics.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV encoding error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The query corpus directory could not be read.
    #[error("query corpus unavailable at {path}: {source}")]
    Corpus {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A metrics document did not have the expected shape.
    #[error("invalid metrics: {0}")]
    InvalidMetrics(String),
}
