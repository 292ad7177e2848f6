//! Splitbench Compute Node.
//!
//! Issues a query corpus to a Storage Node one query at a time, measures each
//! round trip, and persists per-query records and a run summary.

pub mod config;
pub mod connection;
pub mod error;
pub mod runner;

use std::path::PathBuf;

pub use config::{Args, ComputeConfig, MetricList};
pub use connection::{fetch, Connection, Fetched};
pub use error::Error;
pub use runner::{write_selected, write_summary, QueryOutcome, Runner};

pub use splitbench_core::AggregateSummary;

/// Run the corpus in `query_dir` against `storage_address:port` with default
/// settings and persist `benchmark_metrics.json`.
///
/// Fails only when the result log cannot be created.
pub async fn run(
    storage_address: &str,
    port: u16,
    query_dir: impl Into<PathBuf>,
) -> Result<AggregateSummary, Error> {
    run_with(ComputeConfig::new(storage_address, port, query_dir)).await
}

/// Like [`run`] with an explicit configuration.
pub async fn run_with(config: ComputeConfig) -> Result<AggregateSummary, Error> {
    let runner = Runner::new(config)?;
    let summary = runner.run().await;
    if let Err(e) = write_summary(&runner.config().results_dir, &summary) {
        tracing::error!(error = %e, "failed to save metrics");
    }
    Ok(summary)
}
