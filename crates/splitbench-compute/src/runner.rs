//! Benchmark runner: drives the query corpus through the Storage Node.
//!
//! Queries run strictly one at a time so every timing belongs to exactly one
//! query. A failed query becomes a zero-result record and the run continues.

use std::path::{Path, PathBuf};
use std::time::Duration;

use splitbench_core::record::throughput;
use splitbench_core::summary::{SELECTED_FILE_NAME, SUMMARY_FILE_NAME};
use splitbench_core::{
    list_query_files, AggregateSummary, ComputeRecord, CpuSampler, Query, ResultLog, Scope,
    SummaryAccumulator,
};
use splitbench_proto::ResultEnvelope;

use crate::config::{ComputeConfig, RESULT_LOG_PREFIX};
use crate::connection;
use crate::error::Error;

/// Everything learned from one query.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutcome {
    pub record: ComputeRecord,
    /// The decoded envelope, or the empty one when the query failed.
    pub envelope: ResultEnvelope,
    pub failed: bool,
}

/// Runs a query corpus and logs one record per query file.
pub struct Runner {
    config: ComputeConfig,
    log: ResultLog<ComputeRecord>,
    cpus: usize,
}

impl Runner {
    /// Create a runner and its result log.
    pub fn new(config: ComputeConfig) -> Result<Self, Error> {
        let log = ResultLog::create(&config.results_dir, RESULT_LOG_PREFIX)?;
        tracing::info!(path = %log.path().display(), "compute result log created");
        Ok(Self {
            config,
            log,
            cpus: splitbench_core::logical_cpus(),
        })
    }

    /// Override the logical CPU count used for utilisation.
    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus.max(1);
        self
    }

    pub fn config(&self) -> &ComputeConfig {
        &self.config
    }

    pub fn log(&self) -> &ResultLog<ComputeRecord> {
        &self.log
    }

    /// Run every matching query file in name order.
    ///
    /// Never fails: a missing directory or empty corpus yields the all-zero
    /// summary, and failed queries are counted, not raised.
    pub async fn run(&self) -> AggregateSummary {
        let files = match list_query_files(&self.config.query_dir, &self.config.pattern) {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %e, "query corpus unavailable");
                Vec::new()
            }
        };
        if files.is_empty() {
            tracing::warn!(dir = %self.config.query_dir.display(), "no query files to run");
        }

        tracing::info!(
            storage = %self.config.endpoint(),
            queries = files.len(),
            "starting benchmark run"
        );

        let window = CpuSampler::start(Scope::Process);
        let mut totals = SummaryAccumulator::new();

        for path in &files {
            let outcome = self.run_query(path).await;
            if let Err(e) = self.log.append(&outcome.record) {
                tracing::error!(query_file = %outcome.record.query_file, error = %e, "failed to append compute record");
            }
            totals.add(&outcome.record, outcome.failed);
        }

        let usage = window.finish(self.cpus);
        let summary = totals.finish(usage.wall, usage.cpu.total(), self.cpus);

        tracing::info!(
            total_queries = summary.total_queries,
            failed_queries = summary.failed_queries,
            total_scanned_rows = summary.total_scanned_rows,
            total_returned_rows = summary.total_returned_rows,
            total_data_transfer_time = summary.total_data_transfer_time,
            total_data_size = summary.total_data_size,
            execution_time = summary.execution_time,
            cpu_usage = summary.cpu_usage,
            throughput = summary.throughput,
            "benchmark run complete"
        );

        summary
    }

    /// Send one query file and measure the round trip.
    pub async fn run_query(&self, path: &Path) -> QueryOutcome {
        let query = match Query::read(path) {
            Ok(query) => query,
            Err(e) => {
                let query_file = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_default();
                tracing::error!(query_file = %query_file, error = %e, "failed to read query file");
                return QueryOutcome::failed(query_file, Duration::ZERO, 0, 0.0);
            }
        };

        tracing::info!(query_file = %query.id, "executing query");

        let window = CpuSampler::start(Scope::Process);
        let fetched = connection::fetch(&self.config, &query.text).await;

        let (envelope, transfer_time, data_size, failed) = match fetched {
            Ok(fetched) => match ResultEnvelope::from_bytes(&fetched.payload) {
                Ok(envelope) => (envelope, fetched.transfer_time, fetched.data_size(), false),
                Err(e) => {
                    tracing::error!(query_file = %query.id, error = %e, "failed to decode result envelope");
                    (ResultEnvelope::failed(), fetched.transfer_time, fetched.data_size(), true)
                }
            },
            Err(e) => {
                tracing::error!(query_file = %query.id, error = %e, "failed to communicate with storage node");
                (ResultEnvelope::failed(), Duration::ZERO, 0, true)
            }
        };

        let usage = window.finish(self.cpus);
        let record = ComputeRecord {
            query_file: query.id,
            returned_rows: envelope.row_count() as u64,
            scanned_rows: envelope.scanned_rows,
            data_transfer_time: transfer_time,
            data_size,
            server_query_time: envelope.execution_time(),
            cpu_usage: usage.percent,
            throughput: throughput(envelope.scanned_rows, usage.wall),
        };

        tracing::info!(
            query_file = %record.query_file,
            rows = record.returned_rows,
            scanned = record.scanned_rows,
            transfer_secs = record.data_transfer_time.as_secs_f64(),
            data_size = record.data_size,
            server_secs = record.server_query_time.as_secs_f64(),
            cpu_usage = record.cpu_usage,
            throughput = record.throughput,
            "query finished"
        );
        if let Some(first) = envelope.rows.first() {
            tracing::debug!(row = ?first, "first row");
        }

        QueryOutcome {
            record,
            envelope,
            failed,
        }
    }
}

impl std::fmt::Debug for Runner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runner")
            .field("config", &self.config)
            .field("log", &self.log.path())
            .field("cpus", &self.cpus)
            .finish()
    }
}

impl QueryOutcome {
    fn failed(query_file: String, transfer_time: Duration, data_size: u64, cpu_usage: f64) -> Self {
        Self {
            record: ComputeRecord {
                query_file,
                returned_rows: 0,
                scanned_rows: 0,
                data_transfer_time: transfer_time,
                data_size,
                server_query_time: Duration::ZERO,
                cpu_usage,
                throughput: 0.0,
            },
            envelope: ResultEnvelope::failed(),
            failed: true,
        }
    }
}

/// Write the full summary as `benchmark_metrics.json` under `dir`.
pub fn write_summary(dir: &Path, summary: &AggregateSummary) -> Result<PathBuf, Error> {
    let path = dir.join(SUMMARY_FILE_NAME);
    summary.write_json(&path)?;
    tracing::info!(path = %path.display(), "metrics saved");
    Ok(path)
}

/// Write the selected metrics as `final_metrics.json` under `dir`.
pub fn write_selected(dir: &Path, summary: &AggregateSummary, names: &[String]) -> Result<PathBuf, Error> {
    let path = dir.join(SELECTED_FILE_NAME);
    summary.write_selected(&path, names)?;
    tracing::info!(path = %path.display(), metrics = ?names, "selected metrics saved");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_port() -> u16 {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn test_empty_directory_gives_zero_summary() {
        let dir = tempfile::tempdir().unwrap();
        let queries = dir.path().join("queries");
        std::fs::create_dir(&queries).unwrap();

        let config = ComputeConfig::new("127.0.0.1", unreachable_port(), &queries)
            .with_results_dir(dir.path().join("results"));
        let runner = Runner::new(config).unwrap();
        let summary = runner.run().await;

        assert_eq!(summary, AggregateSummary::default());
        assert_eq!(runner.log().rows_written(), 0);
        let contents = std::fs::read_to_string(runner.log().path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_missing_directory_gives_zero_summary() {
        let dir = tempfile::tempdir().unwrap();
        let config = ComputeConfig::new("127.0.0.1", unreachable_port(), dir.path().join("absent"))
            .with_results_dir(dir.path().join("results"));
        let runner = Runner::new(config).unwrap();

        assert_eq!(runner.run().await, AggregateSummary::default());
    }

    #[tokio::test]
    async fn test_unreachable_server_records_failures() {
        let dir = tempfile::tempdir().unwrap();
        let queries = dir.path().join("queries");
        std::fs::create_dir(&queries).unwrap();
        for name in ["query6_2.sql", "query6_1.sql", "other.sql"] {
            std::fs::write(queries.join(name), "SELECT 1").unwrap();
        }

        let config = ComputeConfig::new("127.0.0.1", unreachable_port(), &queries)
            .with_results_dir(dir.path().join("results"))
            .with_connect_timeout(Duration::from_secs(2));
        let runner = Runner::new(config).unwrap();
        let summary = runner.run().await;

        assert_eq!(summary.total_queries, 2);
        assert_eq!(summary.failed_queries, 2);
        assert_eq!(summary.total_scanned_rows, 0);
        assert_eq!(summary.total_returned_rows, 0);
        assert_eq!(summary.total_server_query_time, 0.0);
        assert_eq!(summary.throughput, 0.0);

        let contents = std::fs::read_to_string(runner.log().path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with("query6_1.sql,0,0,0.0000,0,0.0000,"));
        assert!(lines[2].starts_with("query6_2.sql,0,0,0.0000,0,0.0000,"));
    }

    #[test]
    fn test_write_summaries() {
        let dir = tempfile::tempdir().unwrap();
        let summary = AggregateSummary {
            throughput: 12.5,
            total_queries: 3,
            ..Default::default()
        };

        let full = write_summary(dir.path(), &summary).unwrap();
        assert!(full.ends_with("benchmark_metrics.json"));

        let selected = write_selected(
            dir.path(),
            &summary,
            &["ThroughPut".to_string(), "bogus".to_string()],
        )
        .unwrap();
        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(selected).unwrap()).unwrap();
        assert_eq!(value["ThroughPut"], 12.5);
        assert_eq!(value["bogus"], 0);
    }
}
