//! Run-level aggregate metrics.

use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::cpu::cpu_utilization;
use crate::error::Error;
use crate::record::{throughput, ComputeRecord};

/// Default file name of the full summary document.
pub const SUMMARY_FILE_NAME: &str = "benchmark_metrics.json";

/// Default file name of the filtered summary document.
pub const SELECTED_FILE_NAME: &str = "final_metrics.json";

/// Metric selected when the caller names none.
pub const DEFAULT_SELECTED_METRIC: &str = "ThroughPut";

/// Totals and rates over every query of one Compute Node run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSummary {
    /// Scanned rows per second of overall wall time.
    #[serde(rename = "ThroughPut")]
    pub throughput: f64,
    /// Overall wall time in seconds.
    pub execution_time: f64,
    /// Process CPU utilisation over the run, in percent.
    pub cpu_usage: f64,
    pub total_scanned_rows: u64,
    pub total_returned_rows: u64,
    pub total_queries: u64,
    pub failed_queries: u64,
    /// Sum of per-query transfer times in seconds.
    pub total_data_transfer_time: f64,
    /// Bytes received across all queries.
    pub total_data_size: u64,
    /// Sum of server-reported execution times in seconds.
    pub total_server_query_time: f64,
}

impl AggregateSummary {
    /// Serialize to a JSON object.
    pub fn to_json(&self) -> Result<JsonValue, Error> {
        Ok(serde_json::to_value(self)?)
    }

    /// Pick the named metrics. Unknown names map to 0.
    pub fn select(&self, names: &[String]) -> Result<Map<String, JsonValue>, Error> {
        let full = match self.to_json()? {
            JsonValue::Object(map) => map,
            other => {
                return Err(Error::InvalidMetrics(format!(
                    "summary serialized to {} instead of an object",
                    other
                )))
            }
        };

        Ok(names
            .iter()
            .map(|name| {
                let value = full.get(name).cloned().unwrap_or_else(|| JsonValue::from(0));
                (name.clone(), value)
            })
            .collect())
    }

    /// Write the full summary as pretty JSON.
    pub fn write_json(&self, path: &Path) -> Result<(), Error> {
        write_json_file(path, &self.to_json()?)
    }

    /// Write only the selected metrics as pretty JSON.
    pub fn write_selected(&self, path: &Path, names: &[String]) -> Result<(), Error> {
        write_json_file(path, &JsonValue::Object(self.select(names)?))
    }
}

/// Running totals accumulated query by query.
#[derive(Debug, Clone, Default)]
pub struct SummaryAccumulator {
    total_scanned_rows: u64,
    total_returned_rows: u64,
    total_queries: u64,
    failed_queries: u64,
    total_data_transfer_time: Duration,
    total_data_size: u64,
    total_server_query_time: Duration,
}

impl SummaryAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one per-query record.
    pub fn add(&mut self, record: &ComputeRecord, failed: bool) {
        self.total_queries += 1;
        if failed {
            self.failed_queries += 1;
        }
        self.total_scanned_rows += record.scanned_rows;
        self.total_returned_rows += record.returned_rows;
        self.total_data_transfer_time += record.data_transfer_time;
        self.total_data_size += record.data_size;
        self.total_server_query_time += record.server_query_time;
    }

    /// Number of queries added so far.
    pub fn queries(&self) -> u64 {
        self.total_queries
    }

    /// Close the run with its overall wall time and process CPU time.
    ///
    /// A run that executed nothing yields the all-zero summary.
    pub fn finish(self, overall_wall: Duration, overall_cpu: Duration, cpus: usize) -> AggregateSummary {
        if self.total_queries == 0 {
            return AggregateSummary::default();
        }

        AggregateSummary {
            throughput: throughput(self.total_scanned_rows, overall_wall),
            execution_time: overall_wall.as_secs_f64(),
            cpu_usage: cpu_utilization(overall_cpu, overall_wall, cpus),
            total_scanned_rows: self.total_scanned_rows,
            total_returned_rows: self.total_returned_rows,
            total_queries: self.total_queries,
            failed_queries: self.failed_queries,
            total_data_transfer_time: self.total_data_transfer_time.as_secs_f64(),
            total_data_size: self.total_data_size,
            total_server_query_time: self.total_server_query_time.as_secs_f64(),
        }
    }
}

/// Write any JSON value to `path`, creating parent directories.
pub fn write_json_file(path: &Path, value: &JsonValue) -> Result<(), Error> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let file = std::fs::File::create(path)?;
    let mut writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}
