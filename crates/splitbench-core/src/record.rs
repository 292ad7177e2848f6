//! Per-query metrics records and their CSV rendering.

use std::time::Duration;

/// A record that can be appended to a CSV result log.
pub trait CsvRecord {
    /// Column headers, written once when the log is created.
    const HEADER: &'static [&'static str];

    /// Field values in header order, already formatted.
    fn fields(&self) -> Vec<String>;
}

/// One row of the Storage Node log.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageRecord {
    pub query_id: String,
    /// Engine execution time only.
    pub execution_time: Duration,
    pub rows_returned: u64,
    pub scanned_rows: u64,
    pub cpu_usage: f64,
    /// Full handling window, I/O included.
    pub wall_clock_time: Duration,
}

impl StorageRecord {
    /// Record for a request that failed: zero time, rows and scan.
    pub fn failed(query_id: impl Into<String>, cpu_usage: f64, wall_clock_time: Duration) -> Self {
        Self {
            query_id: query_id.into(),
            execution_time: Duration::ZERO,
            rows_returned: 0,
            scanned_rows: 0,
            cpu_usage,
            wall_clock_time,
        }
    }
}

impl CsvRecord for StorageRecord {
    const HEADER: &'static [&'static str] = &[
        "QueryID",
        "ExecutionTime",
        "RowsReturned",
        "ScannedRows",
        "CPUUsage",
        "WallClockTime",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.query_id.clone(),
            format!("{:.4}", self.execution_time.as_secs_f64()),
            self.rows_returned.to_string(),
            self.scanned_rows.to_string(),
            format!("{:.2}", self.cpu_usage),
            format!("{:.4}", self.wall_clock_time.as_secs_f64()),
        ]
    }
}

/// One row of the Compute Node log.
#[derive(Debug, Clone, PartialEq)]
pub struct ComputeRecord {
    pub query_file: String,
    pub returned_rows: u64,
    pub scanned_rows: u64,
    /// Connect, send and receive; excludes decoding.
    pub data_transfer_time: Duration,
    /// Bytes received from the Storage Node.
    pub data_size: u64,
    pub server_query_time: Duration,
    /// Client-side CPU cost of the round trip.
    pub cpu_usage: f64,
    /// Scanned rows per second of round-trip wall time.
    pub throughput: f64,
}

impl CsvRecord for ComputeRecord {
    const HEADER: &'static [&'static str] = &[
        "QueryFile",
        "ReturnedRows",
        "ScannedRows",
        "DataTransferTime",
        "DataSize",
        "ServerQueryTime",
        "CPUUsage",
        "Throughput",
    ];

    fn fields(&self) -> Vec<String> {
        vec![
            self.query_file.clone(),
            self.returned_rows.to_string(),
            self.scanned_rows.to_string(),
            format!("{:.4}", self.data_transfer_time.as_secs_f64()),
            self.data_size.to_string(),
            format!("{:.4}", self.server_query_time.as_secs_f64()),
            format!("{:.2}", self.cpu_usage),
            format!("{:.1}", self.throughput),
        ]
    }
}

/// Scanned rows per second, or 0 unless both inputs are positive.
pub fn throughput(scanned_rows: u64, wall: Duration) -> f64 {
    let secs = wall.as_secs_f64();
    if scanned_rows == 0 || secs <= 0.0 {
        return 0.0;
    }
    scanned_rows as f64 / secs
}
