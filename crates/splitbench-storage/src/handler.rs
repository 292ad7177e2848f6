//! Request handler: turns one query payload into one response payload.

use std::sync::Arc;
use std::time::Duration;

use splitbench_core::{
    cpu_utilization, extract_query_id, CpuTimes, ResultLog, ScanEstimator, StorageRecord,
};
use splitbench_proto::{QueryRequest, ResultEnvelope};

use crate::engine::QueryEngine;
use crate::error::Error;
use crate::sources::SourceCatalog;

/// An encoded response with the metrics it carries.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// rkyv-encoded [`ResultEnvelope`], unframed.
    pub payload: Vec<u8>,
    pub rows_returned: u64,
    pub scanned_rows: u64,
    /// Engine execution time only.
    pub execution_time: Duration,
}

/// Outcome of handling one request.
#[derive(Debug)]
pub struct Handled {
    /// Query id recovered from the text, or `"unknown"`.
    pub query_id: String,
    pub result: Result<Response, Error>,
}

/// Executes queries against the shared engine and logs one record per request.
pub struct RequestHandler {
    engine: Arc<dyn QueryEngine>,
    estimator: Arc<dyn ScanEstimator>,
    log: Arc<ResultLog<StorageRecord>>,
    sources: SourceCatalog,
    query_prefix: String,
    cpus: usize,
}

impl RequestHandler {
    pub fn new(
        engine: Arc<dyn QueryEngine>,
        estimator: Arc<dyn ScanEstimator>,
        log: Arc<ResultLog<StorageRecord>>,
        query_prefix: impl Into<String>,
    ) -> Self {
        Self {
            engine,
            estimator,
            log,
            sources: SourceCatalog::new(),
            query_prefix: query_prefix.into(),
            cpus: splitbench_core::logical_cpus(),
        }
    }

    /// Override the logical CPU count used for utilisation.
    pub fn with_cpus(mut self, cpus: usize) -> Self {
        self.cpus = cpus.max(1);
        self
    }

    /// Resolve flat-file references in queries against loaded tables.
    pub fn with_sources(mut self, sources: SourceCatalog) -> Self {
        self.sources = sources;
        self
    }

    pub fn cpus(&self) -> usize {
        self.cpus
    }

    pub fn log(&self) -> &ResultLog<StorageRecord> {
        &self.log
    }

    /// Decode, estimate, execute and encode one request.
    ///
    /// Blocks on the engine; call from a blocking context.
    pub fn handle(&self, payload: &[u8]) -> Handled {
        let request = match QueryRequest::from_bytes(payload) {
            Ok(request) => request,
            Err(e) => {
                return Handled {
                    query_id: splitbench_core::corpus::UNKNOWN_QUERY_ID.to_string(),
                    result: Err(e.into()),
                }
            }
        };

        let query_id = extract_query_id(&request.text, &self.query_prefix);
        let result = self.execute(&request);
        Handled { query_id, result }
    }

    fn execute(&self, request: &QueryRequest) -> Result<Response, Error> {
        let sql = self.sources.rewrite(&request.text);
        if let std::borrow::Cow::Owned(rewritten) = &sql {
            tracing::debug!(sql = %rewritten, "flat-file references resolved");
        }

        let scanned_rows = self.estimator.estimate(&sql);
        let execution = self.engine.execute(&sql)?;

        let rows_returned = execution.rows.len() as u64;
        let envelope = ResultEnvelope::new(execution.rows, scanned_rows, execution.elapsed);
        let payload = envelope.to_bytes()?;

        Ok(Response {
            payload,
            rows_returned,
            scanned_rows,
            execution_time: execution.elapsed,
        })
    }

    /// Append the record for one handled request.
    ///
    /// A failed request is logged with zero time, rows and scan. Log write
    /// failures are reported but never propagate into the connection.
    pub fn record(
        &self,
        query_id: &str,
        response: Option<&Response>,
        cpu: CpuTimes,
        wall: Duration,
    ) -> StorageRecord {
        let cpu_usage = cpu_utilization(cpu.total(), wall, self.cpus);
        let record = match response {
            Some(response) => StorageRecord {
                query_id: query_id.to_string(),
                execution_time: response.execution_time,
                rows_returned: response.rows_returned,
                scanned_rows: response.scanned_rows,
                cpu_usage,
                wall_clock_time: wall,
            },
            None => StorageRecord::failed(query_id, cpu_usage, wall),
        };

        if let Err(e) = self.log.append(&record) {
            tracing::error!(query_id, error = %e, "failed to append storage record");
        }
        record
    }
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("mode", &self.engine.mode())
            .field("log", &self.log.path())
            .field("query_prefix", &self.query_prefix)
            .field("cpus", &self.cpus)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, EngineMode, SqliteEngine};
    use splitbench_core::{FixedEstimator, TableScanEstimator};
    use splitbench_proto::Value;

    fn handler(dir: &std::path::Path) -> RequestHandler {
        let engine = SqliteEngine::open(&EngineConfig::new(EngineMode::Serialized, 1, 1)).unwrap();
        engine.with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE lineitem (column04, column06);
                 INSERT INTO lineitem VALUES (5, 0.04), (17, 0.09), (3, 0.06);",
            )
            .unwrap();
        });
        let log = ResultLog::create_at(dir.join("storage.csv")).unwrap();
        RequestHandler::new(
            Arc::new(engine),
            Arc::new(TableScanEstimator::lineitem(1)),
            Arc::new(log),
            "query6_",
        )
        .with_cpus(2)
    }

    #[test]
    fn test_handle_query() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path());

        let handled = handler.handle(
            b"-- query6_3.sql\nSELECT column06 AS revenue FROM lineitem WHERE column04 < 6 ORDER BY column04",
        );
        assert_eq!(handled.query_id, "3");

        let response = handled.result.unwrap();
        assert_eq!(response.rows_returned, 2);
        assert_eq!(response.scanned_rows, 6_001_215);

        let envelope = ResultEnvelope::from_bytes(&response.payload).unwrap();
        assert_eq!(
            envelope.rows,
            vec![vec![Value::Float64(0.06)], vec![Value::Float64(0.04)]]
        );
        assert_eq!(envelope.scanned_rows, 6_001_215);
        assert_eq!(envelope.execution_time(), response.execution_time);
    }

    #[test]
    fn test_handle_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let handled = handler(dir.path()).handle(&[0xff, 0xfe, 0x00]);
        assert_eq!(handled.query_id, "unknown");
        assert!(matches!(handled.result, Err(Error::Protocol(_))));
    }

    #[test]
    fn test_handle_engine_error_keeps_id() {
        let dir = tempfile::tempdir().unwrap();
        let handled = handler(dir.path()).handle(b"/* query6_9.sql */ SELECT * FROM nowhere");
        assert_eq!(handled.query_id, "9");
        assert!(matches!(handled.result, Err(Error::Engine(_))));
    }

    #[test]
    fn test_record_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let handler = handler(dir.path());

        let response = Response {
            payload: Vec::new(),
            rows_returned: 4,
            scanned_rows: 100,
            execution_time: Duration::from_millis(250),
        };
        let cpu = CpuTimes {
            user: Duration::from_millis(300),
            system: Duration::from_millis(100),
        };

        let ok = handler.record("1", Some(&response), cpu, Duration::from_secs(1));
        assert_eq!(ok.rows_returned, 4);
        assert!((ok.cpu_usage - 20.0).abs() < 1e-9);

        let failed = handler.record("2", None, CpuTimes::default(), Duration::from_millis(10));
        assert_eq!(failed.rows_returned, 0);
        assert_eq!(failed.scanned_rows, 0);
        assert_eq!(failed.execution_time, Duration::ZERO);

        assert_eq!(handler.log().rows_written(), 2);
        let contents = std::fs::read_to_string(handler.log().path()).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines[0], "QueryID,ExecutionTime,RowsReturned,ScannedRows,CPUUsage,WallClockTime");
        assert_eq!(lines[1], "1,0.2500,4,100,20.00,1.0000");
        assert_eq!(lines[2], "2,0.0000,0,0,0.00,0.0100");
    }

    #[test]
    fn test_fixed_estimator() {
        let dir = tempfile::tempdir().unwrap();
        let engine = SqliteEngine::open(&EngineConfig::new(EngineMode::Pooled, 2, 1)).unwrap();
        let log = ResultLog::create_at(dir.path().join("s.csv")).unwrap();
        let handler = RequestHandler::new(
            Arc::new(engine),
            Arc::new(FixedEstimator(42)),
            Arc::new(log),
            "query6_",
        );

        let response = handler.handle(b"SELECT 1, 'a'").result.unwrap();
        assert_eq!(response.scanned_rows, 42);
        assert_eq!(response.rows_returned, 1);
    }
}
