//! Splitbench core: metrics accounting shared by both nodes.
//!
//! - [`cpu`] - CPU time sampling and utilisation
//! - [`record`] - Per-query metrics records and CSV rendering
//! - [`result_log`] - Append-only CSV result logs
//! - [`summary`] - Run-level aggregate summary
//! - [`estimator`] - Scanned-row estimation
//! - [`corpus`] - Query corpus reading and query identifiers

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod corpus;
pub mod cpu;
pub mod error;
pub mod estimator;
pub mod record;
pub mod result_log;
pub mod summary;

pub use corpus::{extract_query_id, list_query_files, CorpusPattern, Query};
pub use cpu::{cpu_utilization, logical_cpus, CpuSampler, CpuTimes, CpuUsage, Scope};
pub use error::Error;
pub use estimator::{FixedEstimator, ScanEstimator, TableScanEstimator};
pub use record::{ComputeRecord, CsvRecord, StorageRecord};
pub use result_log::ResultLog;
pub use summary::{AggregateSummary, SummaryAccumulator};
