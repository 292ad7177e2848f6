//! Compute Node configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use splitbench_core::corpus::{CorpusPattern, DEFAULT_QUERY_EXTENSION, DEFAULT_QUERY_PREFIX};
use splitbench_core::summary::DEFAULT_SELECTED_METRIC;

/// Default Storage Node address.
pub const DEFAULT_STORAGE_ADDRESS: &str = "127.0.0.1";

/// Default Storage Node port.
pub const DEFAULT_PORT: u16 = 9000;

/// Default query corpus directory.
pub const DEFAULT_QUERY_DIR: &str = "./queries";

/// Default results directory.
pub const DEFAULT_RESULTS_DIR: &str = "./results";

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default response timeout.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(300);

/// Default maximum message size (64 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = splitbench_proto::framing::MAX_MESSAGE_SIZE;

/// File name prefix of the compute result log.
pub const RESULT_LOG_PREFIX: &str = "compute_results";

/// Compute Node configuration.
#[derive(Debug, Clone)]
pub struct ComputeConfig {
    /// Storage Node host name or IP address.
    pub storage_address: String,

    /// Storage Node port.
    pub port: u16,

    /// Directory holding the query corpus.
    pub query_dir: PathBuf,

    /// Directory receiving the result log and summaries.
    pub results_dir: PathBuf,

    /// Corpus file naming convention.
    pub pattern: CorpusPattern,

    /// Deadline for establishing a connection.
    pub connect_timeout: Duration,

    /// Deadline for sending a query and receiving its full response.
    pub response_timeout: Duration,

    /// Maximum frame size in bytes.
    pub max_message_size: usize,

    /// Metric names written to the filtered summary.
    pub selected_metrics: Vec<String>,
}

impl ComputeConfig {
    pub fn new(storage_address: impl Into<String>, port: u16, query_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_address: storage_address.into(),
            port,
            query_dir: query_dir.into(),
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            pattern: CorpusPattern::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            selected_metrics: vec![DEFAULT_SELECTED_METRIC.to_string()],
        }
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    pub fn with_pattern(mut self, pattern: CorpusPattern) -> Self {
        self.pattern = pattern;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_selected_metrics(mut self, metrics: Vec<String>) -> Self {
        self.selected_metrics = metrics;
        self
    }

    /// `host:port` of the Storage Node.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.storage_address, self.port)
    }
}

impl Default for ComputeConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STORAGE_ADDRESS, DEFAULT_PORT, DEFAULT_QUERY_DIR)
    }
}

/// A list of metric names given on the command line as a JSON array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricList(pub Vec<String>);

impl Default for MetricList {
    fn default() -> Self {
        Self(vec![DEFAULT_SELECTED_METRIC.to_string()])
    }
}

/// Parse `["ThroughPut","cpu_usage"]`. A bare comma-separated list is also
/// accepted.
pub fn parse_metric_list(raw: &str) -> Result<MetricList, String> {
    let trimmed = raw.trim();
    if trimmed.starts_with('[') {
        return serde_json::from_str::<Vec<String>>(trimmed)
            .map(MetricList)
            .map_err(|e| format!("invalid metric list: {}", e));
    }

    let names: Vec<String> = trimmed
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();
    if names.is_empty() {
        return Err("metric list is empty".to_string());
    }
    Ok(MetricList(names))
}

/// Command-line arguments for the Compute Node.
#[derive(Parser, Debug)]
#[command(name = "splitbench-compute")]
#[command(version, about = "Splitbench Compute Node", long_about = None)]
pub struct Args {
    /// Storage Node address.
    #[arg(short, long, default_value = DEFAULT_STORAGE_ADDRESS)]
    pub storage: String,

    /// Storage Node port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Directory holding the query corpus.
    #[arg(short, long, default_value = DEFAULT_QUERY_DIR)]
    pub query_dir: PathBuf,

    /// Directory receiving result logs and summaries.
    #[arg(short, long, default_value = DEFAULT_RESULTS_DIR)]
    pub results_dir: PathBuf,

    /// Query file name prefix.
    #[arg(long, default_value = DEFAULT_QUERY_PREFIX)]
    pub query_prefix: String,

    /// Query file extension.
    #[arg(long, default_value = DEFAULT_QUERY_EXTENSION)]
    pub query_extension: String,

    /// Connect timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_CONNECT_TIMEOUT.as_secs())]
    pub connect_timeout: u64,

    /// Response timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_RESPONSE_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Maximum message size in megabytes.
    #[arg(long, default_value_t = 64)]
    pub max_message_mb: usize,

    /// Metrics to keep in the filtered summary, as a JSON list.
    #[arg(short, long, value_parser = parse_metric_list, default_value = "[\"ThroughPut\"]")]
    pub metrics: MetricList,
}

impl Args {
    /// Convert command-line arguments to Compute Node configuration.
    pub fn into_config(self) -> ComputeConfig {
        ComputeConfig {
            storage_address: self.storage,
            port: self.port,
            query_dir: self.query_dir,
            results_dir: self.results_dir,
            pattern: CorpusPattern::new(self.query_prefix, self.query_extension),
            connect_timeout: Duration::from_secs(self.connect_timeout),
            response_timeout: Duration::from_secs(self.timeout),
            max_message_size: self.max_message_mb * 1024 * 1024,
            selected_metrics: self.metrics.0,
        }
    }
}
