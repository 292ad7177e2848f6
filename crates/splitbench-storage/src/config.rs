//! Storage Node configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use splitbench_core::corpus::DEFAULT_QUERY_PREFIX;

use crate::engine::{EngineConfig, EngineMode};
use crate::error::Error;

/// Default bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 9000;

/// Default dataset scale factor.
pub const DEFAULT_SCALE_FACTOR: u64 = 1;

/// Default results directory.
pub const DEFAULT_RESULTS_DIR: &str = "./results";

/// Default read/write timeout in seconds.
pub const DEFAULT_IO_TIMEOUT_SECS: u64 = 300;

/// Default maximum frame size (64 MB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = splitbench_proto::framing::MAX_MESSAGE_SIZE;

/// File name prefix of the storage result log.
pub const RESULT_LOG_PREFIX: &str = "storage_results";

/// File name prefix of the process-wide summary.
pub const SUMMARY_PREFIX: &str = "storage_summary";

fn default_worker_hint() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(4)
        .max(1)
}

/// Storage Node configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Address to bind to.
    pub bind_address: String,

    /// Port to listen on. Zero picks an ephemeral port.
    pub port: u16,

    /// Worker hint, applied as the engine's per-statement thread count.
    pub worker_hint: usize,

    /// Dataset scale factor fed to the scanned-row estimator.
    pub scale_factor: u64,

    /// Concurrency discipline for the shared engine.
    pub engine_mode: EngineMode,

    /// Connections in the engine pool (pooled mode only).
    pub pool_size: usize,

    /// Directory of flat files loaded at startup.
    pub dataset_dir: Option<PathBuf>,

    /// Directory receiving the result log and summary.
    pub results_dir: PathBuf,

    /// Maximum frame size in bytes.
    pub max_message_size: usize,

    /// Deadline for reading a request and for writing a response.
    pub io_timeout: Duration,

    /// File-name prefix used to recover query ids from query text.
    pub query_prefix: String,
}

impl StorageConfig {
    pub fn new(port: u16) -> Self {
        let worker_hint = default_worker_hint();
        Self {
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            port,
            worker_hint,
            scale_factor: DEFAULT_SCALE_FACTOR,
            engine_mode: EngineMode::Pooled,
            pool_size: worker_hint,
            dataset_dir: None,
            results_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            io_timeout: Duration::from_secs(DEFAULT_IO_TIMEOUT_SECS),
            query_prefix: DEFAULT_QUERY_PREFIX.to_string(),
        }
    }

    pub fn with_bind_address(mut self, address: impl Into<String>) -> Self {
        self.bind_address = address.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_worker_hint(mut self, workers: usize) -> Self {
        self.worker_hint = workers.max(1);
        self
    }

    pub fn with_scale_factor(mut self, scale_factor: u64) -> Self {
        self.scale_factor = scale_factor;
        self
    }

    pub fn with_engine_mode(mut self, mode: EngineMode) -> Self {
        self.engine_mode = mode;
        self
    }

    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn with_dataset_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dataset_dir = Some(dir.into());
        self
    }

    pub fn with_results_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.results_dir = dir.into();
        self
    }

    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    pub fn with_query_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.query_prefix = prefix.into();
        self
    }

    /// Engine options derived from this configuration.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::new(self.engine_mode, self.pool_size, self.worker_hint)
    }

    /// Host and port to listen on. The host may be a name or an IP literal.
    pub fn listen_target(&self) -> Result<(&str, u16), Error> {
        let host = self.bind_address.trim();
        if host.is_empty() {
            return Err(Error::Config("bind address is empty".to_string()));
        }
        Ok((host, self.port))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(DEFAULT_PORT)
    }
}

/// Command-line arguments for the Storage Node.
#[derive(Parser, Debug)]
#[command(name = "splitbench-storage")]
#[command(version, about = "Splitbench Storage Node", long_about = None)]
pub struct Args {
    /// Address to bind to.
    #[arg(long, default_value = DEFAULT_BIND_ADDRESS)]
    pub bind: String,

    /// Port to listen on.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Worker hint for the engine (0 = auto).
    #[arg(short, long, default_value_t = 0)]
    pub workers: usize,

    /// Dataset scale factor.
    #[arg(long, default_value_t = DEFAULT_SCALE_FACTOR)]
    pub scale_factor: u64,

    /// Engine concurrency discipline.
    #[arg(long, value_enum, default_value_t = EngineMode::Pooled)]
    pub engine_mode: EngineMode,

    /// Engine pool size (0 = worker hint).
    #[arg(long, default_value_t = 0)]
    pub pool_size: usize,

    /// Directory of `.tbl` flat files to load at startup.
    #[arg(short, long)]
    pub dataset_dir: Option<PathBuf>,

    /// Directory receiving result logs.
    #[arg(short, long, default_value = DEFAULT_RESULTS_DIR)]
    pub results_dir: PathBuf,

    /// Read/write timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_IO_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Maximum message size in megabytes.
    #[arg(long, default_value_t = 64)]
    pub max_message_mb: usize,

    /// Query file prefix used to tag log records.
    #[arg(long, default_value = DEFAULT_QUERY_PREFIX)]
    pub query_prefix: String,
}

impl Args {
    /// Convert command-line arguments to Storage Node configuration.
    pub fn into_config(self) -> StorageConfig {
        let worker_hint = if self.workers == 0 {
            default_worker_hint()
        } else {
            self.workers
        };
        let pool_size = if self.pool_size == 0 {
            worker_hint
        } else {
            self.pool_size
        };

        StorageConfig {
            bind_address: self.bind,
            port: self.port,
            worker_hint,
            scale_factor: self.scale_factor,
            engine_mode: self.engine_mode,
            pool_size,
            dataset_dir: self.dataset_dir,
            results_dir: self.results_dir,
            max_message_size: self.max_message_mb * 1024 * 1024,
            io_timeout: Duration::from_secs(self.timeout),
            query_prefix: self.query_prefix,
        }
    }
}
