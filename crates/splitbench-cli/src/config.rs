//! Driver configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use splitbench_compute::config::{parse_metric_list, MetricList, DEFAULT_QUERY_DIR};
use splitbench_compute::ComputeConfig;
use splitbench_storage::config::{DEFAULT_IO_TIMEOUT_SECS, DEFAULT_PORT, DEFAULT_RESULTS_DIR};
use splitbench_storage::EngineMode;

/// Default wait between starting the Storage Node and the first query.
pub const DEFAULT_GRACE_SECS: u64 = 3;

/// Default wait for the Storage Node to exit after SIGTERM.
pub const DEFAULT_SHUTDOWN_WAIT_SECS: u64 = 5;

/// Name of the Storage Node executable.
pub const STORAGE_BINARY: &str = "splitbench-storage";

/// Command-line arguments for the benchmark driver.
#[derive(Parser, Debug, Clone)]
#[command(name = "splitbench")]
#[command(version, about = "Splitbench benchmark driver", long_about = None)]
pub struct Args {
    /// Storage Node host the Compute Node connects to.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Address the Storage Node binds to.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: String,

    /// Storage Node port.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Storage Node worker hint (0 = auto).
    #[arg(short, long, default_value_t = 0)]
    pub workers: usize,

    /// Dataset scale factor.
    #[arg(long, default_value_t = 1)]
    pub scale_factor: u64,

    /// Storage engine concurrency discipline.
    #[arg(long, value_enum, default_value_t = EngineMode::Pooled)]
    pub engine_mode: EngineMode,

    /// Storage engine pool size (0 = worker hint).
    #[arg(long, default_value_t = 0)]
    pub pool_size: usize,

    /// Directory of `.tbl` flat files the Storage Node loads.
    #[arg(short, long)]
    pub dataset_dir: Option<PathBuf>,

    /// Directory holding the query corpus.
    #[arg(short, long, default_value = DEFAULT_QUERY_DIR)]
    pub query_dir: PathBuf,

    /// Directory receiving result logs and summaries.
    #[arg(short, long, default_value = DEFAULT_RESULTS_DIR)]
    pub results_dir: PathBuf,

    /// Path to the Storage Node executable (default: next to this binary).
    #[arg(long)]
    pub storage_bin: Option<PathBuf>,

    /// Seconds to wait for the Storage Node to bind.
    #[arg(long, default_value_t = DEFAULT_GRACE_SECS)]
    pub grace: u64,

    /// Seconds to wait for the Storage Node to exit after SIGTERM.
    #[arg(long, default_value_t = DEFAULT_SHUTDOWN_WAIT_SECS)]
    pub shutdown_wait: u64,

    /// Network timeout in seconds, for both nodes.
    #[arg(long, default_value_t = DEFAULT_IO_TIMEOUT_SECS)]
    pub timeout: u64,

    /// Metrics to keep in `final_metrics.json`, as a JSON list.
    #[arg(short, long, value_parser = parse_metric_list, default_value = "[\"ThroughPut\"]")]
    pub metrics: MetricList,
}

/// Resolved driver settings.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub storage_bin: PathBuf,
    pub storage_args: Vec<String>,
    pub compute: ComputeConfig,
    pub grace: Duration,
    pub shutdown_wait: Duration,
}

impl Args {
    /// Log every resolved argument.
    pub fn log(&self) {
        tracing::info!(
            host = %self.host,
            bind = %self.bind,
            port = self.port,
            workers = self.workers,
            scale_factor = self.scale_factor,
            engine_mode = %self.engine_mode,
            pool_size = self.pool_size,
            dataset_dir = ?self.dataset_dir,
            query_dir = %self.query_dir.display(),
            results_dir = %self.results_dir.display(),
            storage_bin = ?self.storage_bin,
            grace = self.grace,
            shutdown_wait = self.shutdown_wait,
            timeout = self.timeout,
            metrics = ?self.metrics.0,
            "driver arguments"
        );
    }

    /// Arguments passed to the Storage Node executable.
    pub fn storage_args(&self) -> Vec<String> {
        let mut args = vec![
            "--bind".to_string(),
            self.bind.clone(),
            "--port".to_string(),
            self.port.to_string(),
            "--workers".to_string(),
            self.workers.to_string(),
            "--scale-factor".to_string(),
            self.scale_factor.to_string(),
            "--engine-mode".to_string(),
            self.engine_mode.to_string(),
            "--pool-size".to_string(),
            self.pool_size.to_string(),
            "--results-dir".to_string(),
            self.results_dir.display().to_string(),
            "--timeout".to_string(),
            self.timeout.to_string(),
        ];
        if let Some(dir) = &self.dataset_dir {
            args.push("--dataset-dir".to_string());
            args.push(dir.display().to_string());
        }
        args
    }

    /// Resolve the driver configuration.
    pub fn into_config(self) -> anyhow::Result<DriverConfig> {
        let storage_bin = match &self.storage_bin {
            Some(path) => path.clone(),
            None => default_storage_bin()?,
        };
        let storage_args = self.storage_args();

        let timeout = Duration::from_secs(self.timeout);
        let compute = ComputeConfig::new(self.host, self.port, self.query_dir)
            .with_results_dir(self.results_dir)
            .with_response_timeout(timeout)
            .with_selected_metrics(self.metrics.0);

        Ok(DriverConfig {
            storage_bin,
            storage_args,
            compute,
            grace: Duration::from_secs(self.grace),
            shutdown_wait: Duration::from_secs(self.shutdown_wait),
        })
    }
}

/// The Storage Node executable installed next to the running binary.
pub fn default_storage_bin() -> anyhow::Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe.with_file_name(format!("{}{}", STORAGE_BINARY, std::env::consts::EXE_SUFFIX)))
}
