//! Splitbench driver.
//!
//! Starts a Storage Node as a child process, runs the Compute Node against it
//! in-process, stops the Storage Node and writes the selected metrics.

mod config;
mod process;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::Args;
use process::StorageProcess;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "splitbench=info,splitbench_compute=info,splitbench_core=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    args.log();
    let config = args.into_config()?;

    let mut storage = StorageProcess::spawn(&config.storage_bin, &config.storage_args)?;

    tracing::info!(grace_secs = config.grace.as_secs_f64(), "waiting for storage node to bind");
    tokio::time::sleep(config.grace).await;
    if let Some(status) = storage.try_wait()? {
        anyhow::bail!("storage node exited during startup: {}", status);
    }

    let results_dir = config.compute.results_dir.clone();
    let selected = config.compute.selected_metrics.clone();
    let outcome = splitbench_compute::run_with(config.compute).await;

    if let Err(e) = storage.terminate(config.shutdown_wait).await {
        tracing::error!(error = %e, "failed to stop storage node");
    }

    let summary = outcome?;
    splitbench_compute::write_selected(&results_dir, &summary, &selected)?;

    tracing::info!(metrics = ?selected, "benchmark complete");
    Ok(())
}
