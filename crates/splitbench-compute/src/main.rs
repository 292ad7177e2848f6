//! Splitbench Compute Node - benchmark client.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use splitbench_compute::{run_with, write_selected, Args};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "splitbench_compute=info,splitbench_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting splitbench compute node");

    let args = Args::parse();
    let config = args.into_config();

    tracing::info!(
        storage = %config.endpoint(),
        query_dir = %config.query_dir.display(),
        results_dir = %config.results_dir.display(),
        metrics = ?config.selected_metrics,
        "configuration loaded"
    );

    let results_dir = config.results_dir.clone();
    let selected = config.selected_metrics.clone();

    let summary = run_with(config).await?;
    write_selected(&results_dir, &summary, &selected)?;

    Ok(())
}
