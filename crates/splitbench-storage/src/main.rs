//! Splitbench Storage Node - standalone query server.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use splitbench_storage::Args;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "splitbench_storage=info,splitbench_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting splitbench storage node");

    let args = Args::parse();
    let config = args.into_config();

    tracing::info!(
        bind = %config.bind_address,
        port = config.port,
        workers = config.worker_hint,
        scale_factor = config.scale_factor,
        engine_mode = %config.engine_mode,
        pool_size = config.pool_size,
        dataset_dir = ?config.dataset_dir,
        results_dir = %config.results_dir.display(),
        "configuration loaded"
    );

    match splitbench_storage::start(config).await {
        Ok(_) => {
            tracing::info!("storage node shutdown complete");
        }
        Err(e) => {
            tracing::error!(error = %e, "storage node error");
            return Err(e.into());
        }
    }

    Ok(())
}
