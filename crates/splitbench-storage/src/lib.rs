//! Splitbench Storage Node.
//!
//! Holds an in-memory analytical dataset and answers queries sent by the
//! Compute Node over TCP, one query per connection.
//!
//! - [`engine`] - Shared SQLite engine, serialized or pooled
//! - [`dataset`] - Flat-file loader
//! - [`sources`] - Flat-file path references resolved to loaded tables
//! - [`handler`] - Per-request decode, estimate, execute, encode
//! - [`transport`] - Accept loop and connection handling
//! - [`config`] - Configuration and command-line arguments

pub mod config;
pub mod dataset;
pub mod engine;
pub mod error;
pub mod handler;
pub mod sources;
pub mod transport;

use std::sync::Arc;

use tokio::sync::broadcast;

use splitbench_core::{ResultLog, StorageRecord, TableScanEstimator};

pub use config::{Args, StorageConfig};
pub use engine::{EngineConfig, EngineMode, QueryEngine, SqliteEngine};
pub use error::Error;
pub use handler::RequestHandler;
pub use sources::SourceCatalog;
pub use transport::{NodeSummary, StorageNode, TransportMetrics};

/// Open the engine, load the dataset and build the request handler.
pub fn prepare(config: &StorageConfig) -> Result<RequestHandler, Error> {
    let engine = SqliteEngine::open(&config.engine_config())?;
    tracing::info!(mode = %engine.mode(), connections = engine.size(), "engine opened");

    let mut sources = SourceCatalog::new();
    if let Some(dir) = &config.dataset_dir {
        tracing::info!(dir = %dir.display(), "loading dataset");
        let tables = engine.with_connection(|conn| dataset::load_dir(conn, dir))?;
        let rows: u64 = tables.iter().map(|table| table.rows).sum();
        tracing::info!(tables = tables.len(), rows, "dataset loaded");
        sources = SourceCatalog::from_tables(&tables);
    }

    let log: ResultLog<StorageRecord> =
        ResultLog::create(&config.results_dir, config::RESULT_LOG_PREFIX)?;
    tracing::info!(path = %log.path().display(), "storage result log created");

    let estimator = TableScanEstimator::lineitem(config.scale_factor);
    tracing::info!(
        scale_factor = config.scale_factor,
        lineitem_rows = estimator.table_rows("lineitem"),
        "scan estimator configured"
    );

    Ok(RequestHandler::new(
        Arc::new(engine),
        Arc::new(estimator),
        Arc::new(log),
        config.query_prefix.clone(),
    )
    .with_sources(sources))
}

/// Run a Storage Node until Ctrl-C or SIGTERM.
///
/// Returns after in-flight connections have finished and the process-wide
/// summary has been written to the results directory.
pub async fn start(config: StorageConfig) -> Result<NodeSummary, Error> {
    let signal = shutdown_signal();
    let handler = Arc::new(prepare(&config)?);
    let node = StorageNode::bind(&config, handler).await?;

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    tokio::spawn(async move {
        signal.await;
        tracing::info!("received shutdown signal");
        let _ = shutdown_tx.send(());
    });

    let summary = node.run_until_shutdown(shutdown_rx).await?;
    match summary.write_to_dir(&config.results_dir) {
        Ok(path) => tracing::info!(path = %path.display(), "storage summary written"),
        Err(e) => tracing::error!(error = %e, "failed to write storage summary"),
    }
    Ok(summary)
}

/// Resolves on Ctrl-C, or on SIGTERM where available.
///
/// The SIGTERM handler is installed when this is called, not when the
/// returned future is first polled. Must be called inside a runtime.
pub fn shutdown_signal() -> impl std::future::Future<Output = ()> {
    #[cfg(unix)]
    let terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate());

    async move {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl+c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match terminate {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!(error = %e, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_loads_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        std::fs::create_dir_all(data.join("dataset_1")).unwrap();
        std::fs::write(
            data.join("dataset_1").join("lineitem.tbl"),
            "1|2|3|4|5|6.5|0.04|\n1|2|3|4|9|6.5|0.05|\n",
        )
        .unwrap();

        let config = StorageConfig::new(0)
            .with_engine_mode(EngineMode::Pooled)
            .with_pool_size(2)
            .with_dataset_dir(&data)
            .with_results_dir(dir.path().join("results"));
        let handler = prepare(&config).unwrap();

        let response = handler
            .handle(b"SELECT column06 FROM dataset_1_lineitem WHERE column04 < 6")
            .result
            .unwrap();
        assert_eq!(response.rows_returned, 1);
        assert_eq!(response.scanned_rows, 6_001_215);
        assert!(handler.log().path().starts_with(dir.path().join("results")));
    }

    #[test]
    fn test_prepare_answers_flat_file_queries() {
        let dir = tempfile::tempdir().unwrap();
        let datasets = dir.path().join("datasets");
        for i in 1..=2 {
            let nested = datasets.join(format!("dataset_{}", i));
            std::fs::create_dir_all(&nested).unwrap();
            std::fs::write(
                nested.join("lineitem.tbl"),
                format!("1|2|3|4|5|6.5|0.0{}|\n1|2|3|4|9|6.5|0.05|\n", i),
            )
            .unwrap();
        }

        let config = StorageConfig::new(0)
            .with_dataset_dir(&datasets)
            .with_results_dir(dir.path().join("results"));
        let handler = prepare(&config).unwrap();

        for i in 1..=2 {
            let query = format!(
                "
        SELECT
            column06 AS revenue 
        FROM
            read_csv_auto('{}', delim='|')
        WHERE
            column04 < 6;
        ",
                datasets
                    .join(format!("dataset_{}", i))
                    .join("lineitem.tbl")
                    .display()
            );
            let response = handler.handle(query.as_bytes()).result.unwrap();
            assert_eq!(response.rows_returned, 1);
            assert_eq!(response.scanned_rows, 6_001_215);

            let envelope = splitbench_proto::ResultEnvelope::from_bytes(&response.payload).unwrap();
            assert_eq!(
                envelope.rows,
                vec![vec![splitbench_proto::Value::Float64(i as f64 / 100.0)]]
            );
        }

        let bare = format!(
            "SELECT count(*) FROM '{}'",
            datasets.join("dataset_2").join("lineitem.tbl").display()
        );
        let response = handler.handle(bare.as_bytes()).result.unwrap();
        assert_eq!(response.rows_returned, 1);
    }

    #[test]
    fn test_prepare_rejects_bad_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let config = StorageConfig::new(0)
            .with_dataset_dir(dir.path().join("absent"))
            .with_results_dir(dir.path().join("results"));
        assert!(matches!(prepare(&config), Err(Error::Dataset(_))));
    }
}
