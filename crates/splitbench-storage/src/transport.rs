//! Storage Node transport: TCP accept loop and per-connection handling.
//!
//! Each accepted connection runs on its own task and carries exactly one
//! request: one length-prefixed query frame in, one envelope frame out. The
//! blocking part (decode, estimate, execute, encode) runs on the blocking
//! pool so per-request CPU time can be read from that worker thread.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::timeout;

use splitbench_core::corpus::UNKNOWN_QUERY_ID;
use splitbench_core::result_log::timestamped_file_name;
use splitbench_core::{cpu_utilization, CpuSampler, CpuTimes, Scope};
use splitbench_proto::framing::{read_frame, write_frame, LENGTH_PREFIX_SIZE};

use crate::config::{StorageConfig, SUMMARY_PREFIX};
use crate::error::Error;
use crate::handler::{RequestHandler, Response};

/// Transport metrics for monitoring.
#[derive(Debug)]
pub struct TransportMetrics {
    /// Total number of requests handled.
    pub requests_total: AtomicU64,
    /// Number of failed requests.
    pub requests_failed: AtomicU64,
    /// Number of bytes received.
    pub bytes_received: AtomicU64,
    /// Number of bytes sent.
    pub bytes_sent: AtomicU64,
    /// Node start time.
    pub started_at: Instant,
    /// Process CPU time at node start.
    pub cpu_at_start: CpuTimes,
}

impl TransportMetrics {
    fn new() -> Self {
        Self {
            requests_total: AtomicU64::new(0),
            requests_failed: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            started_at: Instant::now(),
            cpu_at_start: CpuTimes::process(),
        }
    }

    fn record_success(&self, received_bytes: usize, sent_bytes: usize) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(received_bytes as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent_bytes as u64, Ordering::Relaxed);
    }

    fn record_failure(&self, received_bytes: usize, sent_bytes: usize) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(received_bytes as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent_bytes as u64, Ordering::Relaxed);
    }

    /// Get the uptime duration.
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    pub fn total_bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn total_bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Process-wide CPU utilisation since the node started.
    pub fn process_cpu_usage(&self, cpus: usize) -> f64 {
        let cpu = CpuTimes::process().since(&self.cpu_at_start);
        cpu_utilization(cpu.total(), self.uptime(), cpus)
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Process-wide view of one Storage Node run, written at shutdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub engine_mode: String,
    /// Whole-process CPU utilisation over the node's lifetime.
    pub process_cpu_usage: f64,
    pub uptime_secs: f64,
    pub requests_total: u64,
    pub requests_failed: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl NodeSummary {
    /// Persist as `storage_summary_<timestamp>.json` under `dir`.
    pub fn write_to_dir(&self, dir: &Path) -> Result<PathBuf, Error> {
        let path = dir.join(timestamped_file_name(SUMMARY_PREFIX, "json"));
        let value = serde_json::to_value(self).map_err(splitbench_core::Error::from)?;
        splitbench_core::summary::write_json_file(&path, &value)?;
        Ok(path)
    }
}

struct Shared {
    handler: Arc<RequestHandler>,
    metrics: TransportMetrics,
    max_message_size: usize,
    io_timeout: Duration,
}

/// The Storage Node listener.
pub struct StorageNode {
    listener: TcpListener,
    shared: Arc<Shared>,
    engine_mode: String,
}

impl StorageNode {
    /// Bind the listener. A bind failure is the only fatal startup error.
    pub async fn bind(config: &StorageConfig, handler: Arc<RequestHandler>) -> Result<Self, Error> {
        let (host, port) = config.listen_target()?;
        let listener = TcpListener::bind((host, port)).await.map_err(|e| {
            Error::Transport(format!("failed to listen on {}:{}: {}", host, port, e))
        })?;

        tracing::info!(address = %listener.local_addr()?, "listening on TCP");

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                handler,
                metrics: TransportMetrics::new(),
                max_message_size: config.max_message_size,
                io_timeout: config.io_timeout,
            }),
            engine_mode: config.engine_mode.to_string(),
        })
    }

    /// The bound address, with the actual port when bound to port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, Error> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` fires, then wait for in-flight
    /// connections to finish and log their records.
    pub async fn run_until_shutdown(
        self,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<NodeSummary, Error> {
        let mut connections = JoinSet::new();

        tracing::info!("storage node ready, accepting connections");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let shared = self.shared.clone();
                        connections.spawn(serve_connection(shared, stream, peer));
                    }
                    Err(e) => {
                        // Usually transient (e.g. descriptor exhaustion)
                        tracing::warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                },
                Some(joined) = connections.join_next(), if !connections.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "connection task failed");
                    }
                }
            }
        }

        drop(self.listener);
        tracing::info!(in_flight = connections.len(), "shutdown signal received, draining connections");
        while let Some(joined) = connections.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "connection task failed");
            }
        }

        let metrics = &self.shared.metrics;
        let summary = NodeSummary {
            engine_mode: self.engine_mode,
            process_cpu_usage: metrics.process_cpu_usage(self.shared.handler.cpus()),
            uptime_secs: metrics.uptime().as_secs_f64(),
            requests_total: metrics.total_requests(),
            requests_failed: metrics.failed_requests(),
            bytes_received: metrics.total_bytes_received(),
            bytes_sent: metrics.total_bytes_sent(),
        };

        tracing::info!(
            total_requests = summary.requests_total,
            failed = summary.requests_failed,
            bytes_received = summary.bytes_received,
            bytes_sent = summary.bytes_sent,
            process_cpu_usage = summary.process_cpu_usage,
            uptime_secs = summary.uptime_secs,
            "storage node stopped"
        );

        Ok(summary)
    }
}

impl std::fmt::Debug for StorageNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageNode")
            .field("local_addr", &self.listener.local_addr().ok())
            .field("engine_mode", &self.engine_mode)
            .finish()
    }
}

/// What is known about a request so far, kept even when it fails.
#[derive(Debug)]
struct Exchange {
    query_id: String,
    cpu: CpuTimes,
    received: usize,
    sent: usize,
}

async fn serve_connection(shared: Arc<Shared>, mut stream: TcpStream, peer: SocketAddr) {
    let started = Instant::now();
    let mut exchange = Exchange {
        query_id: UNKNOWN_QUERY_ID.to_string(),
        cpu: CpuTimes::default(),
        received: 0,
        sent: 0,
    };

    let result = exchange_once(&shared, &mut stream, &mut exchange).await;
    let wall = started.elapsed();

    match &result {
        Ok(response) => {
            shared.metrics.record_success(exchange.received, exchange.sent);
            tracing::debug!(
                query_id = %exchange.query_id,
                peer = %peer,
                rows = response.rows_returned,
                scanned = response.scanned_rows,
                "query answered"
            );
        }
        Err(e) => {
            shared.metrics.record_failure(exchange.received, exchange.sent);
            tracing::error!(query_id = %exchange.query_id, peer = %peer, error = %e, "request failed");
        }
    }

    // The log append writes and flushes a file under a lock
    let handler = shared.handler.clone();
    let response = result.ok();
    let Exchange { query_id, cpu, .. } = exchange;
    let appended = tokio::task::spawn_blocking(move || {
        handler.record(&query_id, response.as_ref(), cpu, wall);
    })
    .await;
    if let Err(e) = appended {
        tracing::error!(peer = %peer, error = %e, "result log task failed");
    }
}

async fn exchange_once(
    shared: &Shared,
    stream: &mut TcpStream,
    exchange: &mut Exchange,
) -> Result<Response, Error> {
    let payload = timeout(shared.io_timeout, read_frame(stream, shared.max_message_size))
        .await
        .map_err(|_| Error::Timeout("request read"))??;
    exchange.received = LENGTH_PREFIX_SIZE + payload.len();

    let handler = shared.handler.clone();
    let (handled, cpu) = tokio::task::spawn_blocking(move || {
        let sampler = CpuSampler::start(Scope::Thread);
        let handled = handler.handle(&payload);
        (handled, sampler.cpu_elapsed())
    })
    .await
    .map_err(|e| Error::Transport(format!("handler task failed: {}", e)))?;

    exchange.query_id = handled.query_id;
    exchange.cpu = cpu;
    let response = handled.result?;

    exchange.sent = timeout(
        shared.io_timeout,
        write_frame(stream, &response.payload, shared.max_message_size),
    )
    .await
    .map_err(|_| Error::Timeout("response write"))??;
    stream.shutdown().await?;

    Ok(response)
}
