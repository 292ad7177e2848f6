//! End-to-end tests: a real Storage Node on loopback driven by the runner.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use splitbench_compute::{ComputeConfig, Runner};
use splitbench_proto::Value;
use splitbench_storage::{EngineMode, NodeSummary, StorageConfig, StorageNode};

const LINEITEM: &str = "\
1|155190|7706|1|17|21168.23|0.04|0.02|N|O|1996-03-13|
1|67310|7311|2|36|45983.16|0.09|0.06|N|O|1996-04-12|
1|63700|3701|3|8|13309.60|0.10|0.02|N|O|1996-01-29|
2|106170|1191|1|38|44694.46|0.00|0.05|N|O|1997-01-28|
3|4297|1798|1|45|54058.05|0.06|0.00|R|F|1994-02-02|
3|19036|6540|2|3|2895.99|0.10|0.02|R|F|1993-11-09|
4|88035|5560|1|30|30690.90|0.03|0.08|N|O|1996-01-10|
5|108570|8571|1|5|7939.85|0.02|0.04|R|F|1994-10-31|
";

struct Storage {
    addr: SocketAddr,
    shutdown: broadcast::Sender<()>,
    task: tokio::task::JoinHandle<Result<NodeSummary, splitbench_storage::Error>>,
    results: PathBuf,
}

impl Storage {
    async fn start(root: &Path, mode: EngineMode, scale_factor: u64) -> Self {
        let data = root.join("data");
        std::fs::create_dir_all(&data).unwrap();
        std::fs::write(data.join("lineitem.tbl"), LINEITEM).unwrap();

        let results = root.join("storage-results");
        let config = StorageConfig::new(0)
            .with_bind_address("127.0.0.1")
            .with_engine_mode(mode)
            .with_pool_size(2)
            .with_scale_factor(scale_factor)
            .with_dataset_dir(&data)
            .with_results_dir(&results)
            .with_io_timeout(Duration::from_secs(10));

        let handler = Arc::new(splitbench_storage::prepare(&config).unwrap());
        let node = StorageNode::bind(&config, handler).await.unwrap();
        let addr = node.local_addr().unwrap();

        let (shutdown, rx) = broadcast::channel(1);
        let task = tokio::spawn(node.run_until_shutdown(rx));
        Self {
            addr,
            shutdown,
            task,
            results,
        }
    }

    async fn stop(self) -> NodeSummary {
        self.shutdown.send(()).unwrap();
        self.task.await.unwrap().unwrap()
    }

    fn log_lines(&self) -> Vec<String> {
        read_single_csv(&self.results, "storage_results_")
    }
}

fn read_single_csv(dir: &Path, prefix: &str) -> Vec<String> {
    let path = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .find(|path| {
            path.file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with(prefix)
        })
        .unwrap();
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

fn write_queries(dir: &Path, queries: &[(&str, &str)]) {
    std::fs::create_dir_all(dir).unwrap();
    for (name, body) in queries {
        std::fs::write(dir.join(name), format!("-- {}\n{}\n", name, body)).unwrap();
    }
}

fn compute_config(storage: &Storage, root: &Path) -> ComputeConfig {
    ComputeConfig::new("127.0.0.1", storage.addr.port(), root.join("queries"))
        .with_results_dir(root.join("compute-results"))
        .with_response_timeout(Duration::from_secs(10))
}

const REVENUE: &str = "SELECT column06 AS revenue FROM lineitem WHERE column04 < 6 ORDER BY column06";

#[tokio::test]
async fn test_corpus_runs_in_name_order() {
    let root = tempfile::tempdir().unwrap();
    let storage = Storage::start(root.path(), EngineMode::Pooled, 1).await;
    write_queries(
        &root.path().join("queries"),
        &[
            ("query6_2.sql", REVENUE),
            ("query6_10.sql", "SELECT count(*) FROM lineitem"),
            ("query6_1.sql", REVENUE),
            ("notes.txt", "SELECT 0"),
        ],
    );

    let runner = Runner::new(compute_config(&storage, root.path())).unwrap();
    let summary = runner.run().await;

    assert_eq!(summary.total_queries, 3);
    assert_eq!(summary.failed_queries, 0);
    assert_eq!(summary.total_returned_rows, 2 + 1 + 2);
    assert_eq!(summary.total_scanned_rows, 3 * 6_001_215);
    assert!(summary.execution_time > 0.0);
    assert!(summary.throughput > 0.0);
    assert!(summary.total_data_size > 0);

    let lines = read_single_csv(&root.path().join("compute-results"), "compute_results_");
    assert_eq!(
        lines[0],
        "QueryFile,ReturnedRows,ScannedRows,DataTransferTime,DataSize,ServerQueryTime,CPUUsage,Throughput"
    );
    let files: Vec<_> = lines[1..]
        .iter()
        .map(|line| line.split(',').next().unwrap().to_string())
        .collect();
    assert_eq!(files, vec!["query6_1.sql", "query6_10.sql", "query6_2.sql"]);

    storage.stop().await;
}

#[tokio::test]
async fn test_scanned_rows_follow_scale_factor() {
    for (scale_factor, expected) in [(1u64, 6_001_215u64), (10, 60_012_150)] {
        let root = tempfile::tempdir().unwrap();
        let storage = Storage::start(root.path(), EngineMode::Serialized, scale_factor).await;
        write_queries(&root.path().join("queries"), &[("query6_1.sql", REVENUE)]);

        let runner = Runner::new(compute_config(&storage, root.path())).unwrap();
        let outcome = runner
            .run_query(&root.path().join("queries").join("query6_1.sql"))
            .await;

        assert!(!outcome.failed);
        assert_eq!(outcome.envelope.scanned_rows, expected);
        assert_eq!(outcome.record.scanned_rows, expected);
        // Only two rows satisfy the predicate, the estimate is independent of that
        assert_eq!(outcome.record.returned_rows, 2);

        storage.stop().await;
    }
}

#[tokio::test]
async fn test_queries_reading_flat_files_by_path() {
    let root = tempfile::tempdir().unwrap();
    let storage = Storage::start(root.path(), EngineMode::Pooled, 1).await;
    let source = root.path().join("data").join("lineitem.tbl");
    let query = format!(
        "
        SELECT
            column06 AS revenue 
        FROM
            read_csv_auto('{}', delim='|')
        WHERE
            column04 < 6;
        ",
        source.display()
    );
    write_queries(&root.path().join("queries"), &[("query6_1.sql", query.as_str())]);

    let runner = Runner::new(compute_config(&storage, root.path())).unwrap();
    let summary = runner.run().await;

    assert_eq!(summary.failed_queries, 0);
    assert_eq!(summary.total_returned_rows, 2);
    assert_eq!(summary.total_scanned_rows, 6_001_215);

    let node = storage.stop().await;
    assert_eq!(node.requests_failed, 0);
}

#[tokio::test]
async fn test_same_query_twice_returns_identical_rows() {
    let root = tempfile::tempdir().unwrap();
    let storage = Storage::start(root.path(), EngineMode::Pooled, 1).await;
    write_queries(&root.path().join("queries"), &[("query6_1.sql", REVENUE)]);

    let runner = Runner::new(compute_config(&storage, root.path())).unwrap();
    let path = root.path().join("queries").join("query6_1.sql");
    let first = runner.run_query(&path).await;
    let second = runner.run_query(&path).await;

    assert_eq!(
        first.envelope.rows,
        vec![vec![Value::Float64(0.02)], vec![Value::Float64(0.1)]]
    );
    assert_eq!(first.envelope.rows, second.envelope.rows);

    storage.stop().await;
}

#[tokio::test]
async fn test_failed_query_does_not_abort_run() {
    let root = tempfile::tempdir().unwrap();
    let storage = Storage::start(root.path(), EngineMode::Pooled, 1).await;
    write_queries(
        &root.path().join("queries"),
        &[
            ("query6_1.sql", REVENUE),
            ("query6_2.sql", "SELECT * FROM no_such_table"),
            ("query6_3.sql", REVENUE),
        ],
    );

    let runner = Runner::new(compute_config(&storage, root.path())).unwrap();
    let summary = runner.run().await;

    assert_eq!(summary.total_queries, 3);
    assert_eq!(summary.failed_queries, 1);
    assert_eq!(summary.total_returned_rows, 4);

    let lines = read_single_csv(&root.path().join("compute-results"), "compute_results_");
    assert_eq!(lines.len(), 4);
    assert!(lines[2].starts_with("query6_2.sql,0,0,"));

    let node = storage.stop().await;
    assert_eq!(node.requests_total, 3);
    assert_eq!(node.requests_failed, 1);
}

#[tokio::test]
async fn test_storage_log_has_one_row_per_connection() {
    let root = tempfile::tempdir().unwrap();
    let storage = Storage::start(root.path(), EngineMode::Pooled, 1).await;
    write_queries(
        &root.path().join("queries"),
        &[
            ("query6_1.sql", REVENUE),
            ("query6_2.sql", REVENUE),
            ("query6_3.sql", "SELECT * FROM no_such_table"),
        ],
    );

    let runner = Runner::new(compute_config(&storage, root.path())).unwrap();
    runner.run().await;

    let lines = storage.log_lines();
    assert_eq!(
        lines[0],
        "QueryID,ExecutionTime,RowsReturned,ScannedRows,CPUUsage,WallClockTime"
    );
    assert_eq!(lines.len(), 4);

    let cpus = splitbench_core::logical_cpus() as f64;
    for line in &lines[1..] {
        let fields: Vec<_> = line.split(',').collect();
        let execution_time: f64 = fields[1].parse().unwrap();
        let cpu_usage: f64 = fields[4].parse().unwrap();
        assert!(execution_time >= 0.0);
        assert!((0.0..=100.0 * cpus).contains(&cpu_usage));
    }

    let ids: Vec<_> = lines[1..]
        .iter()
        .map(|line| line.split(',').next().unwrap().to_string())
        .collect();
    assert_eq!(ids, vec!["1", "2", "3"]);
    assert!(lines[3].starts_with("3,0.0000,0,0,"));

    storage.stop().await;
}

#[tokio::test]
async fn test_run_persists_summary() {
    let root = tempfile::tempdir().unwrap();
    let storage = Storage::start(root.path(), EngineMode::Pooled, 1).await;
    write_queries(&root.path().join("queries"), &[("query6_1.sql", REVENUE)]);

    let config = compute_config(&storage, root.path());
    let summary = splitbench_compute::run_with(config).await.unwrap();
    assert_eq!(summary.total_queries, 1);

    let written: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(root.path().join("compute-results").join("benchmark_metrics.json"))
            .unwrap(),
    )
    .unwrap();
    assert_eq!(written["total_scanned_rows"], 6_001_215);
    assert!(written["ThroughPut"].as_f64().unwrap() > 0.0);

    storage.stop().await;
}
