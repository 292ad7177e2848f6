//! Analytical engine handle.
//!
//! Every request handler shares one [`SqliteEngine`]. How concurrent
//! executions reach SQLite is an explicit choice made at startup:
//!
//! - [`EngineMode::Serialized`]: one connection behind a mutex; executions run
//!   one at a time.
//! - [`EngineMode::Pooled`]: a bounded pool of independent connections to the
//!   same shared-cache in-memory database; a request checks one out and blocks
//!   while all are busy.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};

use splitbench_proto::{Row, Value};

use crate::error::Error;

static DATABASE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Concurrency discipline for the shared engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EngineMode {
    /// A single connection; a mutex serialises every execution.
    Serialized,
    /// A bounded pool of connections checked out per request.
    Pooled,
}

impl EngineMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineMode::Serialized => "serialized",
            EngineMode::Pooled => "pooled",
        }
    }
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine construction options.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub mode: EngineMode,
    /// Connections in the pool. Ignored in serialized mode.
    pub pool_size: usize,
    /// Helper threads SQLite may use per statement.
    pub threads: usize,
}

impl EngineConfig {
    pub fn new(mode: EngineMode, pool_size: usize, threads: usize) -> Self {
        Self {
            mode,
            pool_size: pool_size.max(1),
            threads,
        }
    }

    /// Number of connections the engine will hold.
    pub fn connection_count(&self) -> usize {
        match self.mode {
            EngineMode::Serialized => 1,
            EngineMode::Pooled => self.pool_size.max(1),
        }
    }
}

/// Rows produced by one execution plus the time spent executing.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub rows: Vec<Row>,
    pub elapsed: Duration,
}

/// Something that can answer a query with rows.
pub trait QueryEngine: Send + Sync {
    /// Execute `sql` and fetch every result row.
    ///
    /// `elapsed` covers execution and fetching only.
    fn execute(&self, sql: &str) -> Result<Execution, Error>;

    /// The concurrency discipline in force.
    fn mode(&self) -> EngineMode;
}

/// SQLite-backed engine over a shared-cache in-memory database.
pub struct SqliteEngine {
    uri: String,
    mode: EngineMode,
    slots: Mutex<Vec<Connection>>,
    available: Condvar,
    size: usize,
}

impl SqliteEngine {
    /// Open an engine with the configured number of connections.
    pub fn open(config: &EngineConfig) -> Result<Self, Error> {
        let uri = format!(
            "file:splitbench-{}-{}?mode=memory&cache=shared",
            std::process::id(),
            DATABASE_SEQ.fetch_add(1, Ordering::Relaxed)
        );

        let size = config.connection_count();
        let mut connections = Vec::with_capacity(size);
        for _ in 0..size {
            connections.push(open_connection(&uri, config.threads)?);
        }

        tracing::info!(
            mode = %config.mode,
            connections = size,
            threads = config.threads,
            "analytical engine opened"
        );

        Ok(Self {
            uri,
            mode: config.mode,
            slots: Mutex::new(connections),
            available: Condvar::new(),
            size,
        })
    }

    /// Run `f` with exclusive use of one connection.
    ///
    /// Blocks while every connection is checked out.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> T) -> T {
        let checkout = self.checkout();
        f(checkout.connection())
    }

    /// Number of connections held by the engine.
    pub fn size(&self) -> usize {
        self.size
    }

    fn checkout(&self) -> Checkout<'_> {
        let mut slots = self.slots.lock();
        loop {
            if let Some(conn) = slots.pop() {
                return Checkout {
                    conn: Some(conn),
                    engine: self,
                };
            }
            self.available.wait(&mut slots);
        }
    }

    fn checkin(&self, conn: Connection) {
        self.slots.lock().push(conn);
        self.available.notify_one();
    }
}

impl QueryEngine for SqliteEngine {
    fn execute(&self, sql: &str) -> Result<Execution, Error> {
        self.with_connection(|conn| {
            let start = Instant::now();
            let rows = fetch_all(conn, sql)?;
            Ok(Execution {
                rows,
                elapsed: start.elapsed(),
            })
        })
    }

    fn mode(&self) -> EngineMode {
        self.mode
    }
}

impl std::fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine")
            .field("uri", &self.uri)
            .field("mode", &self.mode)
            .field("size", &self.size)
            .finish()
    }
}

/// A connection on loan from the engine, returned on drop.
struct Checkout<'a> {
    conn: Option<Connection>,
    engine: &'a SqliteEngine,
}

impl Checkout<'_> {
    fn connection(&self) -> &Connection {
        // Only `drop` takes the connection out.
        self.conn.as_ref().expect("connection present until drop")
    }
}

impl Drop for Checkout<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.engine.checkin(conn);
        }
    }
}

fn open_connection(uri: &str, threads: usize) -> Result<Connection, Error> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_SHARED_CACHE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(uri, flags)?;
    {
        // Depending on the build, PRAGMA threads may or may not echo a row.
        let mut stmt = conn.prepare(&format!("PRAGMA threads = {}", threads))?;
        let mut rows = stmt.query([])?;
        rows.next()?;
    }
    Ok(conn)
}

fn fetch_all(conn: &Connection, sql: &str) -> Result<Vec<Row>, Error> {
    let mut stmt = conn.prepare(sql)?;
    let columns = stmt.column_count();
    let mut rows = stmt.query([])?;

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        let mut values = Vec::with_capacity(columns);
        for i in 0..columns {
            values.push(to_value(row.get_ref(i)?));
        }
        out.push(values);
    }
    Ok(out)
}

fn to_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int64(i),
        ValueRef::Real(f) => Value::Float64(f),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
    }
}
