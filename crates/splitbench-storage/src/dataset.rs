//! Loads delimiter-separated flat files into the engine at startup.
//!
//! Every `*.tbl` file directly under the dataset directory becomes a table
//! named by its stem. Files one level down (`dataset_3/lineitem.tbl`) become
//! `<dir>_<stem>` (`dataset_3_lineitem`). Columns are named `column00`,
//! `column01`, ... in file order.

use std::path::{Path, PathBuf};

use csv::StringRecord;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection};

use crate::error::Error;

/// Extension of flat files picked up by the loader.
pub const FLAT_FILE_EXTENSION: &str = "tbl";

/// Field delimiter of flat files.
pub const FIELD_DELIMITER: u8 = b'|';

/// A table created from one flat file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedTable {
    pub name: String,
    pub source: PathBuf,
    pub columns: usize,
    pub rows: u64,
}

/// Discover flat files under `dir` and pair each with its table name.
///
/// Symlinks are followed. Entries that cannot be inspected are skipped. The
/// result is sorted by table name.
pub fn discover(dir: &Path) -> Result<Vec<(String, PathBuf)>, Error> {
    let mut found = Vec::new();

    for path in read_dir(dir)? {
        if path.is_file() && is_flat_file(&path) {
            found.push((table_name(None, &path), path));
        } else if path.is_dir() {
            let prefix = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            for nested in read_dir(&path)? {
                if nested.is_file() && is_flat_file(&nested) {
                    found.push((table_name(Some(&prefix), &nested), nested));
                }
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Load every flat file under `dir` into `conn`.
pub fn load_dir(conn: &Connection, dir: &Path) -> Result<Vec<LoadedTable>, Error> {
    let tables = discover(dir)?;
    if tables.is_empty() {
        tracing::warn!(dir = %dir.display(), "no flat files found in dataset directory");
    }

    tables
        .into_iter()
        .map(|(name, path)| load_file(conn, &name, &path))
        .collect()
}

/// Load one flat file into a new table inside a single transaction.
pub fn load_file(conn: &Connection, table: &str, path: &Path) -> Result<LoadedTable, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(FIELD_DELIMITER)
        .has_headers(false)
        .flexible(true)
        .quoting(false)
        .from_path(path)
        .map_err(|e| Error::Dataset(format!("failed to open {}: {}", path.display(), e)))?;
    let mut records = reader.records();

    let first = match records.next() {
        Some(record) => record.map_err(|e| read_error(path, e))?,
        None => return Err(Error::Dataset(format!("{} is empty", path.display()))),
    };

    let columns = record_fields(&first).len();
    let quoted = quote_identifier(table);

    let column_defs: Vec<String> = (0..columns).map(column_name).collect();
    let placeholders = vec!["?"; columns].join(", ");

    conn.execute_batch("BEGIN")?;
    let result = (|| -> Result<u64, Error> {
        conn.execute(&format!("DROP TABLE IF EXISTS {}", quoted), [])?;
        conn.execute(
            &format!("CREATE TABLE {} ({})", quoted, column_defs.join(", ")),
            [],
        )?;

        let mut insert = conn.prepare(&format!("INSERT INTO {} VALUES ({})", quoted, placeholders))?;
        insert.execute(params_from_iter(record_fields(&first).into_iter().map(parse_field)))?;
        let mut rows = 1u64;

        for record in records.by_ref() {
            let record = record.map_err(|e| read_error(path, e))?;
            let fields = record_fields(&record);
            if fields.len() != columns {
                let line = record.position().map(|pos| pos.line()).unwrap_or_default();
                return Err(Error::Dataset(format!(
                    "{}: line {} has {} fields, expected {}",
                    path.display(),
                    line,
                    fields.len(),
                    columns
                )));
            }
            insert.execute(params_from_iter(fields.into_iter().map(parse_field)))?;
            rows += 1;
        }
        Ok(rows)
    })();

    let rows = match result {
        Ok(rows) => {
            conn.execute_batch("COMMIT")?;
            rows
        }
        Err(e) => {
            if let Err(rollback) = conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %rollback, "rollback after failed load also failed");
            }
            return Err(e);
        }
    };

    tracing::info!(table, rows, columns, source = %path.display(), "table loaded");

    Ok(LoadedTable {
        name: table.to_string(),
        source: path.to_path_buf(),
        columns,
        rows,
    })
}

/// Column name for a zero-based position: `column00`, `column01`, ...
pub fn column_name(index: usize) -> String {
    format!("column{:02}", index)
}

/// Fields of one record, without the empty field a trailing delimiter leaves.
pub fn record_fields(record: &StringRecord) -> Vec<&str> {
    let mut fields: Vec<&str> = record.iter().collect();
    if fields.len() > 1 && fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    fields
}

/// Type a raw field: INTEGER, then REAL, then TEXT. Empty fields are NULL.
pub fn parse_field(raw: &str) -> SqlValue {
    if raw.is_empty() {
        return SqlValue::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return SqlValue::Integer(i);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return SqlValue::Real(f);
        }
    }
    SqlValue::Text(raw.to_string())
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, Error> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| Error::Dataset(format!("failed to read {}: {}", dir.display(), e)))?;

    Ok(entries
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry.path()),
            Err(e) => {
                tracing::warn!(dir = %dir.display(), error = %e, "skipping unreadable entry");
                None
            }
        })
        .collect())
}

fn read_error(path: &Path, e: csv::Error) -> Error {
    Error::Dataset(format!("failed to read {}: {}", path.display(), e))
}

fn is_flat_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == FLAT_FILE_EXTENSION)
}

pub(crate) fn table_name(prefix: Option<&str>, path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let raw = match prefix {
        Some(prefix) => format!("{}_{}", prefix, stem),
        None => stem,
    };
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

pub(crate) fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
