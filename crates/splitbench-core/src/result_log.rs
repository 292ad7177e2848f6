//! Append-only CSV result logs.
//!
//! A log is created once at node startup and shared by reference with every
//! request handler. Appends are serialised through a single mutex so
//! concurrent handlers never interleave partial lines.

use std::fs::File;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::error::Error;
use crate::record::CsvRecord;

/// A timestamped file name: `<prefix>_<YYYYmmdd_HHMMSS>.<extension>`.
pub fn timestamped_file_name(prefix: &str, extension: &str) -> String {
    format!(
        "{}_{}.{}",
        prefix,
        chrono::Local::now().format("%Y%m%d_%H%M%S"),
        extension
    )
}

/// A CSV log holding records of one type.
pub struct ResultLog<R: CsvRecord> {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
    rows: AtomicU64,
    _record: PhantomData<fn(&R)>,
}

impl<R: CsvRecord> ResultLog<R> {
    /// Create a fresh timestamped log in `dir`, creating the directory if needed.
    pub fn create(dir: &Path, prefix: &str) -> Result<Self, Error> {
        std::fs::create_dir_all(dir)?;
        Self::create_at(dir.join(timestamped_file_name(prefix, "csv")))
    }

    /// Create (or truncate) a log at an exact path and write the header.
    pub fn create_at(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        let mut writer = csv::WriterBuilder::new()
            .terminator(csv::Terminator::Any(b'\n'))
            .from_path(&path)?;
        writer.write_record(R::HEADER)?;
        writer.flush()?;

        tracing::debug!(path = %path.display(), "result log created");

        Ok(Self {
            path,
            writer: Mutex::new(writer),
            rows: AtomicU64::new(0),
            _record: PhantomData,
        })
    }

    /// Append one record and flush it to disk.
    pub fn append(&self, record: &R) -> Result<(), Error> {
        let fields = record.fields();
        let mut writer = self.writer.lock();
        writer.write_record(&fields)?;
        writer.flush()?;
        self.rows.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Path of the log file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records appended (header excluded).
    pub fn rows_written(&self) -> u64 {
        self.rows.load(Ordering::Relaxed)
    }
}

impl<R: CsvRecord> std::fmt::Debug for ResultLog<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultLog")
            .field("path", &self.path)
            .field("rows", &self.rows_written())
            .finish()
    }
}
