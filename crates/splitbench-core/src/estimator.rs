//! Scanned-row estimation.
//!
//! The estimate annotates each response for throughput accounting. It is
//! derived from static knowledge of the dataset, not from engine statistics,
//! and makes no accuracy promise.

/// Row count of the TPC-H `lineitem` table at scale factor 1.
pub const LINEITEM_BASE_ROWS: u64 = 6_001_215;

/// Estimates how many rows the engine scans to answer a query.
pub trait ScanEstimator: Send + Sync {
    fn estimate(&self, query: &str) -> u64;
}

/// Sums `base_rows × scale_factor` over every known table the query names.
#[derive(Debug, Clone)]
pub struct TableScanEstimator {
    tables: Vec<(String, u64)>,
    scale_factor: u64,
}

impl TableScanEstimator {
    /// An estimator with no known tables.
    pub fn new(scale_factor: u64) -> Self {
        Self {
            tables: Vec::new(),
            scale_factor,
        }
    }

    /// The default estimator: `lineitem` at the given scale factor.
    pub fn lineitem(scale_factor: u64) -> Self {
        Self::new(scale_factor).with_table("lineitem", LINEITEM_BASE_ROWS)
    }

    /// Register a table by name with its scale-factor-1 row count.
    ///
    /// Names match case-insensitively anywhere in the query text.
    pub fn with_table(mut self, name: impl Into<String>, base_rows: u64) -> Self {
        self.tables.push((name.into().to_lowercase(), base_rows));
        self
    }

    /// Scaled row count for one registered table.
    pub fn table_rows(&self, name: &str) -> Option<u64> {
        let name = name.to_lowercase();
        self.tables
            .iter()
            .find(|(table, _)| *table == name)
            .map(|(_, base)| base.saturating_mul(self.scale_factor))
    }
}

impl ScanEstimator for TableScanEstimator {
    fn estimate(&self, query: &str) -> u64 {
        let lower = query.to_lowercase();
        self.tables
            .iter()
            .filter(|(table, _)| lower.contains(table.as_str()))
            .map(|(_, base)| base.saturating_mul(self.scale_factor))
            .fold(0u64, u64::saturating_add)
    }
}

/// Reports the same estimate for every query.
#[derive(Debug, Clone, Copy)]
pub struct FixedEstimator(pub u64);

impl ScanEstimator for FixedEstimator {
    fn estimate(&self, _query: &str) -> u64 {
        self.0
    }
}
