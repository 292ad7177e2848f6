//! Scalar value types carried in result rows.

use rkyv::{Archive, Deserialize, Serialize};

/// A single scalar produced by the analytical engine.
///
/// Rows are heterogeneous, so every cell carries its own type tag. The
/// variants mirror the storage classes an embedded SQL engine reports.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit floating point.
    Float64(f64),
    /// UTF-8 string.
    String(String),
    /// Binary data.
    Bytes(Vec<u8>),
}

/// One result row: an ordered sequence of scalars.
pub type Row = Vec<Value>;
