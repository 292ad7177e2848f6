//! Request and response envelopes exchanged between the nodes.
//!
//! A request is the literal query text, sent as UTF-8 inside one frame. A
//! response is an rkyv-encoded [`ResultEnvelope`]. Errors are never encoded
//! in-band: a server that fails a request closes the connection without a
//! response frame, and the requester treats that as a failed query.

use std::time::Duration;

use rkyv::{Archive, Deserialize, Serialize};

use crate::value::Row;
use crate::Error;

/// A query request: the raw query text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub text: String,
}

impl QueryRequest {
    /// Create a request for the given query text.
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    /// Encode the request payload (UTF-8 bytes, unframed).
    pub fn to_bytes(&self) -> Vec<u8> {
        self.text.as_bytes().to_vec()
    }

    /// Decode a request payload. Surrounding whitespace is trimmed.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(payload)
            .map_err(|e| Error::Deserialization(format!("query is not valid UTF-8: {}", e)))?;
        Ok(Self::new(text.trim()))
    }
}

/// The response to one query.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct ResultEnvelope {
    /// Result rows in engine order.
    pub rows: Vec<Row>,
    /// Estimated number of rows the engine scanned.
    pub scanned_rows: u64,
    /// Server-measured execution time in seconds.
    pub execution_time_secs: f64,
}

impl ResultEnvelope {
    /// Create a new envelope.
    pub fn new(rows: Vec<Row>, scanned_rows: u64, execution_time: Duration) -> Self {
        Self {
            rows,
            scanned_rows,
            execution_time_secs: execution_time.as_secs_f64(),
        }
    }

    /// The zero-result envelope a requester substitutes for a failed query.
    pub fn failed() -> Self {
        Self {
            rows: Vec::new(),
            scanned_rows: 0,
            execution_time_secs: 0.0,
        }
    }

    /// Number of rows returned.
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Server execution time as a duration.
    pub fn execution_time(&self) -> Duration {
        Duration::try_from_secs_f64(self.execution_time_secs).unwrap_or_default()
    }

    /// Serialize into an rkyv payload (unframed).
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self).map_err(|e| {
            Error::Serialization(format!("failed to serialize result envelope: {}", e))
        })?;
        Ok(bytes.to_vec())
    }

    /// Deserialize from an rkyv payload, validating it first.
    pub fn from_bytes(payload: &[u8]) -> Result<Self, Error> {
        // Copy to aligned buffer for rkyv
        let mut aligned: rkyv::util::AlignedVec<16> = rkyv::util::AlignedVec::new();
        aligned.extend_from_slice(payload);

        rkyv::from_bytes::<ResultEnvelope, rkyv::rancor::Error>(&aligned).map_err(|e| {
            Error::Deserialization(format!("failed to deserialize result envelope: {}", e))
        })
    }
}
