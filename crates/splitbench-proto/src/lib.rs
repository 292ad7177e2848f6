//! Splitbench protocol types and serialization.
//!
//! This crate defines what travels between the Compute Node and the Storage
//! Node.
//!
//! # Modules
//!
//! - [`value`] - Scalar cell values and rows
//! - [`envelope`] - Query request and result envelope
//! - [`framing`] - Length-prefix framing and async frame I/O
//! - [`error`] - Protocol error types
//!
//! # Wire format
//!
//! ```text
//! compute -> storage : [len u32 BE][UTF-8 query text]
//! storage -> compute : [len u32 BE][rkyv ResultEnvelope]
//! ```
//!
//! A failed request produces no response frame; the server closes the
//! connection instead.

pub mod envelope;
pub mod error;
pub mod framing;
pub mod value;

pub use envelope::{QueryRequest, ResultEnvelope};
pub use error::Error;
pub use value::{Row, Value};
