//! Handle-keyed persistent metric cache.
//!
//! Entries are partitioned into one segment per project. Each segment is an
//! in-memory ordered map of msgpack-encoded [`MetricSource`] records, optionally
//! backed by a segment file in a state directory.
//!
//! [`MetricSource`]: strata_core::MetricSource

pub mod cache;
pub mod error;
pub mod segment;

pub use cache::MetricCache;
pub use error::StorageError;
pub use segment::{segment_file_name, Segment, FORMAT_VERSION};
