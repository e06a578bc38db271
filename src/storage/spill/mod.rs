use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::common::Row;

pub mod disk;
pub mod inmem;
mod merge;
mod run;
pub mod row_serde;

pub use disk::DiskSpillStore;
pub use inmem::InMemSpillStore;
pub use row_serde::{bincode_row_serde, RowSerde};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("spill i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("spill serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("corrupted spill run {path}: {reason}")]
    Corrupted { path: PathBuf, reason: String },
    #[error("malformed buffer key: {0}")]
    MalformedKey(String),
    #[error("spill record {what} of {len} bytes exceeds the run format limit")]
    RecordTooLarge { what: &'static str, len: usize },
}

/// Entries yielded by a prefix scan, in ascending key order.
pub type ScanIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Row), StoreError>> + 'a>;

/// Ordered key-value buffer keyed by raw bytes.
///
/// Implementations may keep part of their content on secondary storage; callers must not
/// assume the content fits in memory.
pub trait SpillStore: Send + fmt::Debug {
    /// Inserts or overwrites the value stored under `key`.
    fn put(&mut self, key: Vec<u8>, value: Row) -> Result<(), StoreError>;

    /// Deletes `key`. Absent keys are a no-op.
    fn remove(&mut self, key: &[u8]) -> Result<(), StoreError>;

    /// Lazily yields all entries whose key starts with `prefix`. The iterator is single-pass.
    fn scan<'a>(&'a self, prefix: &[u8]) -> Result<ScanIter<'a>, StoreError>;

    /// Drops every entry.
    fn clear(&mut self) -> Result<(), StoreError>;

    /// Approximate entry count, including entries shadowed on disk. Diagnostics only.
    fn len_hint(&self) -> usize;
}

pub type DynSpillStore = Box<dyn SpillStore>;
