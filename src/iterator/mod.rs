//! Table abstraction and iterators for point lookups and range scans.
//!
//! Every data source (a memtable, an on-disk table, the memtable pool)
//! implements [`Table`], which yields an ascending stream of [`Record`]s
//! starting at a key. The [`MergeIterator`] combines any number of such
//! streams into one record per key, keeping the newest version; the
//! [`RangeIterator`] projects that onto live `(key, value)` pairs.

mod merge_iterator;
mod range;

pub use merge_iterator::MergeIterator;
pub use range::RangeIterator;

use std::sync::Arc;

use crate::types::{Generation, Record};
use crate::Result;

/// Boxed, owned stream of records in ascending key order.
pub type RecordIterator = Box<dyn Iterator<Item = Result<Record>> + Send>;

/// A sorted source of versioned records.
pub trait Table: Send + Sync {
    /// Records with key >= `from`, ascending.
    ///
    /// The stream owns a reference to the table and is not resumable;
    /// call `scan` again to restart.
    fn scan(self: Arc<Self>, from: &[u8]) -> RecordIterator;

    /// Approximate size of the table's content in bytes.
    fn approximate_size(&self) -> u64;

    /// Generation of the table.
    fn generation(&self) -> Generation;
}

/// A stream over records already held in memory.
#[cfg(test)]
pub(crate) fn vec_source(records: Vec<Record>) -> RecordIterator {
    Box::new(records.into_iter().map(Ok))
}
