//! MemTable - In-memory sorted storage for recent writes.
//!
//! The MemTable is the first destination for all writes. It uses a
//! concurrent skip list so readers and writers never need an external lock.
//!
//! # Design
//!
//! - Uses `crossbeam-skiplist` for lock-free concurrent access
//! - One versioned [`Cell`] per key; a removal stores a tombstone
//! - Size accounting counts key and data bytes and only ever grows
//! - Iteration returns records in ascending key order

pub mod pool;

pub use pool::{FlushJob, MemTablePool};

use std::ops::Bound;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_skiplist::SkipMap;

use crate::iterator::{RecordIterator, Table};
use crate::types::{Cell, Generation, Record, Timestamp};
use crate::Result;

/// MemTable for in-memory sorted storage.
///
/// Thread-safe for concurrent reads and writes.
#[derive(Debug)]
pub struct MemTable {
    /// The underlying skip list.
    table: SkipMap<Bytes, Cell>,

    /// Approximate size of keys and data in bytes.
    approximate_size: AtomicUsize,

    /// Number of writes applied.
    write_count: AtomicUsize,

    /// Smallest timestamp written; `u64::MAX` while empty.
    min_timestamp: AtomicU64,

    /// Generation this table will be flushed as.
    generation: Generation,
}

impl MemTable {
    /// Create a new empty MemTable.
    pub fn new(generation: Generation) -> Self {
        Self {
            table: SkipMap::new(),
            approximate_size: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
            min_timestamp: AtomicU64::new(u64::MAX),
            generation,
        }
    }

    /// Store `data` for `key` at `timestamp`.
    pub fn upsert(&self, key: Bytes, data: Bytes, timestamp: Timestamp) {
        self.apply(key, Cell::present(data, timestamp));
    }

    /// Store a tombstone for `key` at `timestamp`.
    pub fn remove(&self, key: Bytes, timestamp: Timestamp) {
        self.apply(key, Cell::tombstone(timestamp));
    }

    fn apply(&self, key: Bytes, cell: Cell) {
        let entry_size = key.len() + cell.data_len();
        self.approximate_size.fetch_add(entry_size, Ordering::SeqCst);

        // A racing writer holding an older timestamp must not clobber a newer version.
        let timestamp = cell.timestamp();
        if let Some(ts) = timestamp {
            self.min_timestamp.fetch_min(ts, Ordering::SeqCst);
        }
        self.table
            .compare_insert(key, cell, |current| current.timestamp() < timestamp);
        self.write_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Look up the version stored for `key`.
    pub fn get(&self, key: &[u8]) -> Cell {
        self.table
            .get(key)
            .map(|entry| entry.value().clone())
            .unwrap_or(Cell::Absent)
    }

    /// Get approximate size in bytes.
    pub fn approximate_size(&self) -> usize {
        self.approximate_size.load(Ordering::SeqCst)
    }

    /// Get the number of distinct keys.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Check if the memtable is empty.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Oldest timestamp ever written to this table, or `None` if it is empty.
    pub fn min_timestamp(&self) -> Option<Timestamp> {
        match self.min_timestamp.load(Ordering::SeqCst) {
            u64::MAX => None,
            ts => Some(ts),
        }
    }

    /// Get the number of writes applied, overwrites included.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Get the generation.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Iterate from `from` (inclusive).
    pub fn iter_from(self: &Arc<Self>, from: &[u8]) -> MemTableIterator {
        MemTableIterator {
            memtable: Arc::clone(self),
            lower: Bound::Included(Bytes::copy_from_slice(from)),
        }
    }
}

impl Table for MemTable {
    fn scan(self: Arc<Self>, from: &[u8]) -> RecordIterator {
        Box::new(self.iter_from(from))
    }

    fn approximate_size(&self) -> u64 {
        MemTable::approximate_size(self) as u64
    }

    fn generation(&self) -> Generation {
        self.generation
    }
}

/// Owning iterator over MemTable records.
///
/// Each step re-seeks the skip list past the last returned key, so the
/// iterator stays valid while writers keep inserting.
pub struct MemTableIterator {
    memtable: Arc<MemTable>,
    lower: Bound<Bytes>,
}

impl Iterator for MemTableIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        let (key, cell) = {
            let entry = self
                .memtable
                .table
                .range((self.lower.clone(), Bound::Unbounded))
                .next()?;
            (entry.key().clone(), entry.value().clone())
        };
        self.lower = Bound::Excluded(key.clone());
        Some(Ok(Record::new(key, cell, self.memtable.generation)))
    }
}
