//! Core types for quorumkv.

use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use parking_lot::Mutex;

/// Version timestamp of a write. Always positive for cells produced by this crate.
pub type Timestamp = u64;

/// Table generation number.
pub type Generation = u64;

/// A versioned value.
///
/// `Absent` is the lookup sentinel for "no record"; it is never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// Live data written at `timestamp`.
    Present { data: Bytes, timestamp: Timestamp },
    /// Deletion marker written at `timestamp`.
    Tombstone { timestamp: Timestamp },
    /// No version of the key exists.
    Absent,
}

impl Cell {
    /// Create a present cell.
    pub fn present(data: impl Into<Bytes>, timestamp: Timestamp) -> Self {
        Cell::Present {
            data: data.into(),
            timestamp,
        }
    }

    /// Create a tombstone.
    pub fn tombstone(timestamp: Timestamp) -> Self {
        Cell::Tombstone { timestamp }
    }

    /// Version timestamp, or `None` for `Absent`.
    pub fn timestamp(&self) -> Option<Timestamp> {
        match self {
            Cell::Present { timestamp, .. } | Cell::Tombstone { timestamp } => Some(*timestamp),
            Cell::Absent => None,
        }
    }

    /// The data if this cell is present.
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Cell::Present { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Consume the cell, returning the data if present.
    pub fn into_data(self) -> Option<Bytes> {
        match self {
            Cell::Present { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, Cell::Present { .. })
    }

    pub fn is_tombstone(&self) -> bool {
        matches!(self, Cell::Tombstone { .. })
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Cell::Absent)
    }

    /// Bytes this cell contributes to a memtable's size estimate.
    pub fn data_len(&self) -> usize {
        self.data().map_or(0, |d| d.len())
    }

    /// Last-write-wins resolution over a set of versions.
    ///
    /// Picks the greatest timestamp among present and tombstoned cells and
    /// returns `Absent` when none of them carries a version.
    pub fn newest<I>(cells: I) -> Cell
    where
        I: IntoIterator<Item = Cell>,
    {
        cells
            .into_iter()
            .filter(|c| !c.is_absent())
            .max_by_key(|c| c.timestamp())
            .unwrap_or(Cell::Absent)
    }
}

/// A key with one of its physical versions and the generation of the table holding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Bytes,
    pub cell: Cell,
    pub generation: Generation,
}

impl Record {
    /// Create a new record.
    pub fn new(key: impl Into<Bytes>, cell: Cell, generation: Generation) -> Self {
        Self {
            key: key.into(),
            cell,
            generation,
        }
    }

    /// Ordering between two versions of the same key.
    ///
    /// Greater timestamp wins; equal timestamps fall back to the higher generation.
    pub fn version_cmp(&self, other: &Record) -> Ordering {
        self.cell
            .timestamp()
            .cmp(&other.cell.timestamp())
            .then(self.generation.cmp(&other.generation))
    }

    /// Pick the authoritative version of two records for the same key.
    pub fn newer(self, other: Record) -> Record {
        if other.version_cmp(&self) == Ordering::Greater {
            other
        } else {
            self
        }
    }
}

/// Number of low bits of a timestamp reserved for the per-millisecond counter.
const COUNTER_BITS: u32 = 20;
const COUNTER_LIMIT: u64 = 1 << COUNTER_BITS;

/// Source of strictly increasing write timestamps for one process.
///
/// A timestamp is the wall-clock millisecond shifted left by `COUNTER_BITS`
/// plus a counter that resets whenever the millisecond changes. The clock
/// never goes backwards even if the wall clock does. This is not a logical
/// clock across nodes; replicas only agree on order through last-write-wins.
#[derive(Debug, Default)]
pub struct TimestampClock {
    state: Mutex<ClockState>,
}

#[derive(Debug, Default)]
struct ClockState {
    last_millis: u64,
    counter: u64,
}

impl TimestampClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp, strictly greater than every previously returned one.
    pub fn next(&self) -> Timestamp {
        let now = current_millis();
        let mut state = self.state.lock();
        if now > state.last_millis {
            state.last_millis = now;
            state.counter = 0;
        } else {
            state.counter += 1;
            if state.counter == COUNTER_LIMIT {
                // Counter exhausted within one millisecond: borrow the next one.
                state.last_millis += 1;
                state.counter = 0;
            }
        }
        (state.last_millis << COUNTER_BITS) | state.counter
    }

    /// The timestamp corresponding to `age` ago; anything older is before it.
    pub fn cutoff(&self, age: Duration) -> Timestamp {
        let millis = current_millis().saturating_sub(age.as_millis() as u64);
        millis << COUNTER_BITS
    }
}

fn current_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
        .max(1)
}

/// Monotonic generation counter shared by the engine and its memtable pool.
#[derive(Debug)]
pub struct GenerationCounter {
    next: AtomicU64,
}

impl GenerationCounter {
    /// Create a counter whose first allocated generation is `first`.
    pub fn new(first: Generation) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Allocate a fresh generation.
    pub fn allocate(&self) -> Generation {
        self.next.fetch_add(1, AtomicOrdering::SeqCst)
    }

    /// The generation the next allocation will return.
    pub fn peek(&self) -> Generation {
        self.next.load(AtomicOrdering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_accessors() {
        let cell = Cell::present(Bytes::from("v"), 7);
        assert!(cell.is_present());
        assert_eq!(cell.timestamp(), Some(7));
        assert_eq!(cell.data(), Some(&Bytes::from("v")));

        let cell = Cell::tombstone(9);
        assert!(cell.is_tombstone());
        assert_eq!(cell.timestamp(), Some(9));
        assert_eq!(cell.data_len(), 0);

        assert_eq!(Cell::Absent.timestamp(), None);
    }

    #[test]
    fn test_newest_ignores_absent() {
        let winner = Cell::newest(vec![
            Cell::present(Bytes::from("old"), 1),
            Cell::Absent,
            Cell::tombstone(3),
            Cell::present(Bytes::from("mid"), 2),
        ]);
        assert_eq!(winner, Cell::tombstone(3));

        assert_eq!(Cell::newest(vec![Cell::Absent, Cell::Absent]), Cell::Absent);
        assert_eq!(Cell::newest(Vec::new()), Cell::Absent);
    }

    #[test]
    fn test_record_version_order() {
        let a = Record::new(Bytes::from("k"), Cell::present(Bytes::from("a"), 5), 1);
        let b = Record::new(Bytes::from("k"), Cell::present(Bytes::from("b"), 5), 2);
        let c = Record::new(Bytes::from("k"), Cell::tombstone(6), 0);

        // Same timestamp: higher generation wins.
        assert_eq!(a.clone().newer(b.clone()), b);
        assert_eq!(b.clone().newer(a.clone()), b);
        // Greater timestamp wins regardless of generation.
        assert_eq!(b.newer(c.clone()), c);
    }

    #[test]
    fn test_clock_strictly_increasing() {
        let clock = TimestampClock::new();
        let mut last = 0;
        for _ in 0..10_000 {
            let ts = clock.next();
            assert!(ts > last);
            last = ts;
        }
    }

    #[test]
    fn test_clock_cutoff_precedes_new_timestamps() {
        let clock = TimestampClock::new();
        let cutoff = clock.cutoff(Duration::from_secs(1));
        assert!(clock.next() > cutoff);
        assert!(clock.cutoff(Duration::ZERO) >= cutoff);
    }

    #[test]
    fn test_generation_counter() {
        let counter = GenerationCounter::new(5);
        assert_eq!(counter.peek(), 5);
        assert_eq!(counter.allocate(), 5);
        assert_eq!(counter.allocate(), 6);
        assert_eq!(counter.peek(), 7);
    }
}
