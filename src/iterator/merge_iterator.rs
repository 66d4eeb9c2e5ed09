//! Merge iterator for combining multiple sorted record streams.
//!
//! The merge iterator keeps a min-heap holding the head of every source.
//! All heads that share the smallest key are popped together and collapsed
//! into the single authoritative version (greatest timestamp, then highest
//! generation). Tombstones are kept; callers decide whether to strip them.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::types::Record;
use crate::Result;

use super::RecordIterator;

/// Head of one source inside the heap.
struct HeapEntry {
    record: Record,
    source: usize,
}

// For the min-heap, we need reverse ordering (smallest key first)
impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .record
            .key
            .cmp(&self.record.key)
            .then_with(|| other.source.cmp(&self.source))
    }
}

/// Merge iterator yielding one record per key in ascending key order.
pub struct MergeIterator {
    /// Underlying sources.
    sources: Vec<RecordIterator>,
    /// Min-heap of source heads.
    heap: BinaryHeap<HeapEntry>,
    /// Error raised while filling the heap, reported on the next call.
    pending_error: Option<crate::Error>,
    /// Set once an error has been returned; the iterator is then exhausted.
    failed: bool,
}

impl MergeIterator {
    /// Create a new merge iterator from multiple sources.
    pub fn new(sources: Vec<RecordIterator>) -> Self {
        let mut iter = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            pending_error: None,
            failed: false,
        };

        for index in 0..iter.sources.len() {
            if let Err(e) = iter.refill(index) {
                iter.pending_error = Some(e);
                break;
            }
        }

        iter
    }

    /// Pull the next record of `source` into the heap.
    fn refill(&mut self, source: usize) -> Result<()> {
        if let Some(next) = self.sources[source].next() {
            let record = next?;
            self.heap.push(HeapEntry { record, source });
        }
        Ok(())
    }

    /// Pop every head sharing the smallest key and collapse them.
    fn advance(&mut self) -> Result<Option<Record>> {
        let top = match self.heap.pop() {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let mut winner = top.record;
        self.refill(top.source)?;

        while let Some(head) = self.heap.peek() {
            if head.record.key != winner.key {
                break;
            }
            if let Some(entry) = self.heap.pop() {
                winner = winner.newer(entry.record);
                self.refill(entry.source)?;
            }
        }

        Ok(Some(winner))
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(err) = self.pending_error.take() {
            self.failed = true;
            return Some(Err(err));
        }

        match self.advance() {
            Ok(record) => record.map(Ok),
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iterator::vec_source;
    use crate::types::Cell;
    use bytes::Bytes;

    fn present(key: &str, value: &str, ts: u64, generation: u64) -> Record {
        Record::new(
            Bytes::copy_from_slice(key.as_bytes()),
            Cell::present(Bytes::copy_from_slice(value.as_bytes()), ts),
            generation,
        )
    }

    fn tombstone(key: &str, ts: u64, generation: u64) -> Record {
        Record::new(
            Bytes::copy_from_slice(key.as_bytes()),
            Cell::tombstone(ts),
            generation,
        )
    }

    fn keys(iter: MergeIterator) -> Vec<Bytes> {
        iter.map(|r| r.unwrap().key).collect()
    }

    #[test]
    fn test_merge_iterator_single_source() {
        let source = vec_source(vec![
            present("a", "1", 1, 0),
            present("b", "2", 1, 0),
            present("c", "3", 1, 0),
        ]);
        let iter = MergeIterator::new(vec![source]);

        assert_eq!(
            keys(iter),
            vec![Bytes::from("a"), Bytes::from("b"), Bytes::from("c")]
        );
    }

    #[test]
    fn test_merge_iterator_multiple_sources() {
        let source1 = vec_source(vec![
            present("a", "", 1, 0),
            present("c", "", 1, 0),
            present("e", "", 1, 0),
        ]);
        let source2 = vec_source(vec![
            present("b", "", 1, 1),
            present("d", "", 1, 1),
            present("f", "", 1, 1),
        ]);
        let iter = MergeIterator::new(vec![source1, source2]);

        let got: Vec<_> = keys(iter).iter().map(|k| k[0]).collect();
        assert_eq!(got, b"abcdef".to_vec());
    }

    #[test]
    fn test_merge_iterator_collapses_versions() {
        let older = vec_source(vec![
            present("a", "old", 5, 1),
            present("b", "only", 15, 1),
            present("c", "old", 5, 1),
        ]);
        let newer = vec_source(vec![present("a", "new", 10, 2), tombstone("c", 10, 2)]);
        let iter = MergeIterator::new(vec![older, newer]);

        let records: Vec<Record> = iter.map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].cell, Cell::present(Bytes::from("new"), 10));
        assert_eq!(records[1].cell, Cell::present(Bytes::from("only"), 15));
        assert_eq!(records[2].cell, Cell::tombstone(10));
    }

    #[test]
    fn test_merge_iterator_generation_breaks_ties() {
        let low = vec_source(vec![present("k", "low", 7, 3)]);
        let high = vec_source(vec![present("k", "high", 7, 4)]);

        // Source order must not matter.
        for sources in [vec![low, high], {
            let low = vec_source(vec![present("k", "low", 7, 3)]);
            let high = vec_source(vec![present("k", "high", 7, 4)]);
            vec![high, low]
        }] {
            let records: Vec<Record> = MergeIterator::new(sources).map(|r| r.unwrap()).collect();
            assert_eq!(records.len(), 1);
            assert_eq!(records[0].generation, 4);
            assert_eq!(records[0].cell.data(), Some(&Bytes::from("high")));
        }
    }

    #[test]
    fn test_merge_iterator_empty_sources() {
        let iter = MergeIterator::new(vec![vec_source(vec![]), vec_source(vec![])]);
        assert_eq!(iter.count(), 0);

        let iter = MergeIterator::new(vec![]);
        assert_eq!(iter.count(), 0);
    }

    #[test]
    fn test_merge_iterator_stops_after_error() {
        let failing: RecordIterator = Box::new(
            vec![
                Ok(present("a", "1", 1, 0)),
                Err(crate::Error::corruption("bad record")),
                Ok(present("z", "1", 1, 0)),
            ]
            .into_iter(),
        );
        let mut iter = MergeIterator::new(vec![failing]);

        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }
}
