//! Compactor - executes compaction operations.
//!
//! The compactor takes the engine's on-disk tables and:
//! 1. Creates a scan over every input table
//! 2. Merges them with `MergeIterator`, keeping one version per key
//! 3. Drops tombstones older than the cutoff
//! 4. Writes the output as one new SSTable

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::iterator::{MergeIterator, Table};
use crate::sstable::{write_table, SSTable};
use crate::types::{Generation, Timestamp};
use crate::Result;

/// Statistics from a compaction operation.
#[derive(Debug, Clone, Default)]
pub struct CompactionStats {
    /// Number of input files.
    pub num_input_files: usize,
    /// Total bytes read.
    pub bytes_read: u64,
    /// Total bytes written.
    pub bytes_written: u64,
    /// Number of records written.
    pub entries_written: u64,
    /// Number of expired tombstones dropped.
    pub tombstones_dropped: u64,
    /// Time taken in milliseconds.
    pub elapsed_ms: u64,
}

impl CompactionStats {
    /// Get the space amplification (bytes_written / bytes_read).
    pub fn space_amplification(&self) -> f64 {
        if self.bytes_read == 0 {
            0.0
        } else {
            self.bytes_written as f64 / self.bytes_read as f64
        }
    }
}

/// Compactor that merges tables into one.
pub struct Compactor {
    /// Data directory.
    dir: PathBuf,
    /// Table file prefix.
    prefix: String,
    /// Tombstones with a timestamp below this are dropped.
    tombstone_cutoff: Timestamp,
}

impl Compactor {
    /// Create a new compactor.
    pub fn new(dir: &Path, prefix: &str, tombstone_cutoff: Timestamp) -> Self {
        Self {
            dir: dir.to_path_buf(),
            prefix: prefix.to_string(),
            tombstone_cutoff,
        }
    }

    /// Merge `inputs` into a new table at `generation` and open it.
    ///
    /// The inputs are left untouched; retiring them is up to the caller.
    pub fn run(
        &self,
        inputs: &[Arc<SSTable>],
        generation: Generation,
    ) -> Result<(Arc<SSTable>, CompactionStats)> {
        let start = Instant::now();
        let mut stats = CompactionStats {
            num_input_files: inputs.len(),
            bytes_read: inputs.iter().map(|t| t.file_size()).sum(),
            ..Default::default()
        };

        let sources = inputs
            .iter()
            .map(|table| Arc::clone(table).scan(b""))
            .collect();
        let cutoff = self.tombstone_cutoff;
        let mut dropped = 0u64;
        let records = MergeIterator::new(sources).filter(|record| match record {
            Ok(record)
                if record.cell.is_tombstone()
                    && record.cell.timestamp().map_or(false, |ts| ts < cutoff) =>
            {
                dropped += 1;
                false
            }
            _ => true,
        });

        let info = write_table(&self.dir, &self.prefix, generation, records)?;
        let table = SSTable::open(&info.path, generation)?;

        stats.bytes_written = info.file_size;
        stats.entries_written = info.row_count as u64;
        stats.tombstones_dropped = dropped;
        stats.elapsed_ms = start.elapsed().as_millis() as u64;

        Ok((Arc::new(table), stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Cell, Record};
    use bytes::Bytes;
    use tempfile::tempdir;

    fn table(dir: &Path, generation: Generation, records: Vec<(&str, Cell)>) -> Arc<SSTable> {
        let records = records
            .into_iter()
            .map(|(k, cell)| Ok(Record::new(Bytes::copy_from_slice(k.as_bytes()), cell, generation)));
        let info = write_table(dir, "t", generation, records).unwrap();
        Arc::new(SSTable::open(&info.path, generation).unwrap())
    }

    fn contents(table: &Arc<SSTable>) -> Vec<(Bytes, Cell)> {
        Arc::clone(table)
            .scan(b"")
            .map(|r| r.unwrap())
            .map(|r| (r.key, r.cell))
            .collect()
    }

    #[test]
    fn test_compaction_keeps_newest_versions() {
        let dir = tempdir().unwrap();
        let old = table(
            dir.path(),
            1,
            vec![
                ("a", Cell::present(Bytes::from("a1"), 10)),
                ("b", Cell::present(Bytes::from("b1"), 11)),
                ("c", Cell::present(Bytes::from("c1"), 12)),
            ],
        );
        let new = table(
            dir.path(),
            2,
            vec![
                ("a", Cell::present(Bytes::from("a2"), 20)),
                ("b", Cell::tombstone(21)),
                ("d", Cell::present(Bytes::from("d2"), 22)),
            ],
        );

        let compactor = Compactor::new(dir.path(), "t", 0);
        let (output, stats) = compactor.run(&[old, new], 3).unwrap();

        assert_eq!(Table::generation(&*output), 3);
        assert_eq!(
            contents(&output),
            vec![
                (Bytes::from("a"), Cell::present(Bytes::from("a2"), 20)),
                (Bytes::from("b"), Cell::tombstone(21)),
                (Bytes::from("c"), Cell::present(Bytes::from("c1"), 12)),
                (Bytes::from("d"), Cell::present(Bytes::from("d2"), 22)),
            ]
        );
        assert_eq!(stats.num_input_files, 2);
        assert_eq!(stats.entries_written, 4);
        assert_eq!(stats.tombstones_dropped, 0);
        assert!(stats.bytes_read > 0);
    }

    #[test]
    fn test_compaction_drops_expired_tombstones() {
        let dir = tempdir().unwrap();
        let old = table(
            dir.path(),
            1,
            vec![
                ("a", Cell::present(Bytes::from("a1"), 10)),
                ("b", Cell::present(Bytes::from("b1"), 11)),
            ],
        );
        let new = table(
            dir.path(),
            2,
            vec![("a", Cell::tombstone(20)), ("b", Cell::tombstone(50))],
        );

        // "a" was deleted before the cutoff, "b" after it.
        let compactor = Compactor::new(dir.path(), "t", 30);
        let (output, stats) = compactor.run(&[old, new], 3).unwrap();

        assert_eq!(contents(&output), vec![(Bytes::from("b"), Cell::tombstone(50))]);
        assert_eq!(stats.tombstones_dropped, 1);
    }

    #[test]
    fn test_compaction_of_only_expired_data_writes_empty_table() {
        let dir = tempdir().unwrap();
        let only = table(dir.path(), 4, vec![("gone", Cell::tombstone(5))]);

        let compactor = Compactor::new(dir.path(), "t", Timestamp::MAX);
        let (output, stats) = compactor.run(&[only], 5).unwrap();

        assert!(output.is_empty());
        assert_eq!(stats.entries_written, 0);
        assert_eq!(stats.bytes_written, 8);
    }
}
