//! SSTable reader over a read-only memory mapping.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use memmap2::Mmap;
use tracing::{debug, warn};

use crate::iterator::{RecordIterator, Table};
use crate::types::{Cell, Generation, Record};
use crate::util::filename::delete_file;
use crate::{Error, Result};

use super::{decode_record, read_i64, RecordRef, OFFSET_SIZE, ROW_COUNT_SIZE};

/// An open, immutable on-disk table.
///
/// Opening only parses the row count; records are decoded on demand
/// straight from the mapping.
pub struct SSTable {
    /// Path of the published file.
    path: PathBuf,
    /// Generation parsed from the file name.
    generation: Generation,
    /// Read-only mapping of the whole file.
    mmap: Mmap,
    /// Number of records.
    rows: usize,
    /// Offset of the offsets array; also the end of the record body.
    index_start: usize,
    /// Set by compaction; the file is unlinked when the last reference drops.
    obsolete: AtomicBool,
}

impl SSTable {
    /// Open a table file for reading.
    pub fn open(path: &Path, generation: Generation) -> Result<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len() as usize;

        if file_size < ROW_COUNT_SIZE {
            return Err(Error::corruption(format!(
                "{} is too small for a footer",
                path.display()
            )));
        }

        // SAFETY: published tables are never written again; the only mutation
        // this crate performs on them is unlinking, which keeps the mapping valid.
        let mmap = unsafe { Mmap::map(&file)? };

        let mut pos = file_size - ROW_COUNT_SIZE;
        let rows = read_i64(&mmap, &mut pos)?;
        let rows = usize::try_from(rows)
            .ok()
            .filter(|rows| {
                rows.checked_mul(OFFSET_SIZE)
                    .and_then(|n| n.checked_add(ROW_COUNT_SIZE))
                    .map_or(false, |footer| footer <= file_size)
            })
            .ok_or_else(|| {
                Error::corruption(format!(
                    "{}: row count {} does not fit a {} byte file",
                    path.display(),
                    rows,
                    file_size
                ))
            })?;

        let index_start = file_size - ROW_COUNT_SIZE - rows * OFFSET_SIZE;

        Ok(Self {
            path: path.to_path_buf(),
            generation,
            mmap,
            rows,
            index_start,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.rows
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Path of the table file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the table file in bytes.
    pub fn file_size(&self) -> u64 {
        self.mmap.len() as u64
    }

    /// Byte offset of row `index` within the file.
    fn offset(&self, index: usize) -> Result<usize> {
        let mut pos = self.index_start + index * OFFSET_SIZE;
        let offset = read_i64(&self.mmap, &mut pos)?;
        usize::try_from(offset)
            .ok()
            .filter(|offset| *offset < self.index_start)
            .ok_or_else(|| {
                Error::corruption(format!(
                    "{}: row {} has offset {} outside the body",
                    self.path.display(),
                    index,
                    offset
                ))
            })
    }

    /// Decode row `index` in place.
    pub fn get(&self, index: usize) -> Result<RecordRef<'_>> {
        if index >= self.rows {
            return Err(Error::invalid_argument(format!(
                "row {} out of bounds ({} rows)",
                index, self.rows
            )));
        }
        let offset = self.offset(index)?;
        decode_record(&self.mmap[..self.index_start], offset)
    }

    /// Index of the first row whose key is >= `key`, or `len()` if none is.
    pub fn locate(&self, key: &[u8]) -> Result<usize> {
        let mut low = 0;
        let mut high = self.rows;
        while low < high {
            let mid = low + (high - low) / 2;
            if self.get(mid)?.key < key {
                low = mid + 1;
            } else {
                high = mid;
            }
        }
        Ok(low)
    }

    /// Version stored for exactly `key`, or `Absent`.
    pub fn lookup(&self, key: &[u8]) -> Result<Cell> {
        let index = self.locate(key)?;
        if index < self.rows {
            let record = self.get(index)?;
            if record.key == key {
                return Ok(record.to_cell());
            }
        }
        Ok(Cell::Absent)
    }

    /// Iterate from `from` (inclusive).
    pub fn iter_from(self: &Arc<Self>, from: &[u8]) -> SSTableIterator {
        let (next_row, error) = match self.locate(from) {
            Ok(row) => (row, None),
            Err(e) => (self.rows, Some(e)),
        };
        SSTableIterator {
            table: Arc::clone(self),
            next_row,
            error,
        }
    }

    /// Schedule the file for deletion once no reader holds the table.
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for SSTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTable")
            .field("path", &self.path)
            .field("generation", &self.generation)
            .field("rows", &self.rows)
            .finish()
    }
}

impl Drop for SSTable {
    fn drop(&mut self) {
        if self.obsolete.load(Ordering::SeqCst) {
            match delete_file(&self.path) {
                Ok(()) => debug!(path = %self.path.display(), "deleted obsolete table"),
                Err(e) => warn!(path = %self.path.display(), error = %e, "failed to delete obsolete table"),
            }
        }
    }
}

impl Table for SSTable {
    fn scan(self: Arc<Self>, from: &[u8]) -> RecordIterator {
        Box::new(self.iter_from(from))
    }

    fn approximate_size(&self) -> u64 {
        self.file_size()
    }

    fn generation(&self) -> Generation {
        self.generation
    }
}

/// Forward iterator over an SSTable; records are copied out of the mapping.
pub struct SSTableIterator {
    table: Arc<SSTable>,
    next_row: usize,
    error: Option<Error>,
}

impl Iterator for SSTableIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(e) = self.error.take() {
            return Some(Err(e));
        }
        if self.next_row >= self.table.rows {
            return None;
        }

        let row = self.next_row;
        self.next_row += 1;
        match self.table.get(row) {
            Ok(record) => Some(Ok(Record::new(
                Bytes::copy_from_slice(record.key),
                record.to_cell(),
                self.table.generation,
            ))),
            Err(e) => {
                self.next_row = self.table.rows;
                Some(Err(e))
            }
        }
    }
}
