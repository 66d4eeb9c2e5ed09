//! LSM engine - the single-node storage engine.
//!
//! The engine composes:
//! - A memtable pool holding recent writes
//! - A background flusher turning rotated memtables into SSTables
//! - The list of on-disk SSTables, replaced wholesale on every change
//!
//! # Thread Safety
//!
//! The engine is thread-safe and can be shared across threads using Arc.
//! Reads never take a lock for longer than a reference snapshot; writes only
//! block when the flush queue is full. Compaction is single-flight.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use arc_swap::ArcSwap;
use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::compaction::Compactor;
use crate::flusher::Flusher;
use crate::iterator::{MergeIterator, RangeIterator, Table};
use crate::memtable::MemTablePool;
use crate::options::Options;
use crate::sstable::SSTable;
use crate::types::{Cell, Generation, GenerationCounter, Record, Timestamp, TimestampClock};
use crate::util::filename::{create_dir_if_missing, delete_file, list_files_of_type, FileType};
use crate::util::lock::DirLock;
use crate::{Error, Result};

/// On-disk tables in ascending generation order.
pub(crate) type TableList = ArcSwap<Vec<Arc<SSTable>>>;

/// Counters shared with the flusher.
#[derive(Debug, Default)]
pub(crate) struct EngineCounters {
    pub(crate) flushes_completed: AtomicU64,
    pub(crate) flushes_failed: AtomicU64,
    pub(crate) compactions_completed: AtomicU64,
}

/// The storage engine.
pub struct LsmEngine {
    /// Data directory path.
    dir: PathBuf,
    /// Engine options.
    options: Arc<Options>,
    /// Lock on the data directory, held for the engine's lifetime.
    _lock: DirLock,
    /// Generation counter shared with the pool.
    generations: Arc<GenerationCounter>,
    /// Source of write timestamps.
    clock: TimestampClock,
    /// Current and pending memtables.
    pool: Arc<MemTablePool>,
    /// Published on-disk tables.
    tables: Arc<TableList>,
    /// Serializes compactions.
    compaction_lock: Mutex<()>,
    /// Flusher thread; taken on close.
    flusher: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<EngineCounters>,
}

impl LsmEngine {
    /// Open an engine at the given path with default options.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::open_with_options(path, Options::default())
    }

    /// Open an engine with custom options.
    ///
    /// Creates the directory if needed, removes unpublished `.tmp` tables
    /// and opens every published one.
    pub fn open_with_options(path: impl AsRef<Path>, options: Options) -> Result<Arc<Self>> {
        options.validate()?;
        let dir = path.as_ref().to_path_buf();
        let options = Arc::new(options);

        create_dir_if_missing(&dir)?;
        let lock = DirLock::acquire(&dir)?;

        for (generation, path) in list_files_of_type(&dir, &options.table_prefix, FileType::Temp)? {
            warn!(generation, path = %path.display(), "removing unpublished table");
            delete_file(&path)?;
        }

        let mut tables = Vec::new();
        for (generation, path) in list_files_of_type(&dir, &options.table_prefix, FileType::Table)? {
            tables.push(Arc::new(SSTable::open(&path, generation)?));
        }

        let first_generation = tables
            .last()
            .map_or(0, |table| Table::generation(&**table) + 1);
        let generations = Arc::new(GenerationCounter::new(first_generation));
        let pool = Arc::new(MemTablePool::new(
            Arc::clone(&generations),
            options.flush_threshold,
        ));

        info!(
            dir = %dir.display(),
            tables = tables.len(),
            first_generation,
            "engine opened"
        );

        let tables = Arc::new(ArcSwap::from_pointee(tables));
        let counters = Arc::new(EngineCounters::default());
        let flusher = Flusher::new(
            dir.clone(),
            options.table_prefix.clone(),
            Arc::clone(&pool),
            Arc::clone(&tables),
            Arc::clone(&counters),
        )
        .spawn()?;

        Ok(Arc::new(Self {
            dir,
            options,
            _lock: lock,
            generations,
            clock: TimestampClock::new(),
            pool,
            tables,
            compaction_lock: Mutex::new(()),
            flusher: Mutex::new(Some(flusher)),
            counters,
        }))
    }

    /// Look up the newest version of `key` across all tables.
    ///
    /// Returns a tombstone if the newest version is a deletion and `Absent`
    /// if no table holds the key.
    pub fn get(&self, key: &[u8]) -> Result<Cell> {
        self.check_open()?;
        self.validate_key(key)?;

        let mut newest: Option<Record> = None;
        let mut consider = |cell: Cell, generation: Generation| {
            if cell.is_absent() {
                return;
            }
            let candidate = Record::new(Bytes::new(), cell, generation);
            newest = Some(match newest.take() {
                Some(current) => current.newer(candidate),
                None => candidate,
            });
        };

        for memtable in self.pool.snapshot() {
            consider(memtable.get(key), memtable.generation());
        }
        for table in self.tables.load().iter() {
            consider(table.lookup(key)?, Table::generation(&**table));
        }

        Ok(newest.map_or(Cell::Absent, |record| record.cell))
    }

    /// Live `(key, value)` pairs with `from <= key < to`, ascending.
    ///
    /// The iterator holds its own references to the tables it reads, so
    /// later writes, flushes and compactions do not disturb it.
    pub fn range(&self, from: &[u8], to: Option<&[u8]>) -> Result<RangeIterator> {
        self.check_open()?;

        let mut sources = vec![Arc::clone(&self.pool).scan(from)];
        for table in self.tables.load().iter().rev() {
            sources.push(Arc::clone(table).scan(from));
        }

        Ok(RangeIterator::new(
            MergeIterator::new(sources),
            to.map(Bytes::copy_from_slice),
        ))
    }

    /// Store `value` for `key`.
    pub fn upsert(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.validate_key(key)?;
        if value.len() > self.options.max_value_size {
            return Err(Error::invalid_argument(format!(
                "value of {} bytes exceeds the {} byte limit",
                value.len(),
                self.options.max_value_size
            )));
        }

        self.pool.upsert(
            Bytes::copy_from_slice(key),
            Bytes::copy_from_slice(value),
            self.clock.next(),
        )?;
        self.maybe_compact();
        Ok(())
    }

    /// Delete `key` by writing a tombstone.
    pub fn remove(&self, key: &[u8]) -> Result<()> {
        self.validate_key(key)?;

        self.pool
            .remove(Bytes::copy_from_slice(key), self.clock.next())?;
        self.maybe_compact();
        Ok(())
    }

    /// Rotate the current memtable and wait for every pending flush.
    pub fn flush(&self) -> Result<()> {
        let generations = self.pool.force_rotate()?;
        let failed = self.pool.wait_flushed(&generations);
        if failed.is_empty() {
            Ok(())
        } else {
            Err(Error::Io(format!(
                "flush failed for generations {:?}",
                failed
            )))
        }
    }

    /// Merge every on-disk table into one.
    ///
    /// Blocks while another compaction is running.
    pub fn compact(&self) -> Result<()> {
        self.check_open()?;
        let _guard = self.compaction_lock.lock();
        self.compact_locked()
    }

    fn maybe_compact(&self) {
        if self.tables.load().len() <= self.options.compaction_trigger {
            return;
        }
        // Somebody else is already compacting.
        let Some(_guard) = self.compaction_lock.try_lock() else {
            return;
        };
        // The write itself succeeded; a failed compaction leaves the inputs in place.
        if let Err(e) = self.compact_locked() {
            error!(error = %e, "compaction failed");
        }
    }

    fn compact_locked(&self) -> Result<()> {
        // Taken before the inputs: a memtable flushed in between is then
        // either an input or still counted by the cutoff.
        let tombstone_cutoff = self.tombstone_cutoff();
        let inputs = self.tables.load_full();
        if inputs.is_empty() {
            return Ok(());
        }

        let generation = self.generations.allocate();
        info!(generation, inputs = inputs.len(), "compaction started");

        let compactor = Compactor::new(&self.dir, &self.options.table_prefix, tombstone_cutoff);
        let (output, stats) = compactor.run(&inputs, generation)?;

        self.tables.rcu(|current| {
            let mut next: Vec<Arc<SSTable>> = current
                .iter()
                .filter(|table| !inputs.iter().any(|input| Arc::ptr_eq(input, table)))
                .cloned()
                .collect();
            next.push(Arc::clone(&output));
            next.sort_by_key(|t| Table::generation(&**t));
            next
        });

        for table in inputs.iter() {
            table.mark_obsolete();
        }
        self.counters
            .compactions_completed
            .fetch_add(1, Ordering::SeqCst);

        info!(
            generation,
            inputs = stats.num_input_files,
            rows = stats.entries_written,
            bytes_read = stats.bytes_read,
            bytes_written = stats.bytes_written,
            tombstones_dropped = stats.tombstones_dropped,
            elapsed_ms = stats.elapsed_ms,
            "compaction finished"
        );
        Ok(())
    }

    /// Tombstones older than this timestamp are dropped by compaction.
    ///
    /// A rotated memtable that is not on disk yet, or whose flush failed,
    /// may hold versions such a tombstone shadows, so the cutoff never
    /// passes its oldest write.
    fn tombstone_cutoff(&self) -> Timestamp {
        let grace = if self.options.tombstone_grace.is_zero() {
            Timestamp::MAX
        } else {
            self.clock.cutoff(self.options.tombstone_grace)
        };
        match self.pool.oldest_pending_timestamp() {
            Some(oldest) => grace.min(oldest),
            None => grace,
        }
    }

    /// Get engine statistics.
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            sstable_count: self.tables.load().len(),
            pending_flushes: self.pool.pending_count(),
            memtable_bytes: self.pool.current_size(),
            next_generation: self.generations.peek(),
            flushes_completed: self.counters.flushes_completed.load(Ordering::SeqCst),
            flushes_failed: self.counters.flushes_failed.load(Ordering::SeqCst),
            compactions_completed: self.counters.compactions_completed.load(Ordering::SeqCst),
        }
    }

    /// Close the engine gracefully.
    ///
    /// Flushes the remaining memtable and stops the flusher. Later calls
    /// return `Ok(())`.
    pub fn close(&self) -> Result<()> {
        let start = Instant::now();
        self.pool.close()?;

        let handle = self.flusher.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };
        handle
            .join()
            .map_err(|_| Error::internal("flusher thread panicked"))?;

        let unflushed = self.pool.pending_count();
        if unflushed > 0 {
            return Err(Error::Io(format!(
                "{} memtables could not be flushed before close",
                unflushed
            )));
        }

        debug!(
            dir = %self.dir.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "engine closed"
        );
        Ok(())
    }

    /// Check whether the engine was closed.
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Get the data directory path.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Get the engine options.
    pub fn options(&self) -> &Options {
        &self.options
    }

    fn check_open(&self) -> Result<()> {
        if self.pool.is_closed() {
            Err(Error::StoreClosed)
        } else {
            Ok(())
        }
    }

    fn validate_key(&self, key: &[u8]) -> Result<()> {
        if key.is_empty() {
            return Err(Error::invalid_argument("key must not be empty"));
        }
        if key.len() > self.options.max_key_size {
            return Err(Error::invalid_argument(format!(
                "key of {} bytes exceeds the {} byte limit",
                key.len(),
                self.options.max_key_size
            )));
        }
        Ok(())
    }
}

impl Drop for LsmEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!(dir = %self.dir.display(), error = %e, "failed to close engine");
        }
    }
}

impl std::fmt::Debug for LsmEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LsmEngine")
            .field("dir", &self.dir)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Engine statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineStats {
    /// Number of published on-disk tables.
    pub sstable_count: usize,
    /// Number of rotated memtables not yet flushed.
    pub pending_flushes: usize,
    /// Approximate size of the current memtable.
    pub memtable_bytes: usize,
    /// Generation the next rotation or compaction will use.
    pub next_generation: Generation,
    /// Flushes that produced a table.
    pub flushes_completed: u64,
    /// Flushes that failed; their memtables stay in memory.
    pub flushes_failed: u64,
    /// Compactions that completed.
    pub compactions_completed: u64,
}

impl std::fmt::Display for EngineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Engine Statistics:")?;
        writeln!(f, "  SSTables: {}", self.sstable_count)?;
        writeln!(f, "  Pending flushes: {}", self.pending_flushes)?;
        writeln!(f, "  Memtable: {} bytes", self.memtable_bytes)?;
        writeln!(f, "  Next generation: {}", self.next_generation)?;
        writeln!(
            f,
            "  Flushes: {} completed, {} failed",
            self.flushes_completed, self.flushes_failed
        )?;
        writeln!(f, "  Compactions: {}", self.compactions_completed)?;
        Ok(())
    }
}
