//! Flusher - background worker writing rotated memtables to disk.
//!
//! The worker drains the pool's flush queue one job at a time. A flushed
//! table is published into the engine's table list before its memtable
//! leaves the pending set, so every record stays visible to readers
//! throughout. A failed flush is logged and the memtable stays pending;
//! writes keep succeeding. The worker exits once the terminal job queued
//! by `MemTablePool::close` was handled and no other flush is outstanding.

use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, error, info};

use crate::engine::{EngineCounters, TableList};
use crate::iterator::Table;
use crate::memtable::{MemTable, MemTablePool};
use crate::sstable::{write_table, SSTable};
use crate::Result;

/// State owned by the flush worker thread.
pub(crate) struct Flusher {
    dir: PathBuf,
    prefix: String,
    pool: Arc<MemTablePool>,
    tables: Arc<TableList>,
    counters: Arc<EngineCounters>,
}

impl Flusher {
    pub(crate) fn new(
        dir: PathBuf,
        prefix: String,
        pool: Arc<MemTablePool>,
        tables: Arc<TableList>,
        counters: Arc<EngineCounters>,
    ) -> Self {
        Self {
            dir,
            prefix,
            pool,
            tables,
            counters,
        }
    }

    /// Start the worker thread.
    pub(crate) fn spawn(self) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("quorumkv-flusher".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    fn run(self) {
        debug!(dir = %self.dir.display(), "flusher started");

        let mut stopping = false;
        while let Some(job) = self.pool.take_flush_job() {
            let generation = job.table.generation();
            stopping |= job.terminal;

            if job.terminal && job.table.is_empty() {
                // Nothing to persist.
                self.pool.on_flushed(generation);
            } else {
                match self.flush(&job.table) {
                    Ok(table) => {
                        self.tables.rcu(|current| {
                            let mut next = Vec::with_capacity(current.len() + 1);
                            next.extend(current.iter().cloned());
                            next.push(Arc::clone(&table));
                            next.sort_by_key(|t| Table::generation(&**t));
                            next
                        });
                        self.counters.flushes_completed.fetch_add(1, Ordering::SeqCst);
                        self.pool.on_flushed(generation);
                    }
                    Err(e) => {
                        error!(generation, error = %e, "flush failed; memtable stays in memory");
                        self.counters.flushes_failed.fetch_add(1, Ordering::SeqCst);
                        self.pool.on_flush_failed(generation);
                    }
                }
            }

            // A rotation that raced with close may still be queued behind the terminal job.
            if stopping && !self.pool.has_unflushed() {
                break;
            }
        }

        debug!(dir = %self.dir.display(), "flusher stopped");
    }

    fn flush(&self, memtable: &Arc<MemTable>) -> Result<Arc<SSTable>> {
        let start = Instant::now();
        let generation = memtable.generation();
        debug!(generation, rows = memtable.len(), "flush started");

        let info = write_table(
            &self.dir,
            &self.prefix,
            generation,
            Arc::clone(memtable).scan(b""),
        )?;
        let table = SSTable::open(&info.path, generation)?;

        info!(
            generation,
            rows = info.row_count,
            bytes = info.file_size,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "memtable flushed"
        );
        Ok(Arc::new(table))
    }
}
