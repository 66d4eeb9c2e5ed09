//! MemTable pool - the active memtable plus tables waiting to be flushed.
//!
//! Writes go to `current`. Once its size passes the flush threshold it is
//! swapped out under the exclusive lock, parked in `pending` and handed to
//! the flusher through a bounded channel. The channel holds at most
//! [`FLUSH_QUEUE_CAPACITY`] jobs, so a writer that rotates while the flusher
//! is behind blocks until a slot frees up.

use std::collections::{BTreeMap, BTreeSet};
use std::mem;
use std::sync::Arc;

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::debug;

use crate::iterator::{MergeIterator, RecordIterator, Table};
use crate::types::{Generation, GenerationCounter, Timestamp};
use crate::{Error, Result};

use super::MemTable;

/// Maximum number of flush jobs queued ahead of the flusher.
pub const FLUSH_QUEUE_CAPACITY: usize = 2;

/// A rotated memtable to be written to disk.
#[derive(Debug, Clone)]
pub struct FlushJob {
    /// The table to flush; its generation names the output file.
    pub table: Arc<MemTable>,
    /// Last job before shutdown; the flusher exits after handling it.
    pub terminal: bool,
}

#[derive(Debug)]
struct PoolState {
    current: Arc<MemTable>,
    pending: BTreeMap<Generation, Arc<MemTable>>,
    failed: BTreeSet<Generation>,
    closed: bool,
}

/// Owner of the active memtable and the memtables awaiting flush.
#[derive(Debug)]
pub struct MemTablePool {
    state: RwLock<PoolState>,
    generations: Arc<GenerationCounter>,
    flush_threshold: usize,
    jobs_tx: Sender<FlushJob>,
    jobs_rx: Receiver<FlushJob>,
    /// Signalled whenever a flush attempt finishes.
    flush_done: (Mutex<()>, Condvar),
}

impl MemTablePool {
    /// Create a pool whose first memtable takes the next generation from `generations`.
    pub fn new(generations: Arc<GenerationCounter>, flush_threshold: usize) -> Self {
        let (jobs_tx, jobs_rx) = bounded(FLUSH_QUEUE_CAPACITY);
        let current = Arc::new(MemTable::new(generations.allocate()));
        Self {
            state: RwLock::new(PoolState {
                current,
                pending: BTreeMap::new(),
                failed: BTreeSet::new(),
                closed: false,
            }),
            generations,
            flush_threshold,
            jobs_tx,
            jobs_rx,
            flush_done: (Mutex::new(()), Condvar::new()),
        }
    }

    /// Store `data` for `key`, rotating the memtable if it grew past the threshold.
    pub fn upsert(&self, key: Bytes, data: Bytes, timestamp: Timestamp) -> Result<()> {
        self.write(|table| table.upsert(key, data, timestamp))
    }

    /// Store a tombstone for `key`, rotating the memtable if it grew past the threshold.
    pub fn remove(&self, key: Bytes, timestamp: Timestamp) -> Result<()> {
        self.write(|table| table.remove(key, timestamp))
    }

    fn write(&self, apply: impl FnOnce(&MemTable)) -> Result<()> {
        let full = {
            let state = self.state.read();
            if state.closed {
                return Err(Error::StoreClosed);
            }
            apply(&state.current);
            if state.current.approximate_size() > self.flush_threshold {
                Some(state.current.generation())
            } else {
                None
            }
        };

        match full {
            Some(generation) => self.rotate(generation),
            None => Ok(()),
        }
    }

    /// Swap out the memtable of `generation` if it is still current.
    fn rotate(&self, generation: Generation) -> Result<()> {
        let job = {
            let mut state = self.state.write();
            // Another writer may have rotated while we waited for the lock.
            if state.closed || state.current.generation() != generation {
                return Ok(());
            }
            self.swap_current(&mut state)
        };

        debug!(
            generation = job.table.generation(),
            bytes = job.table.approximate_size(),
            "memtable rotated"
        );
        self.submit(job)
    }

    fn swap_current(&self, state: &mut PoolState) -> FlushJob {
        let fresh = Arc::new(MemTable::new(self.generations.allocate()));
        let old = mem::replace(&mut state.current, fresh);
        state.pending.insert(old.generation(), Arc::clone(&old));
        FlushJob {
            table: old,
            terminal: false,
        }
    }

    /// Queue a job, blocking while the queue is full.
    fn submit(&self, job: FlushJob) -> Result<()> {
        self.jobs_tx
            .send(job)
            .map_err(|_| Error::internal("flush queue disconnected"))
    }

    /// Rotate the current memtable regardless of size.
    ///
    /// Returns the generations pending at the time of the call (the rotated
    /// one included), or an empty list when there was nothing to flush.
    pub fn force_rotate(&self) -> Result<Vec<Generation>> {
        let (job, pending) = {
            let mut state = self.state.write();
            if state.closed {
                return Err(Error::StoreClosed);
            }
            let job = if state.current.is_empty() {
                None
            } else {
                Some(self.swap_current(&mut state))
            };
            let pending: Vec<Generation> = state
                .pending
                .keys()
                .filter(|g| !state.failed.contains(g))
                .copied()
                .collect();
            (job, pending)
        };

        if let Some(job) = job {
            self.submit(job)?;
        }
        Ok(pending)
    }

    /// Block until every generation in `generations` was flushed or failed to flush.
    ///
    /// Returns the generations whose flush failed.
    pub fn wait_flushed(&self, generations: &[Generation]) -> Vec<Generation> {
        let (lock, cond) = &self.flush_done;
        let mut guard = lock.lock();
        loop {
            {
                let state = self.state.read();
                let outstanding = generations
                    .iter()
                    .any(|g| state.pending.contains_key(g) && !state.failed.contains(g));
                if !outstanding {
                    return generations
                        .iter()
                        .filter(|g| state.failed.contains(g))
                        .copied()
                        .collect();
                }
            }
            cond.wait(&mut guard);
        }
    }

    /// Block until a flush job is available.
    ///
    /// Returns `None` only if the queue was torn down.
    pub fn take_flush_job(&self) -> Option<FlushJob> {
        self.jobs_rx.recv().ok()
    }

    /// Drop the flushed memtable of `generation` from the pending set.
    pub fn on_flushed(&self, generation: Generation) {
        self.state.write().pending.remove(&generation);
        self.notify_flush_done();
    }

    /// Record that flushing `generation` failed; its memtable stays readable.
    pub fn on_flush_failed(&self, generation: Generation) {
        self.state.write().failed.insert(generation);
        self.notify_flush_done();
    }

    fn notify_flush_done(&self) {
        let (lock, cond) = &self.flush_done;
        let _guard = lock.lock();
        cond.notify_all();
    }

    /// Refuse further writes and queue the remaining memtable as the terminal job.
    ///
    /// Returns `false` if the pool was already closed.
    pub fn close(&self) -> Result<bool> {
        let job = {
            let mut state = self.state.write();
            if state.closed {
                return Ok(false);
            }
            state.closed = true;
            let mut job = self.swap_current(&mut state);
            job.terminal = true;
            job
        };

        self.submit(job)?;
        Ok(true)
    }

    /// Check whether the pool was closed.
    pub fn is_closed(&self) -> bool {
        self.state.read().closed
    }

    /// References to the current and pending memtables, newest first.
    pub fn snapshot(&self) -> Vec<Arc<MemTable>> {
        let state = self.state.read();
        let mut tables = Vec::with_capacity(state.pending.len() + 1);
        tables.push(Arc::clone(&state.current));
        tables.extend(state.pending.values().rev().cloned());
        tables
    }

    /// Check whether a pending memtable still awaits a flush attempt.
    pub fn has_unflushed(&self) -> bool {
        let state = self.state.read();
        state.pending.keys().any(|g| !state.failed.contains(g))
    }

    /// Oldest timestamp held by a rotated memtable, failed flushes included.
    pub fn oldest_pending_timestamp(&self) -> Option<Timestamp> {
        self.state
            .read()
            .pending
            .values()
            .filter_map(|table| table.min_timestamp())
            .min()
    }

    /// Number of memtables waiting for flush.
    pub fn pending_count(&self) -> usize {
        self.state.read().pending.len()
    }

    /// Size of the current memtable.
    pub fn current_size(&self) -> usize {
        self.state.read().current.approximate_size()
    }
}

impl Table for MemTablePool {
    fn scan(self: Arc<Self>, from: &[u8]) -> RecordIterator {
        // Only the reference snapshot happens under the lock.
        let sources = self
            .snapshot()
            .into_iter()
            .map(|table| table.scan(from))
            .collect();
        Box::new(MergeIterator::new(sources))
    }

    fn approximate_size(&self) -> u64 {
        self.snapshot()
            .iter()
            .map(|t| t.approximate_size() as u64)
            .sum()
    }

    fn generation(&self) -> Generation {
        self.state.read().current.generation()
    }
}
