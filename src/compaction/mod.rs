//! Compaction - merging on-disk tables.
//!
//! Every flush adds one table, and a point lookup checks each of them, so
//! the engine periodically rewrites all on-disk tables as a single one.
//!
//! # Compaction Process
//!
//! 1. Snapshot the current table list
//! 2. Merge every table, keeping the newest version of each key
//! 3. Drop tombstones older than the grace period, along with the versions they shadow
//! 4. Publish the output as a new table at a fresh generation
//! 5. Swap the table list and mark the inputs obsolete
//!
//! Inputs are unlinked once the last scan holding them finishes. Tables
//! flushed while a compaction runs are not inputs and stay in the list.

mod compactor;

pub use compactor::{CompactionStats, Compactor};
