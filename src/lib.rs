//! # quorumkv
//!
//! A replicated key-value store: an LSM storage engine on every node,
//! partitioned over a consistent-hash ring and replicated with ack/from
//! quorums and last-write-wins reads.
//!
//! ## Features
//!
//! - **LSM-Tree Storage**: skip-list memtables flushed in the background to
//!   immutable, memory-mapped tables
//! - **Backpressure**: at most two memtables queue for flushing before writers block
//! - **Compaction**: all tables merged into one, with a grace period for tombstones
//! - **Consistent Hashing**: virtual-node ring with deterministic replica sets
//! - **Quorum Replication**: per-request ack/from with timestamp conflict resolution
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use quorumkv::{ClusterOptions, Coordinator, InMemoryTransport, LsmEngine, Request};
//!
//! // Single engine
//! let engine = LsmEngine::open("./my_data")?;
//! engine.upsert(b"hello", b"world")?;
//! let cell = engine.get(b"hello")?;
//! engine.remove(b"hello")?;
//!
//! // One node of a cluster
//! let transport = InMemoryTransport::new();
//! let options = ClusterOptions::new("node-a", ["node-a", "node-b", "node-c"]);
//! let coordinator = Coordinator::new(&options, engine, transport.clone())?;
//! transport.register(&coordinator);
//! let response = coordinator.handle(Request::put("key", "value"))?;
//! ```

// Public modules
pub mod cluster;
pub mod error;
pub mod options;
pub mod types;

// Engine module
mod engine;

// Internal modules
mod compaction;
mod flusher;
mod iterator;
mod memtable;
mod sstable;
mod util;

// Re-export main types for convenience
pub use error::{Error, Result};
pub use options::{ClusterOptions, Options, OptionsBuilder};
pub use types::{Cell, Generation, Record, Timestamp};

// Engine
pub use engine::{EngineStats, LsmEngine};

// Compaction (re-export useful types)
pub use compaction::CompactionStats;

// Iterators
pub use iterator::{RangeIterator, RecordIterator, Table};

// Storage
pub use memtable::MemTable;
pub use sstable::{write_table, SSTable, SSTableInfo, SSTableWriter};

// Cluster
pub use cluster::{
    Coordinator, InMemoryTransport, Method, NodeId, ReplicaClient, ReplicationFactor, Request,
    Response, Status, Topology,
};
