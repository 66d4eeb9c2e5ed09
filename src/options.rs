//! Configuration options for quorumkv.

use std::time::Duration;

use crate::cluster::NodeId;

/// Default memtable size that triggers rotation (4MB).
pub const DEFAULT_FLUSH_THRESHOLD: usize = 4 * 1024 * 1024;

/// Default number of on-disk tables before compaction.
pub const DEFAULT_COMPACTION_TRIGGER: usize = 4;

/// Default table file prefix.
pub const DEFAULT_TABLE_PREFIX: &str = "sstable";

/// Default age after which compaction may drop a tombstone (1 hour).
pub const DEFAULT_TOMBSTONE_GRACE: Duration = Duration::from_secs(60 * 60);

/// Maximum key size (the on-disk length field is a signed 32-bit integer).
pub const MAX_KEY_SIZE: usize = i32::MAX as usize;

/// Maximum value size.
pub const MAX_VALUE_SIZE: usize = i32::MAX as usize;

/// Default number of ring positions per physical node.
pub const DEFAULT_VIRTUAL_NODES: usize = 64;

/// Default timeout for a single remote replica call.
pub const DEFAULT_REPLICA_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of threads issuing remote replica calls.
pub const DEFAULT_WORKER_THREADS: usize = 4;

/// Storage engine configuration options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Approximate memtable size in bytes above which it is rotated and flushed.
    pub flush_threshold: usize,

    /// Number of on-disk tables above which a write triggers compaction.
    pub compaction_trigger: usize,

    /// File name prefix for tables (`<prefix>_<generation>.dat`).
    pub table_prefix: String,

    /// Tombstones younger than this survive compaction. `Duration::ZERO` drops all of them.
    pub tombstone_grace: Duration,

    /// Maximum key size.
    pub max_key_size: usize,

    /// Maximum value size.
    pub max_value_size: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            compaction_trigger: DEFAULT_COMPACTION_TRIGGER,
            table_prefix: DEFAULT_TABLE_PREFIX.to_string(),
            tombstone_grace: DEFAULT_TOMBSTONE_GRACE,
            max_key_size: MAX_KEY_SIZE,
            max_value_size: MAX_VALUE_SIZE,
        }
    }
}

impl Options {
    /// Create new options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.flush_threshold == 0 {
            return Err(crate::Error::invalid_configuration(
                "flush_threshold must be positive",
            ));
        }

        if self.compaction_trigger < 1 {
            return Err(crate::Error::invalid_configuration(
                "compaction_trigger must be at least 1",
            ));
        }

        if self.table_prefix.is_empty()
            || self
                .table_prefix
                .contains(|c: char| c == '/' || c == '\\' || c == '.')
        {
            return Err(crate::Error::invalid_configuration(format!(
                "table_prefix {:?} is not a plain file name",
                self.table_prefix
            )));
        }

        if self.max_key_size == 0 || self.max_key_size > MAX_KEY_SIZE {
            return Err(crate::Error::invalid_configuration(format!(
                "max_key_size must be in 1..={}",
                MAX_KEY_SIZE
            )));
        }

        if self.max_value_size > MAX_VALUE_SIZE {
            return Err(crate::Error::invalid_configuration(format!(
                "max_value_size cannot exceed {}",
                MAX_VALUE_SIZE
            )));
        }

        Ok(())
    }
}

/// Builder for Options.
#[derive(Debug, Clone, Default)]
pub struct OptionsBuilder {
    options: Options,
}

impl OptionsBuilder {
    /// Create a new builder with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set flush_threshold.
    pub fn flush_threshold(mut self, bytes: usize) -> Self {
        self.options.flush_threshold = bytes;
        self
    }

    /// Set compaction_trigger.
    pub fn compaction_trigger(mut self, tables: usize) -> Self {
        self.options.compaction_trigger = tables;
        self
    }

    /// Set table_prefix.
    pub fn table_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.options.table_prefix = prefix.into();
        self
    }

    /// Set tombstone_grace.
    pub fn tombstone_grace(mut self, grace: Duration) -> Self {
        self.options.tombstone_grace = grace;
        self
    }

    /// Set max_key_size.
    pub fn max_key_size(mut self, size: usize) -> Self {
        self.options.max_key_size = size;
        self
    }

    /// Set max_value_size.
    pub fn max_value_size(mut self, size: usize) -> Self {
        self.options.max_value_size = size;
        self
    }

    /// Build the options.
    pub fn build(self) -> crate::Result<Options> {
        self.options.validate()?;
        Ok(self.options)
    }
}

/// Cluster membership and replication configuration for one node.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// This node's identity; must be one of `nodes`.
    pub local: NodeId,

    /// Every physical node of the cluster, including the local one.
    pub nodes: Vec<NodeId>,

    /// Ring positions per physical node.
    pub virtual_nodes: usize,

    /// Deadline for remote replica calls of one operation.
    pub replica_timeout: Duration,

    /// Threads issuing remote replica calls.
    pub worker_threads: usize,
}

impl ClusterOptions {
    /// Create cluster options with defaults for the given membership.
    pub fn new(local: impl Into<NodeId>, nodes: impl IntoIterator<Item = impl Into<NodeId>>) -> Self {
        Self {
            local: local.into(),
            nodes: nodes.into_iter().map(Into::into).collect(),
            virtual_nodes: DEFAULT_VIRTUAL_NODES,
            replica_timeout: DEFAULT_REPLICA_TIMEOUT,
            worker_threads: DEFAULT_WORKER_THREADS,
        }
    }

    /// Set virtual_nodes.
    pub fn virtual_nodes(mut self, count: usize) -> Self {
        self.virtual_nodes = count;
        self
    }

    /// Set replica_timeout.
    pub fn replica_timeout(mut self, timeout: Duration) -> Self {
        self.replica_timeout = timeout;
        self
    }

    /// Set worker_threads.
    pub fn worker_threads(mut self, threads: usize) -> Self {
        self.worker_threads = threads;
        self
    }

    /// Validate the options.
    pub fn validate(&self) -> crate::Result<()> {
        if self.nodes.is_empty() {
            return Err(crate::Error::invalid_configuration(
                "cluster must have at least one node",
            ));
        }

        if !self.nodes.contains(&self.local) {
            return Err(crate::Error::invalid_configuration(format!(
                "local node {} is not a cluster member",
                self.local
            )));
        }

        if self.virtual_nodes == 0 {
            return Err(crate::Error::invalid_configuration(
                "virtual_nodes must be positive",
            ));
        }

        if self.worker_threads == 0 {
            return Err(crate::Error::invalid_configuration(
                "worker_threads must be positive",
            ));
        }

        if self.replica_timeout.is_zero() {
            return Err(crate::Error::invalid_configuration(
                "replica_timeout must be positive",
            ));
        }

        Ok(())
    }
}
