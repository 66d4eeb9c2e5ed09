//! Consistent-hash ring with virtual nodes.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::options::ClusterOptions;
use crate::{Error, Result};

use super::NodeId;

/// Key-to-node mapping shared by every node of a cluster.
///
/// Each physical node owns `virtual_nodes` ring positions at
/// `hash("<node>-<index>")`. Instances built from the same node set and
/// virtual node count agree on every key.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Ring position to owning physical node.
    ring: BTreeMap<u64, NodeId>,
    /// Distinct physical nodes, sorted.
    nodes: Vec<NodeId>,
    virtual_nodes: usize,
}

impl Topology {
    /// Build the ring for `nodes`. Duplicate ids are collapsed.
    pub fn new(nodes: &[NodeId], virtual_nodes: usize) -> Result<Self> {
        if nodes.is_empty() {
            return Err(Error::invalid_configuration("topology needs at least one node"));
        }
        if virtual_nodes == 0 {
            return Err(Error::invalid_configuration("virtual_nodes must be positive"));
        }

        let mut nodes = nodes.to_vec();
        nodes.sort();
        nodes.dedup();

        let mut ring = BTreeMap::new();
        for node in &nodes {
            for index in 0..virtual_nodes {
                let position = hash(format!("{}-{}", node, index).as_bytes());
                // On a collision the node inserted first keeps the position.
                ring.entry(position).or_insert_with(|| node.clone());
            }
        }

        Ok(Self {
            ring,
            nodes,
            virtual_nodes,
        })
    }

    /// Build the ring described by cluster options.
    pub fn from_options(options: &ClusterOptions) -> Result<Self> {
        Self::new(&options.nodes, options.virtual_nodes)
    }

    /// Number of distinct physical nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The physical nodes, sorted.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    pub fn virtual_nodes(&self) -> usize {
        self.virtual_nodes
    }

    /// Owner of the first ring position at or after the key's hash, wrapping around.
    pub fn primary_for(&self, key: &[u8]) -> &NodeId {
        let position = hash(key);
        self.ring
            .range(position..)
            .chain(self.ring.range(..position))
            .map(|(_, node)| node)
            .next()
            // Unreachable: the ring always holds at least one position.
            .unwrap_or(&self.nodes[0])
    }

    /// The first `n` distinct physical nodes clockwise from the key's hash.
    ///
    /// The first entry is the key's primary. Fails with `InvalidArgument`
    /// if the cluster has fewer than `n` nodes.
    pub fn replicas_for(&self, key: &[u8], n: usize) -> Result<Vec<NodeId>> {
        if n > self.nodes.len() {
            return Err(Error::invalid_argument(format!(
                "{} replicas requested from a cluster of {} nodes",
                n,
                self.nodes.len()
            )));
        }

        let position = hash(key);
        let mut replicas: Vec<NodeId> = Vec::with_capacity(n);
        for (_, node) in self.ring.range(position..).chain(self.ring.range(..position)) {
            if replicas.len() == n {
                break;
            }
            if !replicas.contains(node) {
                replicas.push(node.clone());
            }
        }

        if replicas.len() < n {
            return Err(Error::internal(format!(
                "ring walk found {} of {} distinct nodes",
                replicas.len(),
                n
            )));
        }
        Ok(replicas)
    }
}

/// First 8 bytes of the SHA-256 digest, big-endian.
fn hash(bytes: &[u8]) -> u64 {
    let digest = Sha256::digest(bytes);
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(prefix)
}
