//! Cluster layer - partitioning and quorum replication over local engines.
//!
//! - [`Topology`] maps keys to an ordered set of distinct physical nodes
//!   using a consistent-hash ring with virtual nodes.
//! - [`Coordinator`] fans a request out to a key's replicas, counts
//!   acknowledgements and resolves conflicting reads by timestamp.
//! - [`ReplicaClient`] is the seam to the transport; [`InMemoryTransport`]
//!   connects coordinators living in the same process.

mod coordinator;
mod executor;
mod protocol;
mod topology;
mod transport;

pub use coordinator::Coordinator;
pub use executor::ReplicaExecutor;
pub use protocol::{Method, Request, Response, Status};
pub use topology::Topology;
pub use transport::{InMemoryTransport, ReplicaClient};

use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Identity of a physical node, e.g. its `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

/// Replication parameters of one request: contact `from` replicas, require `ack` successes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicationFactor {
    pub ack: usize,
    pub from: usize,
}

impl ReplicationFactor {
    pub fn new(ack: usize, from: usize) -> Self {
        Self { ack, from }
    }

    /// Majority of the whole cluster.
    pub fn default_for(cluster_size: usize) -> Self {
        Self {
            ack: cluster_size / 2 + 1,
            from: cluster_size,
        }
    }

    /// Check `1 <= ack <= from <= cluster_size`.
    pub fn validate(&self, cluster_size: usize) -> Result<()> {
        if self.ack < 1 {
            return Err(Error::invalid_argument("ack must be at least 1"));
        }
        if self.from < self.ack {
            return Err(Error::invalid_argument(format!(
                "from ({}) must not be less than ack ({})",
                self.from, self.ack
            )));
        }
        if self.from > cluster_size {
            return Err(Error::invalid_argument(format!(
                "from ({}) exceeds the cluster size ({})",
                self.from, cluster_size
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ReplicationFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ack, self.from)
    }
}

impl FromStr for ReplicationFactor {
    type Err = Error;

    /// Parse the `ack/from` notation, e.g. `2/3`.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::invalid_argument(format!("replicas {:?} is not of the form ack/from", s));
        let (ack, from) = s.split_once('/').ok_or_else(invalid)?;
        let ack = ack.trim().parse().map_err(|_| invalid())?;
        let from = from.trim().parse().map_err(|_| invalid())?;
        Ok(Self { ack, from })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_replication_factor() {
        assert_eq!("2/3".parse::<ReplicationFactor>().unwrap(), ReplicationFactor::new(2, 3));
        assert_eq!(" 1 / 1 ".parse::<ReplicationFactor>().unwrap(), ReplicationFactor::new(1, 1));
        assert_eq!(ReplicationFactor::new(2, 3).to_string(), "2/3");

        for bad in ["", "2", "2/", "/3", "a/b", "-1/3", "2/3/4"] {
            assert!(matches!(
                bad.parse::<ReplicationFactor>(),
                Err(Error::InvalidArgument(_))
            ), "{:?} should not parse", bad);
        }
    }

    #[test]
    fn test_default_replication_factor() {
        assert_eq!(ReplicationFactor::default_for(1), ReplicationFactor::new(1, 1));
        assert_eq!(ReplicationFactor::default_for(3), ReplicationFactor::new(2, 3));
        assert_eq!(ReplicationFactor::default_for(4), ReplicationFactor::new(3, 4));
    }

    #[test]
    fn test_validate_replication_factor() {
        assert!(ReplicationFactor::new(2, 3).validate(3).is_ok());
        assert!(ReplicationFactor::new(3, 3).validate(3).is_ok());
        assert!(ReplicationFactor::new(0, 3).validate(3).is_err());
        assert!(ReplicationFactor::new(3, 2).validate(3).is_err());
        assert!(ReplicationFactor::new(2, 4).validate(3).is_err());
    }
}
