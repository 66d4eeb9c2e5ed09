//! Quorum coordinator.
//!
//! A client request fans out to the key's `from` replicas: the local engine
//! is called inline, every other replica gets a proxied request on the
//! worker pool. Replica failures only cost their ack; the request fails when
//! fewer than `ack` replicas succeeded before the replica timeout. Reads
//! resolve the collected versions by last write wins. Nothing is rolled back
//! or repaired.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use crossbeam_channel::unbounded;
use tracing::{debug, warn};

use crate::engine::LsmEngine;
use crate::iterator::RangeIterator;
use crate::options::ClusterOptions;
use crate::types::Cell;
use crate::{Error, Result};

use super::{
    Method, NodeId, ReplicaClient, ReplicaExecutor, ReplicationFactor, Request, Response, Status,
    Topology,
};

/// Entry point of one node for replicated operations.
pub struct Coordinator {
    local: NodeId,
    engine: Arc<LsmEngine>,
    topology: Topology,
    client: Arc<dyn ReplicaClient>,
    executor: ReplicaExecutor,
    replica_timeout: Duration,
}

impl Coordinator {
    /// Create the coordinator for `options.local`, storing its replicas in `engine`.
    pub fn new(
        options: &ClusterOptions,
        engine: Arc<LsmEngine>,
        client: Arc<dyn ReplicaClient>,
    ) -> Result<Arc<Self>> {
        options.validate()?;
        let topology = Topology::from_options(options)?;
        let executor = ReplicaExecutor::new(
            options.worker_threads,
            &format!("quorumkv-replica-{}", options.local),
        )?;

        Ok(Arc::new(Self {
            local: options.local.clone(),
            engine,
            topology,
            client,
            executor,
            replica_timeout: options.replica_timeout,
        }))
    }

    /// This node's id.
    pub fn local(&self) -> &NodeId {
        &self.local
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn engine(&self) -> &Arc<LsmEngine> {
        &self.engine
    }

    /// Serve a request from a front end or, when proxied, from another coordinator.
    ///
    /// A missed quorum is reported as `Status::Timeout`. Invalid requests and
    /// a closed store are errors for the transport to map.
    pub fn handle(&self, request: Request) -> Result<Response> {
        if request.key.is_empty() {
            return Err(Error::invalid_argument("key must not be empty"));
        }
        if request.proxied {
            return self.handle_local(&request);
        }

        let replicas = self.replication_factor(request.replicas)?;
        let outcome = match request.method {
            Method::Get => self.get(&request.key, replicas).map(Response::from_cell),
            Method::Put => {
                let value = request.value.clone().unwrap_or_default();
                self.upsert(&request.key, &value, replicas)
                    .map(|()| Response::new(Status::Created))
            }
            Method::Delete => self
                .remove(&request.key, replicas)
                .map(|()| Response::new(Status::Accepted)),
        };

        match outcome {
            Err(e) if e.is_quorum_failure() => Ok(Response::new(Status::Timeout)),
            other => other,
        }
    }

    /// Perform a proxied request against the local engine only.
    fn handle_local(&self, request: &Request) -> Result<Response> {
        match request.method {
            Method::Get => self.engine.get(&request.key).map(Response::from_cell),
            Method::Put => {
                let value = request.value.as_deref().unwrap_or_default();
                self.engine.upsert(&request.key, value)?;
                Ok(Response::new(Status::Created))
            }
            Method::Delete => {
                self.engine.remove(&request.key)?;
                Ok(Response::new(Status::Accepted))
            }
        }
    }

    /// Quorum read resolved by last write wins.
    ///
    /// Returns the newest version among the answers, which may be a
    /// tombstone, or `Absent` if no replica holds the key.
    pub fn get(&self, key: &[u8], replicas: ReplicationFactor) -> Result<Cell> {
        let request = Request::get(Bytes::copy_from_slice(key));
        let cells = self.replicate(
            key,
            replicas,
            request,
            || self.engine.get(key),
            |node, response| {
                let status = response.status;
                response.into_cell().ok_or_else(|| {
                    Error::replica_unavailable(node, format!("unexpected read status {:?}", status))
                })
            },
        )?;
        Ok(Cell::newest(cells))
    }

    /// Quorum write of `value` for `key`.
    pub fn upsert(&self, key: &[u8], value: &[u8], replicas: ReplicationFactor) -> Result<()> {
        let request = Request::put(Bytes::copy_from_slice(key), Bytes::copy_from_slice(value));
        self.replicate(
            key,
            replicas,
            request,
            || self.engine.upsert(key, value),
            |node, response| expect_status(node, response, Status::Created),
        )?;
        Ok(())
    }

    /// Quorum delete of `key`.
    pub fn remove(&self, key: &[u8], replicas: ReplicationFactor) -> Result<()> {
        let request = Request::delete(Bytes::copy_from_slice(key));
        self.replicate(
            key,
            replicas,
            request,
            || self.engine.remove(key),
            |node, response| expect_status(node, response, Status::Accepted),
        )?;
        Ok(())
    }

    /// Live pairs in `[from, to)` from the local engine only; ranges are not replicated.
    pub fn range(&self, from: &[u8], to: Option<&[u8]>) -> Result<RangeIterator> {
        self.engine.range(from, to)
    }

    fn replication_factor(&self, requested: Option<ReplicationFactor>) -> Result<ReplicationFactor> {
        let cluster_size = self.topology.node_count();
        let replicas = requested.unwrap_or_else(|| ReplicationFactor::default_for(cluster_size));
        replicas.validate(cluster_size)?;
        Ok(replicas)
    }

    /// Run one operation on the key's replicas and collect the successful results.
    ///
    /// Remote calls are queued first so they overlap with the local one.
    /// Answers arriving after the deadline are dropped.
    fn replicate<T, L, D>(
        &self,
        key: &[u8],
        replicas: ReplicationFactor,
        request: Request,
        local: L,
        decode: D,
    ) -> Result<Vec<T>>
    where
        L: FnOnce() -> Result<T>,
        D: Fn(&NodeId, Response) -> Result<T>,
    {
        if key.is_empty() {
            return Err(Error::invalid_argument("key must not be empty"));
        }
        replicas.validate(self.topology.node_count())?;
        let nodes = self.topology.replicas_for(key, replicas.from)?;

        let deadline = Instant::now() + self.replica_timeout;
        let request = request.into_proxied();
        let (tx, rx) = unbounded();
        let mut results = Vec::with_capacity(nodes.len());
        let mut remote = 0;
        let mut includes_local = false;

        for node in nodes {
            if node == self.local {
                includes_local = true;
                continue;
            }
            let client = Arc::clone(&self.client);
            let request = request.clone();
            let tx = tx.clone();
            let target = node.clone();
            let queued = self.executor.execute(move || {
                // A call that waited in the queue only gets what is left of the deadline.
                let remaining = deadline.saturating_duration_since(Instant::now());
                let result = if remaining.is_zero() {
                    Err(Error::replica_unavailable(&target, "deadline passed before the call started"))
                } else {
                    client.call(&target, &request, remaining)
                };
                // The coordinator may have stopped waiting.
                let _ = tx.send((target, result));
            });
            match queued {
                Ok(()) => remote += 1,
                Err(e) => warn!(node = %node, error = %e, "failed to queue replica call"),
            }
        }
        drop(tx);

        if includes_local {
            match local() {
                Ok(value) => results.push(value),
                Err(e) => warn!(node = %self.local, error = %e, "local replica failed"),
            }
        }

        for _ in 0..remote {
            match rx.recv_deadline(deadline) {
                Ok((node, Ok(response))) => match decode(&node, response) {
                    Ok(value) => results.push(value),
                    Err(e) => warn!(node = %node, error = %e, "replica answered unexpectedly"),
                },
                Ok((node, Err(e))) => warn!(node = %node, error = %e, "replica call failed"),
                Err(_) => {
                    warn!(
                        timeout_ms = self.replica_timeout.as_millis() as u64,
                        "replicas did not answer before the deadline"
                    );
                    break;
                }
            }
        }

        if results.len() < replicas.ack {
            warn!(
                acks = results.len(),
                required = replicas.ack,
                from = replicas.from,
                "quorum not reached"
            );
            return Err(Error::QuorumNotReached {
                acks: results.len(),
                required: replicas.ack,
            });
        }

        debug!(acks = results.len(), required = replicas.ack, "quorum reached");
        Ok(results)
    }
}

fn expect_status(node: &NodeId, response: Response, expected: Status) -> Result<()> {
    if response.status == expected {
        Ok(())
    } else {
        Err(Error::replica_unavailable(
            node,
            format!("expected {:?}, got {:?}", expected, response.status),
        ))
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("local", &self.local)
            .field("nodes", &self.topology.nodes())
            .field("replica_timeout", &self.replica_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryTransport;
    use tempfile::{tempdir, TempDir};

    fn single_node() -> (TempDir, Arc<Coordinator>) {
        let dir = tempdir().unwrap();
        let engine = LsmEngine::open(dir.path()).unwrap();
        let options = ClusterOptions::new("solo", ["solo"]).worker_threads(1);
        let coordinator = Coordinator::new(&options, engine, InMemoryTransport::new()).unwrap();
        (dir, coordinator)
    }

    #[test]
    fn test_single_node_round_trip() {
        let (_dir, coordinator) = single_node();

        let response = coordinator.handle(Request::put("k", "v")).unwrap();
        assert_eq!(response.status, Status::Created);

        let response = coordinator.handle(Request::get("k")).unwrap();
        assert_eq!(response.status, Status::Ok);
        assert_eq!(response.body, Some(Bytes::from("v")));

        let response = coordinator.handle(Request::delete("k")).unwrap();
        assert_eq!(response.status, Status::Accepted);

        let response = coordinator.handle(Request::get("k")).unwrap();
        assert_eq!(response.status, Status::NotFound);
        assert!(response.timestamp.is_some());
    }

    #[test]
    fn test_invalid_requests_rejected() {
        let (_dir, coordinator) = single_node();

        assert!(matches!(
            coordinator.handle(Request::get("")),
            Err(Error::InvalidArgument(_))
        ));
        for (ack, from) in [(0, 1), (2, 1), (1, 2)] {
            let request = Request::get("k").with_replicas(ReplicationFactor::new(ack, from));
            assert!(matches!(
                coordinator.handle(request),
                Err(Error::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_proxied_request_stays_local() {
        let (_dir, coordinator) = single_node();

        // A proxied request ignores replication parameters entirely.
        let request = Request::put("k", "v")
            .with_replicas(ReplicationFactor::new(5, 9))
            .into_proxied();
        assert_eq!(coordinator.handle(request).unwrap().status, Status::Created);

        let cell = coordinator.engine().get(b"k").unwrap();
        assert_eq!(cell.data(), Some(&Bytes::from("v")));
    }

    #[test]
    fn test_closed_store_is_an_error() {
        let (_dir, coordinator) = single_node();
        coordinator.engine().close().unwrap();

        assert!(matches!(
            coordinator.handle(Request::put("k", "v").into_proxied()),
            Err(Error::StoreClosed)
        ));
        // The only replica failed, so the quorum is missed.
        let response = coordinator.handle(Request::put("k", "v")).unwrap();
        assert_eq!(response.status, Status::Timeout);
    }
}
