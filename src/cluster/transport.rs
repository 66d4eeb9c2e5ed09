//! Replica transport seam and an in-process implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;

use crate::{Error, Result};

use super::{Coordinator, NodeId, Request, Response};

/// Sends a proxied request to another node and returns its answer.
///
/// The coordinator calls this from a shared pool of worker threads, so an
/// implementation must give up after `timeout` instead of holding a worker
/// for as long as the remote node takes.
pub trait ReplicaClient: Send + Sync {
    fn call(&self, node: &NodeId, request: &Request, timeout: Duration) -> Result<Response>;
}

/// Shared registry dispatching requests straight to coordinators in the
/// same process.
///
/// Nodes can be marked down or slowed down to inject faults. The registry
/// only holds weak references, so a coordinator that is dropped behaves
/// like a crashed node.
#[derive(Default)]
pub struct InMemoryTransport {
    nodes: RwLock<BTreeMap<NodeId, Weak<Coordinator>>>,
    down: RwLock<BTreeSet<NodeId>>,
    delays: RwLock<BTreeMap<NodeId, Duration>>,
}

impl InMemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a coordinator so it can receive in-process requests.
    pub fn register(&self, coordinator: &Arc<Coordinator>) {
        self.nodes
            .write()
            .insert(coordinator.local().clone(), Arc::downgrade(coordinator));
    }

    /// Remove a node from the registry.
    pub fn deregister(&self, node: &NodeId) {
        self.nodes.write().remove(node);
    }

    /// Make calls to `node` fail (`true`) or succeed again (`false`).
    pub fn set_down(&self, node: &NodeId, down: bool) {
        if down {
            self.down.write().insert(node.clone());
        } else {
            self.down.write().remove(node);
        }
    }

    pub fn is_down(&self, node: &NodeId) -> bool {
        self.down.read().contains(node)
    }

    /// Delay every call to `node` by `delay`; `Duration::ZERO` clears it.
    pub fn set_delay(&self, node: &NodeId, delay: Duration) {
        if delay.is_zero() {
            self.delays.write().remove(node);
        } else {
            self.delays.write().insert(node.clone(), delay);
        }
    }

    /// Number of registered nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }
}

impl ReplicaClient for InMemoryTransport {
    fn call(&self, node: &NodeId, request: &Request, timeout: Duration) -> Result<Response> {
        let delay = self.delays.read().get(node).copied();
        if let Some(delay) = delay {
            if delay > timeout {
                thread::sleep(timeout);
                return Err(Error::replica_unavailable(
                    node,
                    format!("no answer within {} ms", timeout.as_millis()),
                ));
            }
            thread::sleep(delay);
        }

        if self.is_down(node) {
            return Err(Error::replica_unavailable(node, "node is down"));
        }

        let coordinator = self
            .nodes
            .read()
            .get(node)
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::replica_unavailable(node, "node is not registered"))?;
        coordinator.handle(request.clone())
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("nodes", &self.nodes.read().keys().collect::<Vec<_>>())
            .field("down", &*self.down.read())
            .finish()
    }
}
