//! Fixed pool of threads issuing remote replica calls.

use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use tracing::warn;

use crate::{Error, Result};

type Task = Box<dyn FnOnce() + Send + 'static>;

/// Worker threads fed through a shared channel.
///
/// Dropping the executor lets queued tasks finish and joins the workers.
pub struct ReplicaExecutor {
    tasks: Option<Sender<Task>>,
    workers: Vec<JoinHandle<()>>,
}

impl ReplicaExecutor {
    /// Start `threads` workers named `<name>-<index>`.
    pub fn new(threads: usize, name: &str) -> Result<Self> {
        if threads == 0 {
            return Err(Error::invalid_configuration("executor needs at least one thread"));
        }

        let (tx, rx) = unbounded::<Task>();
        let mut workers = Vec::with_capacity(threads);
        for index in 0..threads {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, index))
                .spawn(move || {
                    for task in rx {
                        task();
                    }
                })?;
            workers.push(handle);
        }

        Ok(Self {
            tasks: Some(tx),
            workers,
        })
    }

    /// Queue `task` for a worker.
    pub fn execute(&self, task: impl FnOnce() + Send + 'static) -> Result<()> {
        self.tasks
            .as_ref()
            .ok_or_else(|| Error::internal("executor is shut down"))?
            .send(Box::new(task))
            .map_err(|_| Error::internal("executor workers are gone"))
    }

    /// Number of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ReplicaExecutor {
    fn drop(&mut self) {
        // Closing the channel ends each worker's loop once the queue is drained.
        self.tasks.take();

        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            // The last owner may be a task running on one of our own workers.
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                warn!("replica worker panicked");
            }
        }
    }
}

impl std::fmt::Debug for ReplicaExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplicaExecutor")
            .field("threads", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_executor_runs_tasks() {
        let executor = ReplicaExecutor::new(3, "test-worker").unwrap();
        assert_eq!(executor.threads(), 3);

        let (tx, rx) = unbounded();
        for i in 0..10 {
            let tx = tx.clone();
            executor.execute(move || tx.send(i).unwrap()).unwrap();
        }
        drop(tx);

        let mut results: Vec<i32> = rx.iter().collect();
        results.sort();
        assert_eq!(results, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_drop_drains_queue() {
        let counter = Arc::new(AtomicUsize::new(0));
        {
            let executor = ReplicaExecutor::new(1, "test-worker").unwrap();
            for _ in 0..5 {
                let counter = Arc::clone(&counter);
                executor
                    .execute(move || {
                        counter.fetch_add(1, Ordering::SeqCst);
                    })
                    .unwrap();
            }
        }
        assert_eq!(counter.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_zero_threads_rejected() {
        assert!(ReplicaExecutor::new(0, "test-worker").is_err());
    }
}
