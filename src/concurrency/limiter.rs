use futures::future::join_all;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::trace;

use crate::error::{GuardError, Result};

/// Build a limiter that runs at most `concurrency` tasks at once.
///
/// Zero is treated as one.
pub fn with_limit(concurrency: usize) -> ConcurrencyLimiter {
    ConcurrencyLimiter::new(concurrency)
}

/// Bounded fan-out. Extra tasks wait in FIFO order for a free slot.
///
/// Clones share the same slots.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    waiting: Arc<AtomicUsize>,
    capacity: usize,
}

/// Keeps the queue gauge right when a waiting task is dropped
struct QueuedGuard<'a>(&'a AtomicUsize);

impl Drop for QueuedGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ConcurrencyLimiter {
    pub fn new(concurrency: usize) -> Self {
        let capacity = concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            waiting: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    /// Run `task` once a slot is free and hand back its output
    pub async fn run<F, T>(&self, task: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        let permit = {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            let _queued = QueuedGuard(&self.waiting);
            self.semaphore
                .acquire()
                .await
                .map_err(|e| GuardError::Internal(format!("concurrency limiter closed: {}", e)))?
        };

        trace!(in_flight = self.in_flight(), capacity = self.capacity, "Acquired slot");
        let output = task.await;
        drop(permit);

        Ok(output)
    }

    /// Run every task through the limiter; outputs keep input order
    pub async fn run_all<I, F, T>(&self, tasks: I) -> Result<Vec<T>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = T>,
    {
        join_all(tasks.into_iter().map(|task| self.run(task)))
            .await
            .into_iter()
            .collect()
    }

    /// Tasks currently holding a slot
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }

    /// Tasks waiting for a slot
    pub fn queued(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
