//! Scheduling of the dispatch and receive stages.
//!
//! Build and dispatch run on the caller's task, optionally serialized by a
//! [`LockKey`]. Receive runs on a spawned task gated by a semaphore, so at
//! most `pool_size` responses are read at once and further calls queue.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{MutexGuard, Semaphore};
use tokio::task::JoinHandle;
use tracing::trace;

use crate::args::LockKey;

pub const DEFAULT_RECEIVE_POOL_SIZE: usize = 8;

#[derive(Debug, Clone)]
pub struct Coordinator {
    receive_permits: Arc<Semaphore>,
    pool_size: usize,
}

impl Coordinator {
    /// A coordinator whose receive pool has `pool_size` slots (at least one).
    pub fn new(pool_size: usize) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            receive_permits: Arc::new(Semaphore::new(pool_size)),
            pool_size,
        }
    }

    /// Enter the build and dispatch section for a call.
    ///
    /// With a key, waits until no other call holding the same key is inside
    /// the section. Without one, returns immediately.
    pub async fn enter_dispatch<'a>(&self, key: Option<&'a LockKey>) -> Option<MutexGuard<'a, ()>> {
        match key {
            Some(key) => {
                trace!(lock_key = key.id(), "waiting for dispatch lock");
                Some(key.acquire().await)
            }
            None => None,
        }
    }

    /// Run `work` on the receive pool.
    ///
    /// The task is spawned immediately and waits for a permit inside, so a
    /// saturated pool queues work rather than rejecting it.
    pub fn spawn_receive<F>(&self, work: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = Arc::clone(&self.receive_permits);
        tokio::spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            work.await
        })
    }

    /// Receive tasks currently holding a pool slot.
    pub fn active_receives(&self) -> usize {
        self.pool_size - self.receive_permits.available_permits()
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new(DEFAULT_RECEIVE_POOL_SIZE)
    }
}
