//! Shared worker pool
//!
//! All devices of one engine run their I/O on the same tokio runtime. Fetches
//! and commands go through [`WorkerPool::submit`], which bounds how many of
//! them are in progress at once; timers go through [`WorkerPool::schedule`]
//! and hold no permit while they sleep.

use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;

#[derive(Clone)]
pub struct WorkerPool {
    runtime: Handle,
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    /// Pool on the runtime of the calling task.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn current(config: &EngineConfig) -> Self {
        Self::with_handle(Handle::current(), config)
    }

    pub fn with_handle(runtime: Handle, config: &EngineConfig) -> Self {
        let capacity = config.max_concurrent_fetches.max(1);
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Run blocking-ish device I/O once a permit is free
    pub fn submit<F>(&self, work: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let permits = self.permits.clone();
        self.runtime.spawn(async move {
            // The semaphore is never closed, so acquisition only waits
            let _permit = permits.acquire_owned().await.ok();
            work.await
        })
    }

    /// Run a lightweight timer task
    pub fn schedule<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.runtime.spawn(task)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by running work
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn submit_bounds_concurrency() {
        let pool = WorkerPool::current(&EngineConfig { max_concurrent_fetches: 2 });
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..6)
            .map(|_| {
                let running = running.clone();
                let peak = peak.clone();
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn schedule_does_not_take_permits() {
        let pool = WorkerPool::current(&EngineConfig { max_concurrent_fetches: 1 });
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let timer = pool.schedule(async move {
            let _ = rx.await;
        });
        let work = pool.submit(async { 7 });

        assert_eq!(work.await.unwrap(), 7);
        tx.send(()).unwrap();
        timer.await.unwrap();
    }
}
