// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded compute pool for CPU-heavy handlers.
//!
//! Path planning and dispatch rounds must never run on a connection's I/O
//! task. They go through this pool: a semaphore bounds how many closures run
//! at once, and each closure executes on tokio's blocking thread pool. A
//! panicking closure is contained and logged; the pool keeps serving.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{error, warn};

pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl WorkerPool {
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "worker pool capacity must be > 0");
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Queue a closure for execution off the I/O tasks. Returns immediately;
    /// the closure runs once a pool slot frees up.
    pub fn spawn<F>(&self, label: &'static str, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    warn!(label, "worker pool closed, dropping task");
                    return;
                }
            };
            if let Err(e) = tokio::task::spawn_blocking(f).await {
                if e.is_panic() {
                    error!(label, "worker task panicked, pool continues");
                }
            }
        });
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_tasks_run() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.spawn("test", move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        for _ in 0..100 {
            if counter.load(Ordering::SeqCst) == 8 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("tasks did not complete: {}", counter.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new(2);
        let peak = Arc::new(AtomicUsize::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..6 {
            let peak = Arc::clone(&peak);
            let current = Arc::clone(&current);
            let done = Arc::clone(&done);
            pool.spawn("bounded", move || {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(30));
                current.fetch_sub(1, Ordering::SeqCst);
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        for _ in 0..200 {
            if done.load(Ordering::SeqCst) == 6 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(done.load(Ordering::SeqCst), 6);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let pool = WorkerPool::new(1);
        let after = Arc::new(AtomicUsize::new(0));

        pool.spawn("boom", || panic!("deliberate"));
        let after2 = Arc::clone(&after);
        pool.spawn("survivor", move || {
            after2.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..100 {
            if after.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("pool did not survive a worker panic");
    }
}
