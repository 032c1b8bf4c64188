// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Fixed-size worker pool.
//!
//! N worker threads pull jobs from one shared queue. A job is the next
//! slice of some coroutine run; suspended runs are not in the queue at
//! all, so no worker ever sits on a blocked run.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use super::queue::JobQueue;
use super::{Executor, Job};
use crate::error::CoroutineError;
use crate::sync::lock;

/// Thread pool executor. Shuts down on drop after running every job
/// already queued.
pub struct ThreadPool {
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
    shared: Arc<SharedState>,
}

struct SharedState {
    queue: JobQueue,
    shutdown: AtomicBool,
    worker_count: usize,
}

impl ThreadPool {
    /// Start a pool with `n` workers. `0` means one per available core.
    pub fn new(n: usize) -> Self {
        let worker_count = if n == 0 {
            thread::available_parallelism()
                .map(|p| p.get())
                .unwrap_or(4)
        } else {
            n
        };

        let shared = Arc::new(SharedState {
            queue: JobQueue::new(),
            shutdown: AtomicBool::new(false),
            worker_count,
        });

        let workers = (0..worker_count)
            .map(|id| {
                let shared = shared.clone();
                thread::Builder::new()
                    .name(format!("weft-worker-{}", id))
                    .spawn(move || worker_loop(id, &shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        tracing::debug!(workers = worker_count, "thread pool started");

        Self {
            workers: Mutex::new(workers),
            shared,
        }
    }

    pub fn worker_count(&self) -> usize {
        self.shared.worker_count
    }

    /// Jobs waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting jobs, let workers drain the queue, then join them.
    /// Safe to call from one of the pool's own workers; that worker is
    /// left to exit on its own.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.queue.close();

        let current = thread::current().id();
        let mut workers = lock(&self.workers);
        for handle in workers.drain(..) {
            if handle.thread().id() == current {
                continue;
            }
            let _ = handle.join();
        }
        tracing::debug!("thread pool stopped");
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) -> Result<(), Job> {
        self.shared.queue.push(job)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.shared.worker_count)
            .field("queued", &self.shared.queue.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Worker main loop. Exits once the queue is closed and empty.
fn worker_loop(id: usize, shared: &SharedState) {
    while let Some(job) = shared.queue.pop() {
        // Steps catch their own panics; this only guards the worker.
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            let err = CoroutineError::from_panic(payload);
            tracing::error!(worker = id, error = %err, "job panicked");
        }
    }
}
