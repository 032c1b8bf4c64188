// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Executor seam.
//!
//! The runtime never runs step code on its own threads directly. Every
//! start and every resumption of a run is handed to an `Executor` as a
//! `Job`. `ThreadPool` is the default implementation.
//!
//! Components:
//! - `queue`: shared FIFO the pool workers park on
//! - `pool`: fixed-size worker pool

mod pool;
mod queue;

use std::sync::{Arc, OnceLock};

pub use pool::ThreadPool;

/// One unit of work: the next slice of some coroutine run.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Accepts jobs and runs them on some worker, eventually.
pub trait Executor: Send + Sync {
    /// Schedule `job`. Returns it unexecuted when the executor no longer
    /// accepts work.
    fn execute(&self, job: Job) -> Result<(), Job>;
}

/// Process-wide pool sized to the machine, created on first use.
pub fn shared() -> Arc<dyn Executor> {
    static POOL: OnceLock<Arc<ThreadPool>> = OnceLock::new();
    let pool = POOL.get_or_init(|| Arc::new(ThreadPool::new(0)));
    pool.clone()
}
