// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Job injection queue shared by all pool workers.
//!
//! Runs resume from arbitrary threads (whoever completed the channel
//! operation), so there is one global FIFO instead of per-worker deques.
//! Idle workers park on the condvar until a push or close.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use super::Job;
use crate::sync::{lock, wait};

struct QueueState {
    jobs: VecDeque<Job>,
    closed: bool,
}

pub(crate) struct JobQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl JobQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                closed: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Enqueue a job. Hands it back if the queue is closed.
    pub fn push(&self, job: Job) -> Result<(), Job> {
        let mut state = lock(&self.state);
        if state.closed {
            return Err(job);
        }
        state.jobs.push_back(job);
        drop(state);
        self.available.notify_one();
        Ok(())
    }

    /// Pop without waiting.
    #[cfg(test)]
    pub fn try_pop(&self) -> Option<Job> {
        lock(&self.state).jobs.pop_front()
    }

    /// Pop, parking until a job arrives. Returns `None` once the queue is
    /// closed and fully drained.
    pub fn pop(&self) -> Option<Job> {
        let mut state = lock(&self.state);
        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }
            if state.closed {
                return None;
            }
            state = wait(&self.available, state);
        }
    }

    /// Refuse new jobs and wake every parked worker. Already queued jobs
    /// are still handed out.
    pub fn close(&self) {
        lock(&self.state).closed = true;
        self.available.notify_all();
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub fn len(&self) -> usize {
        lock(&self.state).jobs.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        lock(&self.state).jobs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_job(counter: &Arc<AtomicUsize>) -> Job {
        let c = counter.clone();
        Box::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        })
    }

    #[test]
    fn push_pop_fifo() {
        let q = JobQueue::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..3 {
            let o = order.clone();
            q.push(Box::new(move || lock(&o).push(i))).ok();
        }
        assert_eq!(q.len(), 3);
        while let Some(job) = q.try_pop() {
            job();
        }
        assert_eq!(*lock(&order), vec![0, 1, 2]);
        assert!(q.is_empty());
    }

    #[test]
    fn closed_queue_rejects_but_drains() {
        let q = JobQueue::new();
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(q.push(counting_job(&counter)).is_ok());
        q.close();
        assert!(q.is_closed());
        assert!(q.push(counting_job(&counter)).is_err());

        let job = q.pop().unwrap();
        job();
        assert!(q.pop().is_none());
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn pop_wakes_on_push() {
        let q = Arc::new(JobQueue::new());
        let counter = Arc::new(AtomicUsize::new(0));
        let q2 = q.clone();
        let worker = std::thread::spawn(move || {
            if let Some(job) = q2.pop() {
                job();
            }
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        q.push(counting_job(&counter)).ok();
        worker.join().unwrap();
        assert_eq!(counter.load(Ordering::Relaxed), 1);
    }
}
