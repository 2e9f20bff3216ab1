//! Worker pool completing store operations off the caller's thread
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ caller: store.op(.., cb)     │── job ──┐
//! └──────────────────────────────┘         │ crossbeam channel
//!                                          ▼
//! ┌──────────────────────────────────────────────────────┐
//! │ worker threads: loop { job = rx.recv(); job() }      │
//! │   job = apply op to state, release lock, cb(result)  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! With zero workers jobs run inline on the submitting thread, which keeps
//! completion order deterministic for tests.

use crate::error::{GraphError, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};

type Job = Box<dyn FnOnce() + Send + 'static>;

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Pool without threads: every job runs on the submitting thread
    pub fn inline() -> Self {
        Self {
            sender: None,
            handles: Vec::new(),
        }
    }

    /// Spawn `workers` threads; `0` means run every job inline
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Ok(Self::inline());
        }

        let (sender, receiver) = channel::unbounded::<Job>();
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("powergraph-store-{}", i))
                .spawn(move || Self::worker(receiver))
                .map_err(|e| {
                    GraphError::StoreUnavailable(format!("Failed to spawn store worker: {}", e))
                })?;
            handles.push(handle);
        }

        Ok(Self {
            sender: Some(sender),
            handles,
        })
    }

    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    /// Submit a job; runs it inline when the pool has no workers
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(sender) => {
                if let Err(rejected) = sender.send(Box::new(job)) {
                    // Receivers only vanish during teardown
                    (rejected.into_inner())();
                }
            }
            None => job(),
        }
    }

    fn worker(receiver: Receiver<Job>) {
        while let Ok(job) = receiver.recv() {
            job();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Closing the channel lets every worker drain and exit
        self.sender.take();

        let current = thread::current().id();
        for handle in self.handles.drain(..) {
            // The last store handle can be released from inside a callback
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_inline_pool_runs_immediately() {
        let pool = WorkerPool::new(0).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        pool.execute(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(pool.workers(), 0);
    }

    #[test]
    fn test_threaded_pool_drains_on_drop() {
        let pool = WorkerPool::new(3).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let h = hits.clone();
            pool.execute(move || {
                h.fetch_add(1, Ordering::SeqCst);
            });
        }
        drop(pool);
        assert_eq!(hits.load(Ordering::SeqCst), 100);
    }
}
