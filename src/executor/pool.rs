//! The `ThreadPool` implementation.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Condvar, Mutex};

use crate::executor::{Executor, Job};

/// A fixed-size pool of worker threads draining a shared job queue.
///
/// Jobs are executed in submission order by whichever worker picks them up
/// first; no fairness guarantee beyond that. Dropping the pool signals the
/// workers to stop after the queue drains and joins them.
///
/// # Example
///
/// ```rust
/// use stagekit::executor::{Executor, ThreadPool};
/// use std::sync::mpsc;
///
/// let pool = ThreadPool::new(2);
/// let (tx, rx) = mpsc::channel();
///
/// pool.execute(Box::new(move || {
///     tx.send(42).unwrap();
/// }));
///
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

struct PoolShared {
    /// Queue of jobs waiting for a worker.
    queue: Mutex<PoolQueue>,
    /// Signalled when a job is pushed or shutdown begins.
    available: Condvar,
}

struct PoolQueue {
    jobs: VecDeque<Job>,
    shutdown: bool,
}

impl ThreadPool {
    /// Creates a pool with `workers` worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `workers` is zero.
    #[must_use]
    pub fn new(workers: usize) -> Self {
        assert!(workers > 0, "ThreadPool requires at least one worker");

        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        });

        let handles = (0..workers)
            .map(|i| {
                let shared = Arc::clone(&shared);
                std::thread::Builder::new()
                    .name(format!("stagekit-worker-{i}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn worker thread")
            })
            .collect();

        Self {
            shared,
            workers: handles,
        }
    }

    /// Returns the number of jobs waiting for a worker.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.shared.queue.lock().jobs.len()
    }

    /// Returns the number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Executor for ThreadPool {
    fn execute(&self, job: Job) {
        let mut queue = self.shared.queue.lock();
        if queue.shutdown {
            // Pool is draining; the job would never run. Drop it quietly,
            // matching the executor contract of "eventual execution" only
            // for pools that are still alive.
            return;
        }
        queue.jobs.push_back(job);
        drop(queue);
        self.shared.available.notify_one();
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shared.queue.lock().shutdown = true;
        self.shared.available.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPool")
            .field("workers", &self.workers.len())
            .field("queued", &self.queued_count())
            .finish()
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.shutdown {
                    return;
                }
                shared.available.wait(&mut queue);
            }
        };

        // A panicking job must not take the worker down with it.
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
    }
}
