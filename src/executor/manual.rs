//! Deterministic executors for tests.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::executor::{Executor, Job};

/// A deterministic executor that runs jobs only when told to.
///
/// Submitted jobs queue up until you call [`step`] or [`run_until_idle`],
/// making execution order fully controlled by the test. Clones share the
/// same queue.
///
/// # Example
///
/// ```rust
/// use stagekit::executor::{Executor, ManualExecutor};
///
/// let executor = ManualExecutor::new();
///
/// executor.execute(Box::new(|| {}));
/// executor.execute(Box::new(|| {}));
/// assert_eq!(executor.pending_count(), 2);
///
/// // Run one job at a time, first-submitted first
/// assert!(executor.step());
/// assert_eq!(executor.pending_count(), 1);
///
/// assert_eq!(executor.run_until_idle(), 1);
/// assert!(!executor.step());
/// ```
///
/// [`step`]: ManualExecutor::step
/// [`run_until_idle`]: ManualExecutor::run_until_idle
#[derive(Clone, Default)]
pub struct ManualExecutor {
    queue: Arc<Mutex<VecDeque<Job>>>,
}

impl ManualExecutor {
    /// Creates a new manual executor with an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of jobs waiting to run.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if no jobs are waiting.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.pending_count() == 0
    }

    /// Runs the oldest queued job on the calling thread.
    ///
    /// Returns `true` if a job ran, `false` if the queue was empty.
    pub fn step(&self) -> bool {
        // Pop before running: the job may submit further jobs.
        let job = self.queue.lock().pop_front();
        match job {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Runs queued jobs until the queue is empty, including jobs queued by
    /// the jobs themselves.
    ///
    /// Returns the number of jobs run.
    pub fn run_until_idle(&self) -> usize {
        let mut count = 0;
        while self.step() {
            count += 1;
        }
        count
    }
}

impl Executor for ManualExecutor {
    fn execute(&self, job: Job) {
        self.queue.lock().push_back(job);
    }
}

impl std::fmt::Debug for ManualExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualExecutor")
            .field("pending", &self.pending_count())
            .finish()
    }
}

/// An executor that runs every job immediately on the submitting thread.
///
/// Useful when a test wants combinators to fire synchronously with no
/// scheduling at all.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl InlineExecutor {
    /// Creates an inline executor.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Executor for InlineExecutor {
    fn execute(&self, job: Job) {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_jobs_queue_until_stepped() {
        let executor = ManualExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&counter);
        executor.execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(executor.step());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_step_returns_false_when_idle() {
        let executor = ManualExecutor::new();
        assert!(executor.is_idle());
        assert!(!executor.step());
    }

    #[test]
    fn test_fifo_order() {
        let executor = ManualExecutor::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let order = Arc::clone(&order);
            executor.execute(Box::new(move || order.lock().push(i)));
        }

        assert_eq!(executor.run_until_idle(), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[test]
    fn test_job_submitting_job() {
        let executor = ManualExecutor::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_counter = Arc::clone(&counter);
        let inner_executor = executor.clone();
        executor.execute(Box::new(move || {
            let c = Arc::clone(&inner_counter);
            inner_executor.execute(Box::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }));
        }));

        assert_eq!(executor.run_until_idle(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_clone_shares_queue() {
        let executor1 = ManualExecutor::new();
        let executor2 = executor1.clone();

        executor1.execute(Box::new(|| {}));
        assert_eq!(executor2.pending_count(), 1);
        assert!(executor2.step());
        assert!(executor1.is_idle());
    }

    #[test]
    fn test_inline_runs_immediately() {
        let executor = InlineExecutor::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let r = Arc::clone(&ran);
        executor.execute(Box::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        }));

        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_debug() {
        let executor = ManualExecutor::new();
        executor.execute(Box::new(|| {}));
        let debug = format!("{executor:?}");
        assert!(debug.contains("ManualExecutor"));
        assert!(debug.contains("pending"));
    }
}
