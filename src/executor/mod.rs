//! Executor capabilities for running producers and continuations
//!
//! Stages never own threads. Everything that runs concurrently — producer
//! computations and the `_on` combinator variants — is handed to an
//! [`Executor`], a capability injected at submission time. Three
//! implementations ship with the crate:
//!
//! - [`ThreadPool`] - a fixed set of worker threads draining a shared queue
//! - [`ManualExecutor`] - a deterministic executor for tests; jobs run only
//!   when you call [`step`] or [`run_until_idle`]
//! - [`InlineExecutor`] - runs jobs immediately on the submitting thread
//!
//! # Example
//!
//! ```rust
//! use stagekit::executor::{Executor, ManualExecutor};
//!
//! let executor = ManualExecutor::new();
//! executor.execute(Box::new(|| println!("hello")));
//!
//! // Nothing has run yet
//! assert_eq!(executor.pending_count(), 1);
//! assert!(executor.step());
//! ```
//!
//! [`step`]: ManualExecutor::step
//! [`run_until_idle`]: ManualExecutor::run_until_idle

mod manual;
mod pool;

pub use manual::{InlineExecutor, ManualExecutor};
pub use pool::ThreadPool;

use std::sync::{Arc, OnceLock};

/// A zero-argument computation submitted for asynchronous execution.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The capability stages consume: run a submitted job, eventually, exactly once.
///
/// No fairness or priority guarantee is required of an implementation, only
/// that every submitted job is eventually executed and never executed twice.
pub trait Executor: Send + Sync {
    /// Submits a job for execution.
    fn execute(&self, job: Job);
}

/// A shareable, type-erased executor handle.
///
/// Combinator `_on` variants and producer submission take this type so that
/// the handle can outlive the call and fire continuations later.
pub type SharedExecutor = Arc<dyn Executor>;

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job);
    }
}

/// Returns the process-wide default executor.
///
/// The default is a [`ThreadPool`] sized to the machine's available
/// parallelism, created on first use and never torn down. Its lifecycle is
/// independent of any stage; unrelated stage graphs may share it.
///
/// # Example
///
/// ```rust
/// use stagekit::executor::default_executor;
///
/// let executor = default_executor();
/// executor.execute(Box::new(|| {}));
/// ```
pub fn default_executor() -> SharedExecutor {
    static DEFAULT: OnceLock<Arc<ThreadPool>> = OnceLock::new();

    let pool = DEFAULT.get_or_init(|| {
        let workers = std::thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(4);
        Arc::new(ThreadPool::new(workers))
    });
    Arc::clone(pool) as SharedExecutor
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_default_executor_is_shared() {
        let a = default_executor();
        let b = default_executor();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_default_executor_runs_jobs() {
        let executor = default_executor();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            executor.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while counter.load(Ordering::SeqCst) < 8 {
            assert!(std::time::Instant::now() < deadline, "jobs never ran");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_arc_executor_delegates() {
        let executor = Arc::new(ManualExecutor::new());
        executor.execute(Box::new(|| {}));
        assert_eq!(executor.pending_count(), 1);
    }
}
