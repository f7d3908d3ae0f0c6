//! The blocking wait protocol: `get`, bounded `get`, `get_now`, `join`.
//!
//! Waiters block on the stage's condition variable and are released the
//! moment the transition commits; listeners are never substituted for
//! direct waiters. A timed-out wait is purely a property of that call:
//! the stage is untouched and a later wait may succeed.

use std::time::{Duration, Instant};

use crate::error::{Result, StageError};
use crate::stage::Stage;

impl<T: Clone> Stage<T> {
    /// Blocks the calling thread until the stage is terminal.
    ///
    /// Returns the value if fulfilled, the original error if failed, and
    /// [`StageError::Cancelled`] if cancelled. Safe to call from any
    /// number of threads concurrently; every blocked caller wakes at the
    /// transition.
    ///
    /// # Errors
    ///
    /// Returns the stage's failure or [`StageError::Cancelled`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use stagekit::stage::Stage;
    ///
    /// let stage = Stage::supply(|| "payload");
    /// assert_eq!(stage.get().unwrap(), "payload");
    /// ```
    pub fn get(&self) -> Result<T> {
        self.await_outcome().to_result()
    }

    /// Blocks until the stage is terminal or `timeout` elapses.
    ///
    /// On expiry the stage itself is untouched — `is_done()` stays false
    /// and a later wait may still succeed. A `timeout` too large to
    /// represent as a deadline (such as `Duration::MAX`) waits unbounded,
    /// like [`get`].
    ///
    /// # Errors
    ///
    /// Returns [`StageError::Timeout`] if the deadline passed first,
    /// otherwise as [`get`].
    ///
    /// [`get`]: Stage::get
    pub fn get_timed(&self, timeout: Duration) -> Result<T> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return self.await_outcome().to_result();
        };
        match self.await_outcome_until(deadline) {
            Some(outcome) => outcome.to_result(),
            None => Err(StageError::Timeout(timeout)),
        }
    }

    /// Non-blocking read: the value if already fulfilled, `default` if
    /// still pending.
    ///
    /// No listener is registered and the calling thread never blocks.
    ///
    /// # Errors
    ///
    /// Re-raises the stage's failure (or [`StageError::Cancelled`]) if it
    /// is already terminal without a value.
    pub fn get_now(&self, default: T) -> Result<T> {
        match self.terminal_outcome() {
            Some(outcome) => outcome.to_result(),
            None => Ok(default),
        }
    }

    /// Non-blocking peek at the terminal result, if any.
    ///
    /// `None` while the stage is pending.
    #[must_use]
    pub fn try_result(&self) -> Option<Result<T>> {
        self.terminal_outcome().map(|outcome| outcome.to_result())
    }

    /// Blocks like [`get`] but collapses every failure cause into a
    /// panic, for callers uninterested in distinguishing them.
    ///
    /// # Panics
    ///
    /// Panics if the stage failed or was cancelled.
    ///
    /// [`get`]: Stage::get
    #[must_use]
    pub fn join(&self) -> T {
        match self.get() {
            Ok(value) => value,
            Err(error) => panic!("stage completed exceptionally: {error}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_get_blocks_until_completed() {
        let stage: Stage<i32> = Stage::new();

        let completer = stage.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            assert!(completer.complete(7));
        });

        assert_eq!(stage.get().unwrap(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn test_get_from_many_threads() {
        let stage: Stage<i32> = Stage::new();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let stage = stage.clone();
                std::thread::spawn(move || stage.get().unwrap())
            })
            .collect();

        std::thread::sleep(Duration::from_millis(10));
        assert!(stage.complete(5));

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), 5);
        }
    }

    #[test]
    fn test_get_reraises_failure() {
        let stage: Stage<i32> = Stage::failed(StageError::producer("boom"));
        assert_eq!(stage.get(), Err(StageError::producer("boom")));
    }

    #[test]
    fn test_get_reports_cancellation() {
        let stage: Stage<i32> = Stage::new();
        assert!(stage.cancel(true));
        assert_eq!(stage.get(), Err(StageError::Cancelled));
    }

    #[test]
    fn test_get_timed_expires_without_touching_stage() {
        let stage: Stage<i32> = Stage::new();

        let result = stage.get_timed(Duration::from_millis(10));
        assert_eq!(result, Err(StageError::Timeout(Duration::from_millis(10))));

        // The timeout belongs to the call, not the stage.
        assert!(!stage.is_done());
        assert!(stage.complete(3));
        assert_eq!(stage.get_timed(Duration::from_millis(10)).unwrap(), 3);
    }

    #[test]
    fn test_get_timed_with_overlong_timeout_waits_unbounded() {
        let stage: Stage<i32> = Stage::new();

        let completer = stage.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            assert!(completer.complete(4));
        });

        // Duration::MAX overflows deadline arithmetic; the wait must
        // degrade to unbounded instead of panicking.
        assert_eq!(stage.get_timed(Duration::MAX).unwrap(), 4);
    }

    #[test]
    fn test_get_timed_returns_before_deadline() {
        let stage: Stage<i32> = Stage::new();

        let completer = stage.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            assert!(completer.complete(1));
        });

        assert_eq!(stage.get_timed(Duration::from_secs(5)).unwrap(), 1);
    }

    #[test]
    fn test_get_now_default_while_pending() {
        let stage: Stage<i32> = Stage::new();
        assert_eq!(stage.get_now(-1).unwrap(), -1);
        assert!(!stage.is_done());
    }

    #[test]
    fn test_get_now_value_when_fulfilled() {
        let stage = Stage::completed(10);
        assert_eq!(stage.get_now(-1).unwrap(), 10);
    }

    #[test]
    fn test_get_now_reraises_when_failed() {
        let stage: Stage<i32> = Stage::failed(StageError::producer("boom"));
        assert_eq!(stage.get_now(-1), Err(StageError::producer("boom")));

        let cancelled: Stage<i32> = Stage::new();
        assert!(cancelled.cancel(false));
        assert_eq!(cancelled.get_now(-1), Err(StageError::Cancelled));
    }

    #[test]
    fn test_try_result() {
        let stage: Stage<i32> = Stage::new();
        assert!(stage.try_result().is_none());
        assert!(stage.complete(2));
        assert_eq!(stage.try_result(), Some(Ok(2)));
    }

    #[test]
    fn test_join_returns_value() {
        let stage = Stage::supply(|| 8);
        assert_eq!(stage.join(), 8);
    }

    #[test]
    #[should_panic(expected = "stage completed exceptionally")]
    fn test_join_panics_on_failure() {
        let stage: Stage<i32> = Stage::failed(StageError::producer("boom"));
        let _ = stage.join();
    }

    #[test]
    #[should_panic(expected = "stage completed exceptionally")]
    fn test_join_panics_on_cancellation() {
        let stage: Stage<i32> = Stage::new();
        assert!(stage.cancel(false));
        let _ = stage.join();
    }

    #[test]
    fn test_cancel_wakes_blocked_waiters() {
        let stage: Stage<i32> = Stage::new();

        let waiter = {
            let stage = stage.clone();
            std::thread::spawn(move || stage.get())
        };

        std::thread::sleep(Duration::from_millis(10));
        assert!(stage.cancel(false));
        assert_eq!(waiter.join().unwrap(), Err(StageError::Cancelled));
    }

    #[test]
    fn test_waiters_wake_promptly() {
        let stage: Stage<i32> = Stage::new();
        let completer = stage.clone();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            assert!(completer.complete(1));
        });

        let start = Instant::now();
        stage.get().unwrap();
        // Condition-variable handoff, not a polling sleep: the wait ends
        // well inside the test budget once the transition fires.
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_obtruded_stage_releases_waiters() {
        let stage: Stage<i32> = Stage::new();
        let waiter = {
            let stage = stage.clone();
            std::thread::spawn(move || stage.get())
        };

        std::thread::sleep(Duration::from_millis(10));
        stage.obtrude_value(11);
        assert_eq!(waiter.join().unwrap(), Ok(11));
    }

    #[test]
    fn test_stage_is_send_and_sync() {
        fn check<S: Send + Sync>() {}
        check::<Stage<Arc<i32>>>();
        check::<Stage<String>>();
    }
}
