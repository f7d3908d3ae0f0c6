//! Adapter from `Stage` to `std::future::Future`.
//!
//! Stages are thread-blocking by nature; this adapter lets async code
//! await one instead. The waker lives in a shared slot and a single
//! completion listener wakes whatever waker is current at transition
//! time.

use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;
use pin_project::pin_project;

use crate::error::Result;
use crate::stage::Stage;

impl<T: Clone + Send + Sync + 'static> Stage<T> {
    /// Returns a future resolving to this stage's result.
    ///
    /// Cancellation surfaces as `Err(StageError::Cancelled)`, exactly as
    /// [`get`] reports it.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stagekit::stage::Stage;
    ///
    /// let stage = Stage::supply(|| 21).map(|n| n * 2);
    /// let value = futures::executor::block_on(stage.as_future()).unwrap();
    /// assert_eq!(value, 42);
    /// ```
    ///
    /// [`get`]: Stage::get
    #[must_use]
    pub fn as_future(&self) -> StageFuture<T> {
        StageFuture {
            stage: self.clone(),
            waker: Arc::new(Mutex::new(None)),
            registered: false,
        }
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for Stage<T> {
    type Output = Result<T>;
    type IntoFuture = StageFuture<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.as_future()
    }
}

/// A future view of a [`Stage`].
///
/// Created by [`Stage::as_future`] (or by awaiting the stage directly).
#[pin_project]
pub struct StageFuture<T> {
    stage: Stage<T>,
    /// Most recent waker; replaced on every poll, taken once at wake.
    waker: Arc<Mutex<Option<Waker>>>,
    registered: bool,
}

impl<T: Clone + Send + Sync + 'static> Future for StageFuture<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        // Publish the current waker before registering the listener so a
        // transition racing this poll still finds a waker to wake.
        *this.waker.lock() = Some(cx.waker().clone());

        if !*this.registered {
            *this.registered = true;
            let slot = Arc::clone(this.waker);
            this.stage.when_complete(move |_| {
                if let Some(waker) = slot.lock().take() {
                    waker.wake();
                }
            });
        }

        match this.stage.try_result() {
            Some(result) => Poll::Ready(result),
            None => Poll::Pending,
        }
    }
}

impl<T> std::fmt::Debug for StageFuture<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageFuture")
            .field("stage", &self.stage)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StageError;
    use std::time::Duration;

    #[test]
    fn test_ready_stage_resolves_immediately() {
        let stage = Stage::completed(5);
        assert_eq!(futures::executor::block_on(stage.as_future()), Ok(5));
    }

    #[test]
    fn test_failed_stage_resolves_to_error() {
        let stage: Stage<i32> = Stage::failed(StageError::producer("boom"));
        assert_eq!(
            futures::executor::block_on(stage.as_future()),
            Err(StageError::producer("boom"))
        );
    }

    #[test]
    fn test_cancelled_stage_resolves_to_cancelled() {
        let stage: Stage<i32> = Stage::new();
        assert!(stage.cancel(false));
        assert_eq!(
            futures::executor::block_on(stage.into_future()),
            Err(StageError::Cancelled)
        );
    }

    #[test]
    fn test_pending_stage_wakes_on_completion() {
        let stage: Stage<i32> = Stage::new();

        let completer = stage.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            assert!(completer.complete(9));
        });

        assert_eq!(futures::executor::block_on(stage.as_future()), Ok(9));
        handle.join().unwrap();
    }

    #[test]
    fn test_combinator_output_is_awaitable() {
        let stage = Stage::supply(|| 4).map(|n| n * n);
        assert_eq!(futures::executor::block_on(stage.into_future()), Ok(16));
    }
}
