//! The combinator algebra: building stages from stages.
//!
//! Each combinator registers a completion listener on its input(s) and
//! returns the downstream stage immediately. The plain variants run their
//! body inline on whichever thread delivers the upstream completion —
//! always post-commit with no stage locks held, so an inline body can
//! never deadlock against the upstream's waiters. The `_on` variants run
//! the body on a given executor instead.
//!
//! Failure propagation is transparent: a failed or cancelled upstream
//! completes the downstream the same way without invoking the body
//! (except [`handle`], which always runs, and [`exceptionally`], which
//! runs exactly on failure). A panic inside a body fails the downstream
//! with [`StageError::Composition`].
//!
//! [`handle`]: Stage::handle
//! [`exceptionally`]: Stage::exceptionally

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::StageError;
use crate::executor::SharedExecutor;
use crate::stage::core::panic_message;
use crate::stage::{Outcome, Stage};

/// Runs `body` inline or on the executor, per the combinator variant.
fn dispatch<F>(executor: Option<SharedExecutor>, body: F)
where
    F: FnOnce() + Send + 'static,
{
    match executor {
        Some(executor) => executor.execute(Box::new(body)),
        None => body(),
    }
}

/// Completes `downstream` from a combinator body, converting a panic into
/// a composition failure.
fn complete_from_body<U, F>(downstream: &Stage<U>, body: F)
where
    F: FnOnce() -> U,
{
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => {
            let _ = downstream.complete(value);
        }
        Err(payload) => {
            let _ = downstream
                .complete_exceptionally(StageError::composition(panic_message(payload.as_ref())));
        }
    }
}

/// Carries a non-value upstream outcome into `downstream` unchanged.
fn propagate<T, U>(downstream: &Stage<U>, outcome: &Outcome<T>) {
    match outcome {
        Outcome::Value(_) => {}
        Outcome::Error(error) => {
            let _ = downstream.complete_exceptionally(error.clone());
        }
        Outcome::Cancelled => {
            let _ = downstream.transition(Outcome::Cancelled);
        }
    }
}

/// Makes `downstream` adopt `outcome` wholesale (the compose alias step).
fn adopt<U: Clone>(downstream: &Stage<U>, outcome: &Outcome<U>) {
    match outcome {
        Outcome::Value(value) => {
            let _ = downstream.complete(value.clone());
        }
        other => propagate(downstream, other),
    }
}

/// Rendezvous state for [`Stage::combine`]: the body runs once both
/// values are in.
struct Both<T, U, F> {
    left: Option<T>,
    right: Option<U>,
    body: Option<F>,
}

impl<T, U, F> Both<T, U, F> {
    fn take_ready(&mut self) -> Option<(T, U, F)> {
        if self.left.is_some() && self.right.is_some() && self.body.is_some() {
            Some((
                self.left.take().expect("checked left"),
                self.right.take().expect("checked right"),
                self.body.take().expect("checked body"),
            ))
        } else {
            None
        }
    }
}

impl<T> Stage<T> {
    // ========================================================================
    // map / accept / run_after
    // ========================================================================

    /// Builds a stage holding `f` applied to this stage's value.
    ///
    /// On upstream failure or cancellation the downstream completes the
    /// same way and `f` is never invoked.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stagekit::stage::Stage;
    ///
    /// let doubled = Stage::completed(21).map(|n| n * 2);
    /// assert_eq!(doubled.get().unwrap(), 42);
    /// ```
    pub fn map<U, F>(&self, f: F) -> Stage<U>
    where
        T: Clone + Send + 'static,
        U: Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_impl(None, f)
    }

    /// Like [`map`], but runs `f` on `executor` instead of the thread
    /// that delivered the completion.
    ///
    /// [`map`]: Stage::map
    pub fn map_on<U, F>(&self, executor: &SharedExecutor, f: F) -> Stage<U>
    where
        T: Clone + Send + 'static,
        U: Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        self.map_impl(Some(Arc::clone(executor)), f)
    }

    fn map_impl<U, F>(&self, executor: Option<SharedExecutor>, f: F) -> Stage<U>
    where
        T: Clone + Send + 'static,
        U: Send + Sync + 'static,
        F: FnOnce(T) -> U + Send + 'static,
    {
        let downstream = Stage::new();
        let cell = downstream.clone();
        self.when_complete(move |outcome| match outcome {
            Outcome::Value(value) => {
                let value = value.clone();
                dispatch(executor, move || {
                    complete_from_body(&cell, move || f(value));
                });
            }
            other => propagate(&cell, other),
        });
        downstream
    }

    /// Consumes this stage's value with `f`; the downstream stage carries
    /// a unit payload, fulfilled once `f` returns.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stagekit::stage::Stage;
    /// use std::sync::mpsc;
    ///
    /// let (tx, rx) = mpsc::channel();
    /// let done = Stage::completed(5).accept(move |n| tx.send(n).unwrap());
    ///
    /// done.get().unwrap();
    /// assert_eq!(rx.recv().unwrap(), 5);
    /// ```
    pub fn accept<F>(&self, f: F) -> Stage<()>
    where
        T: Clone + Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        self.map_impl(None, move |value| {
            f(value);
        })
    }

    /// Like [`accept`], but runs `f` on `executor`.
    ///
    /// [`accept`]: Stage::accept
    pub fn accept_on<F>(&self, executor: &SharedExecutor, f: F) -> Stage<()>
    where
        T: Clone + Send + 'static,
        F: FnOnce(T) + Send + 'static,
    {
        self.map_impl(Some(Arc::clone(executor)), move |value| {
            f(value);
        })
    }

    /// Runs `f`, which ignores this stage's value entirely, once this
    /// stage completes normally. Failure and cancellation propagate
    /// without running `f`.
    pub fn run_after<F>(&self, f: F) -> Stage<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_after_impl(None, f)
    }

    /// Like [`run_after`], but runs `f` on `executor`.
    ///
    /// [`run_after`]: Stage::run_after
    pub fn run_after_on<F>(&self, executor: &SharedExecutor, f: F) -> Stage<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.run_after_impl(Some(Arc::clone(executor)), f)
    }

    fn run_after_impl<F>(&self, executor: Option<SharedExecutor>, f: F) -> Stage<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let downstream = Stage::new();
        let cell = downstream.clone();
        self.when_complete(move |outcome| match outcome {
            Outcome::Value(_) => dispatch(executor, move || complete_from_body(&cell, f)),
            other => propagate(&cell, other),
        });
        downstream
    }

    // ========================================================================
    // combine / compose
    // ========================================================================

    /// Waits for both this stage and `other`, then applies `f` to the two
    /// values.
    ///
    /// If either input fails or is cancelled, the downstream completes
    /// that way instead; when both fail concurrently, whichever failure
    /// commits first wins — deliberately a race with no tie-break.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stagekit::stage::Stage;
    ///
    /// let count = Stage::completed(5);
    /// let glyph = Stage::completed("x".to_string());
    ///
    /// let merged = count.combine(&glyph, |n, s| s.repeat(n));
    /// assert_eq!(merged.get().unwrap(), "xxxxx");
    /// ```
    pub fn combine<U, V, F>(&self, other: &Stage<U>, f: F) -> Stage<V>
    where
        T: Clone + Send + 'static,
        U: Clone + Send + 'static,
        V: Send + Sync + 'static,
        F: FnOnce(T, U) -> V + Send + 'static,
    {
        self.combine_impl(other, None, f)
    }

    /// Like [`combine`], but runs `f` on `executor`.
    ///
    /// [`combine`]: Stage::combine
    pub fn combine_on<U, V, F>(&self, other: &Stage<U>, executor: &SharedExecutor, f: F) -> Stage<V>
    where
        T: Clone + Send + 'static,
        U: Clone + Send + 'static,
        V: Send + Sync + 'static,
        F: FnOnce(T, U) -> V + Send + 'static,
    {
        self.combine_impl(other, Some(Arc::clone(executor)), f)
    }

    fn combine_impl<U, V, F>(
        &self,
        other: &Stage<U>,
        executor: Option<SharedExecutor>,
        f: F,
    ) -> Stage<V>
    where
        T: Clone + Send + 'static,
        U: Clone + Send + 'static,
        V: Send + Sync + 'static,
        F: FnOnce(T, U) -> V + Send + 'static,
    {
        let downstream = Stage::new();
        let both = Arc::new(Mutex::new(Both {
            left: None,
            right: None,
            body: Some(f),
        }));

        let cell = downstream.clone();
        let slots = Arc::clone(&both);
        let exec = executor.clone();
        self.when_complete(move |outcome| match outcome {
            Outcome::Value(value) => {
                let ready = {
                    let mut slots = slots.lock();
                    slots.left = Some(value.clone());
                    slots.take_ready()
                };
                if let Some((left, right, body)) = ready {
                    dispatch(exec, move || {
                        complete_from_body(&cell, move || body(left, right));
                    });
                }
            }
            other => propagate(&cell, other),
        });

        let cell = downstream.clone();
        let slots = both;
        other.when_complete(move |outcome| match outcome {
            Outcome::Value(value) => {
                let ready = {
                    let mut slots = slots.lock();
                    slots.right = Some(value.clone());
                    slots.take_ready()
                };
                if let Some((left, right, body)) = ready {
                    dispatch(executor, move || {
                        complete_from_body(&cell, move || body(left, right));
                    });
                }
            }
            other => propagate(&cell, other),
        });

        downstream
    }

    /// Sequences dependent asynchronous work: on fulfillment, `f` builds
    /// an inner stage whose terminal state the downstream adopts.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stagekit::stage::Stage;
    ///
    /// let total = Stage::completed(20).compose(|n| Stage::supply(move || n + 22));
    /// assert_eq!(total.get().unwrap(), 42);
    /// ```
    pub fn compose<U, F>(&self, f: F) -> Stage<U>
    where
        T: Clone + Send + 'static,
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Stage<U> + Send + 'static,
    {
        self.compose_impl(None, f)
    }

    /// Like [`compose`], but runs `f` on `executor`.
    ///
    /// [`compose`]: Stage::compose
    pub fn compose_on<U, F>(&self, executor: &SharedExecutor, f: F) -> Stage<U>
    where
        T: Clone + Send + 'static,
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Stage<U> + Send + 'static,
    {
        self.compose_impl(Some(Arc::clone(executor)), f)
    }

    fn compose_impl<U, F>(&self, executor: Option<SharedExecutor>, f: F) -> Stage<U>
    where
        T: Clone + Send + 'static,
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> Stage<U> + Send + 'static,
    {
        let downstream = Stage::new();
        let cell = downstream.clone();
        self.when_complete(move |outcome| match outcome {
            Outcome::Value(value) => {
                let value = value.clone();
                dispatch(executor, move || {
                    match catch_unwind(AssertUnwindSafe(move || f(value))) {
                        Ok(inner) => {
                            let alias = cell.clone();
                            inner.when_complete(move |inner_outcome| {
                                adopt(&alias, inner_outcome);
                            });
                        }
                        Err(payload) => {
                            let _ = cell.complete_exceptionally(StageError::composition(
                                panic_message(payload.as_ref()),
                            ));
                        }
                    }
                });
            }
            other => propagate(&cell, other),
        });
        downstream
    }

    // ========================================================================
    // handle / exceptionally
    // ========================================================================

    /// Runs `f` unconditionally once this stage is terminal, receiving
    /// the value or the failure (cancellation arrives as
    /// [`StageError::Cancelled`]).
    ///
    /// The only combinator guaranteed to run regardless of upstream
    /// outcome, and the idiomatic place to recover from failure.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stagekit::error::StageError;
    /// use stagekit::stage::Stage;
    ///
    /// let stage: Stage<&str> = Stage::failed(StageError::producer("boom"));
    /// let recovered = stage.handle(|value, error| match error {
    ///     Some(_) => "recovered",
    ///     None => value.unwrap(),
    /// });
    /// assert_eq!(recovered.get().unwrap(), "recovered");
    /// ```
    pub fn handle<U, F>(&self, f: F) -> Stage<U>
    where
        T: Clone + Send + 'static,
        U: Send + Sync + 'static,
        F: FnOnce(Option<T>, Option<StageError>) -> U + Send + 'static,
    {
        self.handle_impl(None, f)
    }

    /// Like [`handle`], but runs `f` on `executor`.
    ///
    /// [`handle`]: Stage::handle
    pub fn handle_on<U, F>(&self, executor: &SharedExecutor, f: F) -> Stage<U>
    where
        T: Clone + Send + 'static,
        U: Send + Sync + 'static,
        F: FnOnce(Option<T>, Option<StageError>) -> U + Send + 'static,
    {
        self.handle_impl(Some(Arc::clone(executor)), f)
    }

    fn handle_impl<U, F>(&self, executor: Option<SharedExecutor>, f: F) -> Stage<U>
    where
        T: Clone + Send + 'static,
        U: Send + Sync + 'static,
        F: FnOnce(Option<T>, Option<StageError>) -> U + Send + 'static,
    {
        let downstream = Stage::new();
        let cell = downstream.clone();
        self.when_complete(move |outcome| {
            let (value, error) = match outcome {
                Outcome::Value(value) => (Some(value.clone()), None),
                Outcome::Error(error) => (None, Some(error.clone())),
                Outcome::Cancelled => (None, Some(StageError::Cancelled)),
            };
            dispatch(executor, move || {
                complete_from_body(&cell, move || f(value, error));
            });
        });
        downstream
    }

    /// Recovers from failure: `f` maps the error (or cancellation) to a
    /// replacement value; on upstream success the value passes through
    /// unchanged and `f` never runs.
    pub fn exceptionally<F>(&self, f: F) -> Stage<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(StageError) -> T + Send + 'static,
    {
        self.exceptionally_impl(None, f)
    }

    /// Like [`exceptionally`], but runs `f` on `executor`.
    ///
    /// [`exceptionally`]: Stage::exceptionally
    pub fn exceptionally_on<F>(&self, executor: &SharedExecutor, f: F) -> Stage<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(StageError) -> T + Send + 'static,
    {
        self.exceptionally_impl(Some(Arc::clone(executor)), f)
    }

    fn exceptionally_impl<F>(&self, executor: Option<SharedExecutor>, f: F) -> Stage<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce(StageError) -> T + Send + 'static,
    {
        let downstream = Stage::new();
        let cell = downstream.clone();
        self.when_complete(move |outcome| {
            let error = match outcome {
                Outcome::Value(value) => {
                    let _ = cell.complete(value.clone());
                    return;
                }
                Outcome::Error(error) => error.clone(),
                Outcome::Cancelled => StageError::Cancelled,
            };
            dispatch(executor, move || {
                complete_from_body(&cell, move || f(error));
            });
        });
        downstream
    }
}
