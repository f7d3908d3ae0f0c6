//! The `Stage` state machine: transitions, listeners, obtrusion.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::StageError;
use crate::executor::{default_executor, SharedExecutor};
use crate::timer::Timer;

/// The terminal outcome of a stage.
///
/// Cancellation is its own outcome, not an error subtype: a cancelled
/// stage answers `true` to [`is_cancelled`] while a failed one does not,
/// even though both surface through error-style queries.
///
/// [`is_cancelled`]: Stage::is_cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The stage was fulfilled with a value.
    Value(T),
    /// The stage failed with an error.
    Error(StageError),
    /// The stage was cancelled before producing anything.
    Cancelled,
}

impl<T> Outcome<T> {
    /// Returns the fulfilled value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the failure, if any.
    ///
    /// A cancelled outcome carries no error; check [`is_cancelled`] for
    /// that case.
    ///
    /// [`is_cancelled`]: Outcome::is_cancelled
    #[must_use]
    pub fn error(&self) -> Option<&StageError> {
        match self {
            Outcome::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Returns true if the stage was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled)
    }
}

impl<T: Clone> Outcome<T> {
    /// Translates the outcome into the wait protocol's result.
    pub(crate) fn to_result(&self) -> crate::error::Result<T> {
        match self {
            Outcome::Value(v) => Ok(v.clone()),
            Outcome::Error(e) => Err(e.clone()),
            Outcome::Cancelled => Err(StageError::Cancelled),
        }
    }
}

/// A completion listener, invoked exactly once at terminality.
pub(crate) type Listener<T> = Box<dyn FnOnce(&Outcome<T>) + Send>;

enum State<T> {
    /// Not yet terminal; listeners wait here for the transition.
    Pending { listeners: Vec<Listener<T>> },
    /// Terminal. The outcome is shared so listeners and waiters can
    /// observe it after the lock is released.
    Done(Arc<Outcome<T>>),
}

struct Inner<T> {
    state: Mutex<State<T>>,
    /// Signalled on every transition (and obtrusion) to release waiters.
    done: Condvar,
    /// Advisory interrupt-on-cancel flag; see [`Stage::interrupt_requested`].
    interrupt: AtomicBool,
}

/// A single-assignment future: pending until completed, failed, or
/// cancelled, terminal forever after.
///
/// `Stage` is a cheap handle; clones share the same cell. It is created
/// pending (by [`new`], for manual completion) or by submitting a
/// producer to an executor ([`supply`], [`run`]), which returns the stage
/// immediately, before the producer has run.
///
/// # Example
///
/// ```rust
/// use stagekit::stage::Stage;
///
/// let stage: Stage<i32> = Stage::new();
/// assert!(!stage.is_done());
///
/// assert!(stage.complete(7));
/// assert!(stage.is_done());
/// assert_eq!(stage.get().unwrap(), 7);
///
/// // Completion is single-assignment: later attempts are no-ops
/// assert!(!stage.complete(8));
/// assert_eq!(stage.get().unwrap(), 7);
/// ```
///
/// [`new`]: Stage::new
/// [`supply`]: Stage::supply
/// [`run`]: Stage::run
pub struct Stage<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Stage<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for Stage<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Stage<T> {
    /// Creates a bare pending stage, to be completed manually.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::Pending {
                    listeners: Vec::new(),
                }),
                done: Condvar::new(),
                interrupt: AtomicBool::new(false),
            }),
        }
    }

    /// Creates a stage that is already fulfilled with `value`.
    #[must_use]
    pub fn completed(value: T) -> Self {
        let stage = Self::new();
        let _ = stage.transition(Outcome::Value(value));
        stage
    }

    /// Creates a stage that is already failed with `error`.
    #[must_use]
    pub fn failed(error: StageError) -> Self {
        let stage = Self::new();
        let _ = stage.transition(Outcome::Error(error));
        stage
    }

    // ========================================================================
    // State machine
    // ========================================================================

    /// Fulfills the stage with `value` if it is still pending.
    ///
    /// Returns `true` if this call performed the transition, `false` if
    /// the stage was already terminal (in which case nothing changes).
    /// Concurrent callers racing to complete see exactly one winner.
    pub fn complete(&self, value: T) -> bool {
        self.transition(Outcome::Value(value))
    }

    /// Fails the stage with `error` if it is still pending.
    ///
    /// Returns `true` if this call performed the transition.
    pub fn complete_exceptionally(&self, error: StageError) -> bool {
        self.transition(Outcome::Error(error))
    }

    /// Cancels the stage if it is still pending.
    ///
    /// Returns `true` if this call performed the transition. When
    /// `may_interrupt` is set the advisory interrupt flag is raised so a
    /// cooperative producer can notice (see [`interrupt_requested`]); a
    /// producer that keeps running regardless finds its eventual
    /// [`complete`] call returning `false`.
    ///
    /// [`interrupt_requested`]: Stage::interrupt_requested
    /// [`complete`]: Stage::complete
    pub fn cancel(&self, may_interrupt: bool) -> bool {
        self.transition_inner(Outcome::Cancelled, may_interrupt)
    }

    /// Returns true if the stage is terminal (fulfilled, failed, or
    /// cancelled).
    #[must_use]
    pub fn is_done(&self) -> bool {
        matches!(&*self.inner.state.lock(), State::Done(_))
    }

    /// Returns true if the stage is terminal and was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match &*self.inner.state.lock() {
            State::Done(outcome) => outcome.is_cancelled(),
            State::Pending { .. } => false,
        }
    }

    /// Returns true if the stage is terminal with a failure or was
    /// cancelled.
    ///
    /// Cancellation counts as exceptional here even though it is not an
    /// error variant; use [`is_cancelled`] to tell the two apart.
    ///
    /// [`is_cancelled`]: Stage::is_cancelled
    #[must_use]
    pub fn is_completed_exceptionally(&self) -> bool {
        match &*self.inner.state.lock() {
            State::Done(outcome) => !matches!(**outcome, Outcome::Value(_)),
            State::Pending { .. } => false,
        }
    }

    /// Returns true if the stage was cancelled with `may_interrupt` set.
    ///
    /// Purely advisory: threads cannot be interrupted, so a long-running
    /// producer must poll this flag itself if it wants to stop early.
    #[must_use]
    pub fn interrupt_requested(&self) -> bool {
        self.inner.interrupt.load(Ordering::Acquire)
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Registers `f` to run exactly once when the stage becomes terminal.
    ///
    /// If the stage is already terminal, `f` runs immediately on the
    /// calling thread; otherwise it runs on whichever thread performs the
    /// transition, strictly after the new state is visible and with no
    /// locks held.
    pub fn when_complete<F>(&self, f: F)
    where
        F: FnOnce(&Outcome<T>) + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        match &mut *state {
            State::Pending { listeners } => listeners.push(Box::new(f)),
            State::Done(outcome) => {
                let outcome = Arc::clone(outcome);
                drop(state);
                f(&outcome);
            }
        }
    }

    // ========================================================================
    // Forced completion / obtrusion
    // ========================================================================

    /// Unconditionally overwrites the stage's state to fulfilled, even if
    /// already terminal.
    ///
    /// This is the sanctioned escape hatch for error injection and
    /// testing, never used by ordinary combinator code: it deliberately
    /// violates the once-terminal-always-terminal invariant. Listeners
    /// that already fired on the prior terminal state are *not*
    /// re-invoked, so observers may see inconsistent history. If the
    /// stage was still pending, this behaves like a normal completion.
    ///
    /// Never fails.
    pub fn obtrude_value(&self, value: T) {
        self.obtrude(Outcome::Value(value));
    }

    /// Unconditionally overwrites the stage's state to failed, even if
    /// already terminal. See [`obtrude_value`] for the caveats.
    ///
    /// [`obtrude_value`]: Stage::obtrude_value
    pub fn obtrude_error(&self, error: StageError) {
        self.obtrude(Outcome::Error(error));
    }

    fn obtrude(&self, outcome: Outcome<T>) {
        let outcome = Arc::new(outcome);
        let mut state = self.inner.state.lock();
        let listeners = match &mut *state {
            State::Pending { listeners } => std::mem::take(listeners),
            State::Done(_) => Vec::new(),
        };
        *state = State::Done(Arc::clone(&outcome));
        drop(state);
        self.inner.done.notify_all();
        for listener in listeners {
            listener(&outcome);
        }
    }

    // ========================================================================
    // Internal transition machinery
    // ========================================================================

    /// Moves the stage out of pending. The single synchronization point:
    /// exactly one caller wins; everyone else gets `false`.
    pub(crate) fn transition(&self, outcome: Outcome<T>) -> bool {
        self.transition_inner(outcome, false)
    }

    fn transition_inner(&self, outcome: Outcome<T>, interrupt: bool) -> bool {
        let mut state = self.inner.state.lock();
        match &mut *state {
            State::Done(_) => false,
            State::Pending { listeners } => {
                // The flag must be up before the terminal state becomes
                // visible: a listener reacting to the cancellation reads
                // it, and a losing cancel must never raise it.
                if interrupt {
                    self.inner.interrupt.store(true, Ordering::Release);
                }
                let listeners = std::mem::take(listeners);
                let outcome = Arc::new(outcome);
                *state = State::Done(Arc::clone(&outcome));
                // Listeners run after the lock is dropped so an inline
                // continuation can never deadlock against this stage's
                // own waiters.
                drop(state);
                self.inner.done.notify_all();
                for listener in listeners {
                    listener(&outcome);
                }
                true
            }
        }
    }

    /// Shared-state accessor for the wait protocol and future adapter.
    pub(crate) fn terminal_outcome(&self) -> Option<Arc<Outcome<T>>> {
        match &*self.inner.state.lock() {
            State::Done(outcome) => Some(Arc::clone(outcome)),
            State::Pending { .. } => None,
        }
    }

    /// Blocks until terminal, waking on the stage's condition variable.
    pub(crate) fn await_outcome(&self) -> Arc<Outcome<T>> {
        let mut state = self.inner.state.lock();
        loop {
            match &*state {
                State::Done(outcome) => return Arc::clone(outcome),
                State::Pending { .. } => self.inner.done.wait(&mut state),
            }
        }
    }

    /// Bounded variant of [`await_outcome`]; `None` on deadline expiry.
    ///
    /// [`await_outcome`]: Stage::await_outcome
    pub(crate) fn await_outcome_until(
        &self,
        deadline: std::time::Instant,
    ) -> Option<Arc<Outcome<T>>> {
        let mut state = self.inner.state.lock();
        loop {
            if let State::Done(outcome) = &*state {
                return Some(Arc::clone(outcome));
            }
            if self.inner.done.wait_until(&mut state, deadline).timed_out() {
                // Re-check: the transition may have raced the timeout.
                return match &*state {
                    State::Done(outcome) => Some(Arc::clone(outcome)),
                    State::Pending { .. } => None,
                };
            }
        }
    }
}

impl<T: Send + Sync + 'static> Stage<T> {
    // ========================================================================
    // Producer submission
    // ========================================================================

    /// Submits `producer` to the process-wide default executor and
    /// returns the stage immediately.
    ///
    /// The producer's return value fulfills the stage; a panic inside the
    /// producer fails it with [`StageError::Producer`].
    ///
    /// # Example
    ///
    /// ```rust
    /// use stagekit::stage::Stage;
    ///
    /// let stage = Stage::supply(|| 2 + 2);
    /// assert_eq!(stage.get().unwrap(), 4);
    /// ```
    pub fn supply<F>(producer: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        Self::supply_on(&default_executor(), producer)
    }

    /// Like [`supply`], but runs the producer on the given executor.
    ///
    /// [`supply`]: Stage::supply
    pub fn supply_on<F>(executor: &SharedExecutor, producer: F) -> Self
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let stage = Self::new();
        let cell = stage.clone();
        executor.execute(Box::new(move || {
            match catch_unwind(AssertUnwindSafe(producer)) {
                Ok(value) => {
                    // A no-op if the stage was cancelled or force-completed
                    // while the producer ran.
                    let _ = cell.complete(value);
                }
                Err(payload) => {
                    let _ = cell.complete_exceptionally(StageError::producer(panic_message(
                        payload.as_ref(),
                    )));
                }
            }
        }));
        stage
    }

    /// Schedules a timer that fulfills the stage with `value` if it is
    /// still pending when `delay` elapses.
    ///
    /// Cooperative, not obtrusive: a no-op if the stage turns terminal
    /// first.
    ///
    /// # Example
    ///
    /// ```rust
    /// use stagekit::stage::Stage;
    /// use std::time::Duration;
    ///
    /// let stage: Stage<&str> = Stage::new();
    /// stage.complete_on_timeout("fallback", Duration::from_millis(5));
    /// assert_eq!(stage.get().unwrap(), "fallback");
    /// ```
    pub fn complete_on_timeout(&self, value: T, delay: Duration) {
        let cell = self.clone();
        Timer::global().schedule(
            delay,
            Box::new(move || {
                let _ = cell.complete(value);
            }),
        );
    }
}

impl Stage<()> {
    /// Submits a value-less `producer` to the default executor; the
    /// resulting stage carries a unit payload, fulfilled once the
    /// producer returns.
    pub fn run<F>(producer: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::run_on(&default_executor(), producer)
    }

    /// Like [`run`], but on the given executor.
    ///
    /// [`run`]: Stage::run
    pub fn run_on<F>(executor: &SharedExecutor, producer: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self::supply_on(executor, move || {
            producer();
        })
    }
}

impl<T> std::fmt::Debug for Stage<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.inner.state.lock() {
            State::Pending { listeners } => format!("Pending({} listeners)", listeners.len()),
            State::Done(outcome) => match &**outcome {
                Outcome::Value(_) => "Fulfilled".to_string(),
                Outcome::Error(e) => format!("Failed({e})"),
                Outcome::Cancelled => "Cancelled".to_string(),
            },
        };
        f.debug_struct("Stage").field("state", &state).finish()
    }
}

/// Renders a panic payload as a readable message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panicked with non-string payload".to_string()
    }
}
