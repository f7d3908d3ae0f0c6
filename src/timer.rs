//! Shared deadline scheduler backing [`complete_on_timeout`].
//!
//! One process-wide timer thread owns a min-heap of `(deadline, job)`
//! entries and sleeps on a condition variable until the earliest deadline,
//! waking early whenever a nearer deadline is scheduled. Like the default
//! executor, the timer's lifecycle is independent of any stage.
//!
//! [`complete_on_timeout`]: crate::stage::Stage::complete_on_timeout

use std::collections::BinaryHeap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::executor::Job;

/// A pending entry in the timer heap.
struct TimerEntry {
    /// When the job should fire.
    deadline: Instant,
    /// Tie-break so equal deadlines fire in schedule order.
    seq: u64,
    job: Option<Job>,
}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Eq for TimerEntry {}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse order for min-heap behavior (earliest deadline first)
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct TimerShared {
    heap: Mutex<TimerState>,
    /// Signalled when a new entry may have moved the earliest deadline.
    changed: Condvar,
}

struct TimerState {
    pending: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

/// The process-wide timer.
pub(crate) struct Timer {
    shared: Arc<TimerShared>,
}

impl Timer {
    /// Returns the shared timer, starting its thread on first use.
    pub(crate) fn global() -> &'static Timer {
        static GLOBAL: OnceLock<Timer> = OnceLock::new();

        GLOBAL.get_or_init(Timer::start)
    }

    /// Starts a timer thread over a fresh heap.
    fn start() -> Timer {
        let shared = Arc::new(TimerShared {
            heap: Mutex::new(TimerState {
                pending: BinaryHeap::new(),
                next_seq: 0,
            }),
            changed: Condvar::new(),
        });

        let thread_shared = Arc::clone(&shared);
        std::thread::Builder::new()
            .name("stagekit-timer".to_string())
            .spawn(move || timer_loop(&thread_shared))
            .expect("failed to spawn timer thread");

        Timer { shared }
    }

    /// Schedules `job` to run once `delay` has elapsed.
    ///
    /// A `delay` too large to represent as a deadline parks the entry at
    /// a stand-in deadline that never arrives within the process
    /// lifetime; scheduling never panics.
    pub(crate) fn schedule(&self, delay: Duration, job: Job) {
        let deadline = Instant::now().checked_add(delay).unwrap_or_else(far_future);
        let mut state = self.shared.heap.lock();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.pending.push(TimerEntry {
            deadline,
            seq,
            job: Some(job),
        });
        drop(state);
        self.shared.changed.notify_one();
    }

    #[cfg(test)]
    fn pending_count(&self) -> usize {
        self.shared.heap.lock().pending.len()
    }
}

/// A representable deadline far enough out that it never fires.
fn far_future() -> Instant {
    // 30 years in nanoseconds sits well inside Instant's range on every
    // supported platform.
    Instant::now() + Duration::from_secs(30 * 365 * 24 * 60 * 60)
}

fn timer_loop(shared: &TimerShared) {
    let mut state = shared.heap.lock();
    loop {
        let now = Instant::now();

        // Fire everything that is due, outside the lock.
        let mut due = Vec::new();
        while let Some(entry) = state.pending.peek() {
            if entry.deadline <= now {
                let mut entry = state.pending.pop().expect("peeked entry");
                if let Some(job) = entry.job.take() {
                    due.push(job);
                }
            } else {
                break;
            }
        }
        if !due.is_empty() {
            drop(state);
            for job in due {
                let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));
            }
            state = shared.heap.lock();
            continue;
        }

        match state.pending.peek().map(|entry| entry.deadline) {
            Some(deadline) => {
                let _ = shared.changed.wait_until(&mut state, deadline);
            }
            None => shared.changed.wait(&mut state),
        }
    }
}
