#![forbid(unsafe_code)]

//! Injectable time sources for debounced work.
//!
//! Debounce operators and debounced validators never read the clock directly;
//! they arm timers through a [`Scheduler`]. Two implementations are provided:
//!
//! - [`ManualScheduler`]: virtual time that only moves when the owner calls
//!   [`advance_to`](ManualScheduler::advance_to) or
//!   [`advance_by`](ManualScheduler::advance_by). All handles sharing the same
//!   scheduler see the same time, which makes timing tests deterministic.
//! - [`WallClockScheduler`]: real time via `web_time::Instant`, drained by the
//!   application's event loop calling [`run_due`](WallClockScheduler::run_due).
//!
//! # Invariants
//!
//! 1. Timers fire in due-time order; timers due at the same instant fire in
//!    the order they were scheduled.
//! 2. A cancelled timer never fires. Cancelling a fired or unknown timer is a
//!    no-op that returns `false`.
//! 3. Timer callbacks run with no scheduler borrow held, so they may schedule
//!    or cancel other timers.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use web_time::{Duration, Instant};

/// Identifier of one armed timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// A time source able to run a callback after a delay.
pub trait Scheduler {
    /// Time elapsed since the scheduler's epoch.
    fn now(&self) -> Duration;

    /// Run `task` once `delay` has elapsed from [`now`](Scheduler::now).
    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TimerId;

    /// Disarm a timer. Returns `true` if it was still pending.
    fn cancel(&self, id: TimerId) -> bool;
}

/// Ordered set of pending timers, shared by both scheduler flavours.
#[derive(Default)]
struct TimerQueue {
    next_seq: Cell<u64>,
    due: RefCell<BTreeMap<(Duration, u64), Box<dyn FnOnce()>>>,
    index: RefCell<HashMap<TimerId, Duration>>,
}

impl TimerQueue {
    fn push(&self, at: Duration, task: Box<dyn FnOnce()>) -> TimerId {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        let id = TimerId(seq);
        self.due.borrow_mut().insert((at, seq), task);
        self.index.borrow_mut().insert(id, at);
        id
    }

    fn cancel(&self, id: TimerId) -> bool {
        let Some(at) = self.index.borrow_mut().remove(&id) else {
            return false;
        };
        let task = self.due.borrow_mut().remove(&(at, id.0));
        task.is_some()
    }

    /// Remove and return the earliest timer due at or before `limit`.
    fn pop_due(&self, limit: Duration) -> Option<(Duration, Box<dyn FnOnce()>)> {
        let mut due = self.due.borrow_mut();
        let (&(at, seq), _) = due.first_key_value()?;
        if at > limit {
            return None;
        }
        let task = due.remove(&(at, seq))?;
        self.index.borrow_mut().remove(&TimerId(seq));
        Some((at, task))
    }

    fn next_due(&self) -> Option<Duration> {
        self.due.borrow().first_key_value().map(|(&(at, _), _)| at)
    }

    fn len(&self) -> usize {
        self.due.borrow().len()
    }
}

fn fire(at: Duration, task: Box<dyn FnOnce()>) {
    tracing::trace!(
        message = "scheduler.fire",
        due_us = at.as_micros().min(u64::MAX as u128) as u64
    );
    task();
}

// ---------------------------------------------------------------------------
// ManualScheduler
// ---------------------------------------------------------------------------

#[derive(Default)]
struct ManualInner {
    now: Cell<Duration>,
    queue: TimerQueue,
}

/// Virtual-time scheduler for deterministic tests and simulations.
///
/// Cloning yields another handle to the same clock and timer queue.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Rc<ManualInner>,
}

impl ManualScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Move virtual time forward to `target`, firing every timer that falls
    /// due on the way. Each timer observes [`now`](Scheduler::now) equal to
    /// its own due time. Moving backwards is ignored.
    pub fn advance_to(&self, target: Duration) {
        if target < self.inner.now.get() {
            return;
        }
        while let Some((at, task)) = self.inner.queue.pop_due(target) {
            if at > self.inner.now.get() {
                self.inner.now.set(at);
            }
            fire(at, task);
        }
        self.inner.now.set(target);
    }

    /// Move virtual time forward by `delta`.
    pub fn advance_by(&self, delta: Duration) {
        self.advance_to(self.inner.now.get() + delta);
    }

    /// Number of armed timers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Duration {
        self.inner.now.get()
    }

    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TimerId {
        self.inner.queue.push(self.inner.now.get() + delay, task)
    }

    fn cancel(&self, id: TimerId) -> bool {
        self.inner.queue.cancel(id)
    }
}

impl fmt::Debug for ManualScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualScheduler")
            .field("now", &self.inner.now.get())
            .field("pending", &self.inner.queue.len())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// WallClockScheduler
// ---------------------------------------------------------------------------

struct WallClockInner {
    epoch: Instant,
    queue: TimerQueue,
}

/// Real-time scheduler polled from an event loop.
///
/// Timers never fire on their own: the owning loop calls
/// [`run_due`](Self::run_due) on every tick, and may use
/// [`time_until_next`](Self::time_until_next) to bound its sleep.
#[derive(Clone)]
pub struct WallClockScheduler {
    inner: Rc<WallClockInner>,
}

impl Default for WallClockScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl WallClockScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(WallClockInner {
                epoch: Instant::now(),
                queue: TimerQueue::default(),
            }),
        }
    }

    /// Fire every timer that is due now. Returns how many fired.
    pub fn run_due(&self) -> usize {
        let mut fired = 0;
        while let Some((at, task)) = self.inner.queue.pop_due(self.now()) {
            fire(at, task);
            fired += 1;
        }
        fired
    }

    /// Time until the earliest armed timer is due, `None` when idle.
    #[must_use]
    pub fn time_until_next(&self) -> Option<Duration> {
        self.inner
            .queue
            .next_due()
            .map(|at| at.saturating_sub(self.now()))
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.len()
    }
}

impl Scheduler for WallClockScheduler {
    fn now(&self) -> Duration {
        self.inner.epoch.elapsed()
    }

    fn schedule(&self, delay: Duration, task: Box<dyn FnOnce()>) -> TimerId {
        self.inner.queue.push(self.now() + delay, task)
    }

    fn cancel(&self, id: TimerId) -> bool {
        self.inner.queue.cancel(id)
    }
}

impl fmt::Debug for WallClockScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WallClockScheduler")
            .field("pending", &self.inner.queue.len())
            .finish()
    }
}
