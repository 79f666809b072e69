#![forbid(unsafe_code)]

//! Trailing-edge debouncing on top of a [`Scheduler`].
//!
//! [`Debouncer`] is the primitive: each [`trigger`](Debouncer::trigger)
//! cancels the pending timer and arms a new one, so only the last trigger in
//! a burst runs. [`debounce`] applies it to a [`Source`], emitting the most
//! recent value once the source has been quiet for the window.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use web_time::Duration;

use crate::broadcast::{Broadcast, Notifier, Source};
use crate::registry::Subscription;
use crate::scheduler::{Scheduler, TimerId};

/// Restartable single-shot timer.
///
/// Cloning yields another handle to the same pending slot.
#[derive(Clone)]
pub struct Debouncer {
    scheduler: Rc<dyn Scheduler>,
    window: Duration,
    pending: Rc<Cell<Option<TimerId>>>,
}

impl Debouncer {
    #[must_use]
    pub fn new(scheduler: Rc<dyn Scheduler>, window: Duration) -> Self {
        Self {
            scheduler,
            window,
            pending: Rc::new(Cell::new(None)),
        }
    }

    /// Arm the timer for `task`, cancelling any task armed earlier.
    pub fn trigger(&self, task: impl FnOnce() + 'static) {
        self.cancel();
        let pending = Rc::clone(&self.pending);
        let id = self.scheduler.schedule(
            self.window,
            Box::new(move || {
                pending.set(None);
                task();
            }),
        );
        self.pending.set(Some(id));
    }

    /// Disarm the pending task, if any.
    pub fn cancel(&self) {
        if let Some(id) = self.pending.take() {
            self.scheduler.cancel(id);
        }
    }

    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.pending.get().is_some()
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}

impl fmt::Debug for Debouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debouncer")
            .field("window", &self.window)
            .field("pending", &self.is_pending())
            .finish()
    }
}

/// A source re-emitted on the trailing edge of each quiet window.
///
/// Dropping it detaches from upstream and disarms the pending emission.
pub struct Debounced<T: 'static> {
    output: Broadcast<T>,
    debouncer: Debouncer,
    _upstream: Subscription,
}

/// Debounce `source` by `window`, timed by `scheduler`.
pub fn debounce<T: Clone + 'static>(
    source: &impl Source<T>,
    window: Duration,
    scheduler: Rc<dyn Scheduler>,
) -> Debounced<T> {
    let output = Broadcast::new();
    let debouncer = Debouncer::new(scheduler, window);
    let upstream = {
        let output = output.clone();
        let debouncer = debouncer.clone();
        source.observe(Rc::new(move |value: &T| {
            let output = output.clone();
            let value = value.clone();
            debouncer.trigger(move || output.emit(&value));
        }))
    };
    Debounced {
        output,
        debouncer,
        _upstream: upstream,
    }
}

impl<T: 'static> Debounced<T> {
    pub fn subscribe(&self, observer: impl Fn(&T) + 'static) -> Subscription {
        self.output.subscribe(observer)
    }

    /// Whether an emission is armed and waiting for the window to elapse.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.debouncer.is_pending()
    }
}

impl<T: 'static> Drop for Debounced<T> {
    fn drop(&mut self) {
        self.debouncer.cancel();
    }
}

impl<T: 'static> Source<T> for Debounced<T> {
    fn observe(&self, observer: Rc<dyn Fn(&T)>) -> Subscription {
        self.output.observe(observer)
    }
}

impl<T: 'static> Notifier for Debounced<T> {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.output.notify_on_change(on_change)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::{CellMode, ValueCell};
    use crate::scheduler::ManualScheduler;
    use std::cell::RefCell;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn burst_collapses_to_last_value() {
        let sched = ManualScheduler::new();
        let cell = ValueCell::with_mode(0, CellMode::DISTINCT_UNTIL_CHANGED);
        let quiet = debounce(&cell, ms(100), Rc::new(sched.clone()));

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let _sub = quiet.subscribe(move |v| seen_clone.borrow_mut().push(*v));

        cell.set(1);
        sched.advance_to(ms(50));
        cell.set(2);
        sched.advance_to(ms(120));
        cell.set(3);
        assert!(seen.borrow().is_empty());
        assert!(quiet.is_pending());

        sched.advance_to(ms(219));
        assert!(seen.borrow().is_empty());
        sched.advance_to(ms(220));
        assert_eq!(*seen.borrow(), vec![3]);
        assert!(!quiet.is_pending());
    }

    #[test]
    fn separated_triggers_each_fire() {
        let sched = ManualScheduler::new();
        let debouncer = Debouncer::new(Rc::new(sched.clone()), ms(10));
        let log = Rc::new(RefCell::new(Vec::new()));

        let log_a = Rc::clone(&log);
        debouncer.trigger(move || log_a.borrow_mut().push("a"));
        sched.advance_by(ms(10));
        let log_b = Rc::clone(&log);
        debouncer.trigger(move || log_b.borrow_mut().push("b"));
        sched.advance_by(ms(10));

        assert_eq!(*log.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn cancel_disarms() {
        let sched = ManualScheduler::new();
        let debouncer = Debouncer::new(Rc::new(sched.clone()), ms(10));
        let fired = Rc::new(Cell::new(false));
        let fired_clone = Rc::clone(&fired);
        debouncer.trigger(move || fired_clone.set(true));
        debouncer.cancel();
        sched.advance_by(ms(50));
        assert!(!fired.get());
        assert_eq!(sched.pending(), 0);
    }

    #[test]
    fn dropping_debounced_disarms_pending_emission() {
        let sched = ManualScheduler::new();
        let cell = ValueCell::with_mode(0, CellMode::DISTINCT_UNTIL_CHANGED);
        let quiet = debounce(&cell, ms(10), Rc::new(sched.clone()));
        cell.set(1);
        assert_eq!(sched.pending(), 1);
        drop(quiet);
        assert_eq!(sched.pending(), 0);
        assert_eq!(cell.subscriber_count(), 0);
    }
}
