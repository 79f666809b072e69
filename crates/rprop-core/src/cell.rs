#![forbid(unsafe_code)]

//! Mutable value cells with change notification.
//!
//! # Design
//!
//! [`ValueCell<T>`] keeps its value, version counter and disposal flag in a
//! `RefCell` and its subscribers in a separate [`SubscriberList`]. A write
//! stores the value and bumps the version, releases every borrow, and only
//! then delivers a clone of the value. Subscribers may therefore read, write
//! or subscribe to the same cell re-entrantly; nested writes are delivered
//! depth-first.
//!
//! # Invariants
//!
//! 1. With [`CellMode::DISTINCT_UNTIL_CHANGED`], a write equal to the current
//!    value under the cell's equality is a no-op: no version bump, no
//!    notification.
//! 2. With [`CellMode::RAISE_LATEST_ON_SUBSCRIBE`], a new subscriber receives
//!    the current value synchronously before `subscribe` returns, even if the
//!    cell was never written.
//! 3. Version increments exactly once per delivered notification pass.
//! 4. After [`dispose`](ValueCell::dispose), writes and forced notifications
//!    are no-ops and subscribing returns an inert [`Subscription`].
//!
//! # Failure Modes
//!
//! - **Subscriber panics**: the cell's value and version are already updated
//!   when callbacks run. Remaining subscribers in the pass are still
//!   delivered, then the panic continues to the writer.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use bitflags::bitflags;

use crate::broadcast::{Notifier, Source};
use crate::registry::{SubscriberList, Subscription};

bitflags! {
    /// Delivery policy of a [`ValueCell`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CellMode: u8 {
        /// Suppress writes equal to the current value.
        const DISTINCT_UNTIL_CHANGED = 0b01;
        /// Deliver the current value to each new subscriber immediately.
        const RAISE_LATEST_ON_SUBSCRIBE = 0b10;
    }
}

impl CellMode {
    /// Neither distinct filtering nor replay on subscribe.
    pub const NONE: Self = Self::empty();
}

impl Default for CellMode {
    fn default() -> Self {
        Self::DISTINCT_UNTIL_CHANGED | Self::RAISE_LATEST_ON_SUBSCRIBE
    }
}

struct CellState<T> {
    value: T,
    version: u64,
    disposed: bool,
}

struct CellInner<T> {
    state: RefCell<CellState<T>>,
    equality: Box<dyn Fn(&T, &T) -> bool>,
    mode: CellMode,
    subscribers: Rc<SubscriberList<T>>,
}

/// A single mutable slot that broadcasts every accepted write.
///
/// Cloning a `ValueCell` creates a new handle to the **same** slot.
pub struct ValueCell<T> {
    inner: Rc<CellInner<T>>,
}

impl<T> Clone for ValueCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ValueCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("ValueCell")
            .field("value", &state.value)
            .field("version", &state.version)
            .field("mode", &self.inner.mode)
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> ValueCell<T> {
    /// Create a cell with the default mode (distinct + raise latest).
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_mode(value, CellMode::default())
    }

    /// Create a cell with an explicit delivery mode.
    #[must_use]
    pub fn with_mode(value: T, mode: CellMode) -> Self {
        Self::with_equality(value, mode, |a: &T, b: &T| a == b)
    }
}

impl<T: Clone + PartialEq + Default + 'static> Default for ValueCell<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Clone + 'static> ValueCell<T> {
    /// Create a cell that compares values with `equality` instead of
    /// `PartialEq`.
    #[must_use]
    pub fn with_equality(
        value: T,
        mode: CellMode,
        equality: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(CellInner {
                state: RefCell::new(CellState {
                    value,
                    version: 0,
                    disposed: false,
                }),
                equality: Box::new(equality),
                mode,
                subscribers: SubscriberList::new(),
            }),
        }
    }

    /// Clone of the current value.
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.state.borrow().value.clone()
    }

    /// Borrow the current value.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes to this same cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.state.borrow().value)
    }

    /// Store `value` and notify subscribers.
    ///
    /// Returns `false` when the write was suppressed, either because the cell
    /// is distinct and the value is unchanged, or because the cell is
    /// disposed.
    pub fn set(&self, value: T) -> bool {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed {
                return false;
            }
            if self.inner.mode.contains(CellMode::DISTINCT_UNTIL_CHANGED)
                && (self.inner.equality)(&state.value, &value)
            {
                return false;
            }
            state.value = value;
            state.version += 1;
        }
        self.deliver_current();
        true
    }

    /// Modify the value in place, then apply it as a [`set`](Self::set).
    pub fn update(&self, f: impl FnOnce(&mut T)) -> bool {
        let mut next = self.get();
        f(&mut next);
        self.set(next)
    }

    /// Re-deliver the current value to every subscriber, ignoring equality.
    pub fn force_notify(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.version += 1;
        }
        self.deliver_current();
    }

    fn deliver_current(&self) {
        let value = self.get();
        self.inner.subscribers.notify(&value);
    }

    /// Attach `observer`.
    ///
    /// With [`CellMode::RAISE_LATEST_ON_SUBSCRIBE`] the observer is called
    /// with the current value before this returns. On a disposed cell the
    /// observer is never called and the returned handle is inert.
    pub fn subscribe(&self, observer: impl Fn(&T) + 'static) -> Subscription {
        self.observe(Rc::new(observer))
    }

    /// Attach `observer` for subsequent changes only, regardless of mode.
    pub fn subscribe_changes(&self, observer: impl Fn(&T) + 'static) -> Subscription {
        self.inner.subscribers.subscribe(Rc::new(observer))
    }

    /// Detach every subscriber and make the cell inert. Idempotent.
    pub fn dispose(&self) {
        {
            let mut state = self.inner.state.borrow_mut();
            if state.disposed {
                return;
            }
            state.disposed = true;
        }
        let detached = self.inner.subscribers.close();
        tracing::debug!(message = "cell.dispose", subscribers = detached);
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.state.borrow().disposed
    }

    /// Number of notification passes delivered so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.state.borrow().version
    }

    #[must_use]
    pub fn mode(&self) -> CellMode {
        self.inner.mode
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }

    /// A read-only view of this cell.
    ///
    /// The view does not own the slot: disposing it silences the observers
    /// attached through it and leaves this cell writable.
    #[must_use]
    pub fn read_only(&self) -> ReadOnlyCell<T> {
        ReadOnlyCell {
            cell: self.clone(),
            link: Rc::new(ViewLink::new(false, Vec::new())),
        }
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakValueCell<T> {
        WeakValueCell {
            inner: Rc::downgrade(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Source<T> for ValueCell<T> {
    fn observe(&self, observer: Rc<dyn Fn(&T)>) -> Subscription {
        if self.is_disposed() {
            return Subscription::empty();
        }
        let subscription = self.inner.subscribers.subscribe(Rc::clone(&observer));
        if self.inner.mode.contains(CellMode::RAISE_LATEST_ON_SUBSCRIBE) {
            let current = self.get();
            observer(&current);
        }
        subscription
    }
}

impl<T: Clone + 'static> Notifier for ValueCell<T> {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.subscribe_changes(move |_| on_change())
    }
}

/// Non-owning handle to a [`ValueCell`].
pub struct WeakValueCell<T> {
    inner: Weak<CellInner<T>>,
}

impl<T> Clone for WeakValueCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Weak::clone(&self.inner),
        }
    }
}

impl<T> WeakValueCell<T> {
    #[must_use]
    pub fn upgrade(&self) -> Option<ValueCell<T>> {
        self.inner.upgrade().map(|inner| ValueCell { inner })
    }
}

/// What a [`ReadOnlyCell`] handle owns, shared by its clones.
struct ViewLink {
    /// Set for mirrors built by `from_source`, which own their cell.
    owns_cell: bool,
    detached: Rc<Cell<bool>>,
    upstream: RefCell<Vec<Subscription>>,
}

impl ViewLink {
    fn new(owns_cell: bool, upstream: Vec<Subscription>) -> Self {
        Self {
            owns_cell,
            detached: Rc::new(Cell::new(false)),
            upstream: RefCell::new(upstream),
        }
    }
}

/// A cell that can be observed but not written through this handle.
///
/// Produced by [`ValueCell::read_only`], a view onto the writer's slot, or
/// by projecting another [`Source`] with [`ReadOnlyCell::from_source`], which
/// owns a private mirror. In the latter case the upstream subscription lives
/// as long as any clone of the handle.
pub struct ReadOnlyCell<T> {
    cell: ValueCell<T>,
    link: Rc<ViewLink>,
}

impl<T> Clone for ReadOnlyCell<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            link: Rc::clone(&self.link),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ReadOnlyCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadOnlyCell")
            .field("cell", &self.cell)
            .field("owns_cell", &self.link.owns_cell)
            .field("detached", &self.link.detached.get())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> ReadOnlyCell<T> {
    /// Mirror `source` into a new cell that starts at `initial`.
    ///
    /// If `source` replays its current value on subscribe, the cell holds
    /// that value as soon as this returns.
    pub fn from_source(source: &impl Source<T>, initial: T, mode: CellMode) -> Self {
        let cell = ValueCell::with_mode(initial, mode);
        let weak = cell.downgrade();
        let upstream = source.observe(Rc::new(move |value: &T| {
            if let Some(cell) = weak.upgrade() {
                cell.set(value.clone());
            }
        }));
        Self {
            cell,
            link: Rc::new(ViewLink::new(true, vec![upstream])),
        }
    }
}

impl<T: Clone + 'static> ReadOnlyCell<T> {
    #[must_use]
    pub fn get(&self) -> T {
        self.cell.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.cell.with(f)
    }

    pub fn subscribe(&self, observer: impl Fn(&T) + 'static) -> Subscription {
        self.observe(Rc::new(observer))
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.cell.version()
    }

    /// Detach from upstream and silence every observer attached through
    /// this handle. A mirror also disposes its own cell; a view of a
    /// [`ValueCell`] leaves the writer untouched. Idempotent.
    pub fn dispose(&self) {
        self.link.detached.set(true);
        let upstream = std::mem::take(&mut *self.link.upstream.borrow_mut());
        drop(upstream);
        if self.link.owns_cell {
            self.cell.dispose();
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.link.detached.get() || self.cell.is_disposed()
    }

    /// Wrap `observer` so it goes quiet once a non-owning view is disposed.
    fn gate(&self, observer: Rc<dyn Fn(&T)>) -> Rc<dyn Fn(&T)> {
        if self.link.owns_cell {
            return observer;
        }
        let detached = Rc::clone(&self.link.detached);
        Rc::new(move |value: &T| {
            if !detached.get() {
                observer(value);
            }
        })
    }
}

impl<T: Clone + 'static> Source<T> for ReadOnlyCell<T> {
    fn observe(&self, observer: Rc<dyn Fn(&T)>) -> Subscription {
        if self.is_disposed() {
            return Subscription::empty();
        }
        self.cell.observe(self.gate(observer))
    }
}

impl<T: Clone + 'static> Notifier for ReadOnlyCell<T> {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        if self.is_disposed() {
            return Subscription::empty();
        }
        let observer = self.gate(Rc::new(move |_: &T| on_change()));
        self.cell.subscribe_changes(move |value| observer(value))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn collect<T: Clone + 'static>(cell: &ValueCell<T>) -> (Rc<RefCell<Vec<T>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let sub = cell.subscribe(move |v| seen_clone.borrow_mut().push(v.clone()));
        (seen, sub)
    }

    #[test]
    fn default_value_is_raised_on_subscribe() {
        let cell: ValueCell<Option<String>> = ValueCell::default();
        assert_eq!(cell.get(), None);
        let (seen, _sub) = collect(&cell);
        assert_eq!(*seen.borrow(), vec![None]);
    }

    #[test]
    fn initial_value_is_raised_on_subscribe() {
        let cell = ValueCell::new("Hello world".to_string());
        let (seen, _sub) = collect(&cell);
        assert_eq!(*seen.borrow(), vec!["Hello world".to_string()]);
    }

    #[test]
    fn distinct_only_does_not_raise_latest() {
        let cell: ValueCell<Option<String>> =
            ValueCell::with_mode(None, CellMode::DISTINCT_UNTIL_CHANGED);
        let called = Rc::new(Cell::new(false));
        let called_clone = Rc::clone(&called);
        let _sub = cell.subscribe(move |_| called_clone.set(true));
        assert!(!called.get());
    }

    #[test]
    fn raise_latest_only_keeps_duplicates() {
        let cell: ValueCell<Option<&str>> =
            ValueCell::with_mode(None, CellMode::RAISE_LATEST_ON_SUBSCRIBE);
        let (seen, _sub) = collect(&cell);
        cell.set(Some("Hello world"));
        cell.set(Some("Hello world"));
        cell.set(Some("Hello japan"));
        assert_eq!(
            *seen.borrow(),
            vec![
                None,
                Some("Hello world"),
                Some("Hello world"),
                Some("Hello japan")
            ]
        );
    }

    #[test]
    fn custom_equality_collapses_case() {
        let cell = ValueCell::with_equality(
            None::<String>,
            CellMode::default(),
            |a: &Option<String>, b: &Option<String>| {
                a.as_deref().map(str::to_lowercase) == b.as_deref().map(str::to_lowercase)
            },
        );
        let (seen, _sub) = collect(&cell);
        assert!(cell.set(Some("Hello world".into())));
        assert!(!cell.set(Some("HELLO WORLD".into())));
        assert!(cell.set(Some("Hello japan".into())));
        assert_eq!(
            *seen.borrow(),
            vec![None, Some("Hello world".into()), Some("Hello japan".into())]
        );
        // The suppressed write left the stored value alone.
        assert_eq!(cell.get().as_deref(), Some("Hello japan"));
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    enum Phase {
        #[default]
        Idle,
        Running,
        Done,
    }

    #[test]
    fn enum_values() {
        let cell: ValueCell<Phase> = ValueCell::default();
        let (seen, _sub) = collect(&cell);
        assert_eq!(*seen.borrow(), vec![Phase::Idle]);
        cell.set(Phase::Running);
        cell.set(Phase::Done);
        assert_eq!(*seen.borrow(), vec![Phase::Idle, Phase::Running, Phase::Done]);
    }

    #[test]
    fn force_notify_redelivers_current() {
        let cell = ValueCell::new(0);
        let (seen, _sub) = collect(&cell);
        assert_eq!(*seen.borrow(), vec![0]);
        cell.force_notify();
        assert_eq!(*seen.borrow(), vec![0, 0]);
        assert_eq!(cell.version(), 1);
    }

    #[test]
    fn unsubscribe_one_at_a_time() {
        let cell = ValueCell::with_mode(0, CellMode::NONE);
        let log = Rc::new(RefCell::new(Vec::new()));
        let tagged = |tag: &'static str| {
            let log = Rc::clone(&log);
            cell.subscribe(move |v: &i32| log.borrow_mut().push((tag, *v)))
        };
        let mut a = tagged("a");
        let b = tagged("b");
        let c = tagged("c");

        cell.set(99);
        assert_eq!(*log.borrow(), vec![("a", 99), ("b", 99), ("c", 99)]);

        log.borrow_mut().clear();
        a.dispose();
        cell.set(40);
        assert_eq!(*log.borrow(), vec![("b", 40), ("c", 40)]);

        log.borrow_mut().clear();
        drop(c);
        cell.set(50);
        assert_eq!(*log.borrow(), vec![("b", 50)]);

        log.borrow_mut().clear();
        drop(b);
        cell.set(9999);
        assert!(log.borrow().is_empty());

        let _d = tagged("d");
        cell.set(9);
        assert_eq!(*log.borrow(), vec![("d", 9)]);

        cell.dispose();
    }

    #[test]
    fn disposed_cell_is_inert() {
        let cell = ValueCell::new(1);
        let (seen, _sub) = collect(&cell);
        cell.dispose();
        cell.dispose();

        assert!(!cell.set(2));
        cell.force_notify();
        assert_eq!(cell.get(), 1);
        assert_eq!(*seen.borrow(), vec![1]);

        let (late, late_sub) = collect(&cell);
        assert!(late.borrow().is_empty());
        assert!(!late_sub.is_active());
        assert_eq!(cell.subscriber_count(), 0);
    }

    #[test]
    fn nested_writes_are_depth_first() {
        let a = ValueCell::with_mode(0, CellMode::DISTINCT_UNTIL_CHANGED);
        let b = ValueCell::with_mode(0, CellMode::DISTINCT_UNTIL_CHANGED);
        let log = Rc::new(RefCell::new(Vec::new()));

        let b_clone = b.clone();
        let log_a = Rc::clone(&log);
        let _a1 = a.subscribe(move |v| {
            log_a.borrow_mut().push(format!("a1:{v}"));
            b_clone.set(v * 10);
        });
        let log_a2 = Rc::clone(&log);
        let _a2 = a.subscribe(move |v| log_a2.borrow_mut().push(format!("a2:{v}")));
        let log_b = Rc::clone(&log);
        let _b1 = b.subscribe(move |v| log_b.borrow_mut().push(format!("b:{v}")));

        a.set(1);
        assert_eq!(*log.borrow(), vec!["a1:1", "b:10", "a2:1"]);
    }

    #[test]
    fn subscriber_may_write_its_own_cell() {
        let cell = ValueCell::with_mode(0, CellMode::DISTINCT_UNTIL_CHANGED);
        let cell_clone = cell.clone();
        let _clamp = cell.subscribe(move |v| {
            if *v > 10 {
                cell_clone.set(10);
            }
        });
        cell.set(42);
        assert_eq!(cell.get(), 10);
    }

    #[test]
    fn panicking_subscriber_does_not_pin_cell() {
        let cell = ValueCell::with_mode(0, CellMode::DISTINCT_UNTIL_CHANGED);
        let _bad = cell.subscribe(|v| {
            if *v == 1 {
                panic!("subscriber fault");
            }
        });
        let (seen, _sub) = collect(&cell);

        let result =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| cell.set(1)));
        assert!(result.is_err());
        assert_eq!(cell.get(), 1);
        assert_eq!(*seen.borrow(), vec![1]);

        assert!(cell.set(2));
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn update_applies_as_write() {
        let cell = ValueCell::new(vec![1, 2]);
        let (seen, _sub) = collect(&cell);
        assert!(cell.update(|v| v.push(3)));
        assert!(!cell.update(|_| {}));
        assert_eq!(seen.borrow().last(), Some(&vec![1, 2, 3]));
    }

    #[test]
    fn subscribe_changes_skips_replay() {
        let cell = ValueCell::new(5);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let _sub = cell.subscribe_changes(move |v| seen_clone.borrow_mut().push(*v));
        assert!(seen.borrow().is_empty());
        cell.set(6);
        assert_eq!(*seen.borrow(), vec![6]);
    }

    #[test]
    fn read_only_shares_slot() {
        let cell = ValueCell::new(1);
        let view = cell.read_only();
        cell.set(2);
        assert_eq!(view.get(), 2);
        assert_eq!(view.version(), cell.version());
    }

    #[test]
    fn disposing_a_view_leaves_the_writer_usable() {
        let cell = ValueCell::new(1);
        let view = cell.read_only();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let _sub = view.subscribe(move |v| seen_clone.borrow_mut().push(*v));

        view.dispose();
        assert!(view.is_disposed());
        assert!(!cell.is_disposed());
        assert!(cell.set(2));
        assert_eq!(cell.get(), 2);
        assert_eq!(*seen.borrow(), vec![1]);

        let (direct, _direct_sub) = collect(&cell);
        cell.set(3);
        assert_eq!(*direct.borrow(), vec![2, 3]);
        view.dispose();
    }

    #[test]
    fn read_only_from_source_mirrors_and_detaches() {
        let cell = ValueCell::new(3);
        let mirror = ReadOnlyCell::from_source(&cell, 0, CellMode::default());
        assert_eq!(mirror.get(), 3);

        cell.set(4);
        assert_eq!(mirror.get(), 4);
        assert_eq!(cell.subscriber_count(), 1);

        mirror.dispose();
        assert_eq!(cell.subscriber_count(), 0);
        cell.set(5);
        assert_eq!(mirror.get(), 4);
    }

    #[test]
    fn weak_handle_does_not_keep_cell_alive() {
        let cell = ValueCell::new(1);
        let weak = cell.downgrade();
        assert!(weak.upgrade().is_some());
        drop(cell);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn debug_format() {
        let cell = ValueCell::new(42);
        let dbg = format!("{cell:?}");
        assert!(dbg.contains("ValueCell"));
        assert!(dbg.contains("42"));
    }
}
