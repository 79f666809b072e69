#![forbid(unsafe_code)]

//! Incrementally maintained filtered views.
//!
//! # Design
//!
//! A [`FilteredView`] mirrors its source one-to-one with entries carrying the
//! item, a stable id, whether the predicate currently accepts it, and the
//! subscriptions watching its inner state. The included items are also kept
//! in a plain `Vec` in source order, so reads are O(1).
//!
//! Each source change is translated into at most one view change. Position
//! in the view is the number of included entries before the source position,
//! counted from whichever end of the source is nearer. Entries are also
//! indexed by id, so a watched element is located without a scan; structural
//! edits re-index only the entries they shift.
//!
//! # Invariants
//!
//! 1. The view equals `source.filter(predicate)` in source order, at every
//!    point where no notification pass is in flight.
//! 2. An element whose watched state flips the predicate is added or removed
//!    without touching the rest of the view.
//! 3. A `Moved` is re-emitted only if the element is included and its view
//!    position actually changes.
//!
//! # Failure Modes
//!
//! - **Predicate panics**: the panic escapes to the writer; the view may lag
//!   the source until [`FilteredView::refresh`] runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use rprop_core::{Broadcast, Notifier, Source, Subscription};

use crate::element::{IdSource, WatchFn, watch_item};
use crate::vec::{CollectionChange, ObservableVec};

struct Entry<T> {
    id: u64,
    item: T,
    included: bool,
    subs: Vec<Subscription>,
}

struct ViewState<T> {
    entries: Vec<Entry<T>>,
    matched: Vec<T>,
    /// Source position of each entry, by id.
    slots: HashMap<u64, usize>,
}

impl<T> ViewState<T> {
    fn new(entries: Vec<Entry<T>>, matched: Vec<T>) -> Self {
        let mut state = Self {
            entries,
            matched,
            slots: HashMap::new(),
        };
        state.reindex(0);
        state
    }

    fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Refresh the positions of the entries at `from..`.
    fn reindex(&mut self, from: usize) {
        for (at, entry) in self.entries.iter().enumerate().skip(from) {
            self.slots.insert(entry.id, at);
        }
    }

    /// View position of the entry at source position `at`.
    fn view_index(&self, at: usize) -> usize {
        if at <= self.entries.len() / 2 {
            self.entries[..at].iter().filter(|e| e.included).count()
        } else {
            let after = self.entries[at..].iter().filter(|e| e.included).count();
            self.matched.len() - after
        }
    }

    fn position(&self, id: u64) -> Option<usize> {
        self.slots.get(&id).copied()
    }
}

struct ViewInner<T> {
    source: ObservableVec<T>,
    predicate: Box<dyn Fn(&T) -> bool>,
    watch: Option<WatchFn<T>>,
    ids: IdSource,
    state: RefCell<ViewState<T>>,
    changes: Broadcast<CollectionChange<T>>,
    upstream: RefCell<Option<Subscription>>,
}

impl<T: Clone + 'static> ViewInner<T> {
    fn watch(self: &Rc<Self>, id: u64, item: &T) -> Vec<Subscription> {
        let Some(watch) = &self.watch else {
            return Vec::new();
        };
        let weak: Weak<Self> = Rc::downgrade(self);
        watch_item(
            watch,
            item,
            Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.element_changed(id);
                }
            }),
        )
    }

    fn attach(&self, id: u64, subs: Vec<Subscription>) {
        let mut state = self.state.borrow_mut();
        if let Some(at) = state.position(id) {
            state.entries[at].subs = subs;
        }
    }

    fn rebuild(self: &Rc<Self>) {
        let items = self.source.to_vec();
        let mut entries = Vec::with_capacity(items.len());
        let mut matched = Vec::new();
        for item in items {
            let included = (self.predicate)(&item);
            if included {
                matched.push(item.clone());
            }
            let id = self.ids.next();
            let subs = self.watch(id, &item);
            entries.push(Entry {
                id,
                item,
                included,
                subs,
            });
        }
        let old = std::mem::replace(&mut *self.state.borrow_mut(), ViewState::new(entries, matched));
        drop(old);
    }

    fn on_source_change(self: &Rc<Self>, change: &CollectionChange<T>) {
        match change {
            CollectionChange::Added { index, item } => self.source_added(*index, item),
            CollectionChange::Removed { index, .. } => self.source_removed(*index),
            CollectionChange::Moved { from, to, .. } => self.source_moved(*from, *to),
            CollectionChange::Replaced { index, new, .. } => self.source_replaced(*index, new),
            CollectionChange::Reset => {
                self.rebuild();
                self.changes.emit(&CollectionChange::Reset);
            }
        }
    }

    fn source_added(self: &Rc<Self>, index: usize, item: &T) {
        let included = (self.predicate)(item);
        let id = self.ids.next();
        let view_change = {
            let mut state = self.state.borrow_mut();
            let at = index.min(state.entries.len());
            let view_at = state.view_index(at);
            state.entries.insert(
                at,
                Entry {
                    id,
                    item: item.clone(),
                    included,
                    subs: Vec::new(),
                },
            );
            state.reindex(at);
            included.then(|| {
                state.matched.insert(view_at, item.clone());
                CollectionChange::Added {
                    index: view_at,
                    item: item.clone(),
                }
            })
        };
        let subs = self.watch(id, item);
        self.attach(id, subs);
        if let Some(change) = view_change {
            self.changes.emit(&change);
        }
    }

    fn source_removed(&self, index: usize) {
        let (entry, view_change) = {
            let mut state = self.state.borrow_mut();
            if index >= state.entries.len() {
                return;
            }
            let view_at = state.view_index(index);
            let entry = state.entries.remove(index);
            state.slots.remove(&entry.id);
            state.reindex(index);
            let view_change = entry.included.then(|| CollectionChange::Removed {
                index: view_at,
                item: state.matched.remove(view_at),
            });
            (entry, view_change)
        };
        drop(entry);
        if let Some(change) = view_change {
            self.changes.emit(&change);
        }
    }

    fn source_moved(&self, from: usize, to: usize) {
        let view_change = {
            let mut state = self.state.borrow_mut();
            let len = state.entries.len();
            if from >= len || to >= len {
                return;
            }
            let old_view = state.view_index(from);
            let entry = state.entries.remove(from);
            let included = entry.included;
            state.entries.insert(to, entry);
            state.reindex(from.min(to));
            if included {
                let new_view = state.view_index(to);
                (old_view != new_view).then(|| {
                    let item = state.matched.remove(old_view);
                    state.matched.insert(new_view, item.clone());
                    CollectionChange::Moved {
                        from: old_view,
                        to: new_view,
                        item,
                    }
                })
            } else {
                None
            }
        };
        if let Some(change) = view_change {
            self.changes.emit(&change);
        }
    }

    fn source_replaced(self: &Rc<Self>, index: usize, new: &T) {
        let now = (self.predicate)(new);
        let id = self.ids.next();
        let (old_entry, view_change) = {
            let mut state = self.state.borrow_mut();
            if index >= state.entries.len() {
                return;
            }
            let view_at = state.view_index(index);
            let was = state.entries[index].included;
            let old_entry = std::mem::replace(
                &mut state.entries[index],
                Entry {
                    id,
                    item: new.clone(),
                    included: now,
                    subs: Vec::new(),
                },
            );
            state.slots.remove(&old_entry.id);
            state.slots.insert(id, index);
            let view_change = match (was, now) {
                (true, true) => {
                    let old = std::mem::replace(&mut state.matched[view_at], new.clone());
                    Some(CollectionChange::Replaced {
                        index: view_at,
                        old,
                        new: new.clone(),
                    })
                }
                (true, false) => Some(CollectionChange::Removed {
                    index: view_at,
                    item: state.matched.remove(view_at),
                }),
                (false, true) => {
                    state.matched.insert(view_at, new.clone());
                    Some(CollectionChange::Added {
                        index: view_at,
                        item: new.clone(),
                    })
                }
                (false, false) => None,
            };
            (old_entry, view_change)
        };
        drop(old_entry);
        let subs = self.watch(id, new);
        self.attach(id, subs);
        if let Some(change) = view_change {
            self.changes.emit(&change);
        }
    }

    /// Re-evaluate the entry `id` and flip its membership if needed.
    fn element_changed(&self, id: u64) {
        let Some((item, was)) = ({
            let state = self.state.borrow();
            state
                .position(id)
                .map(|at| (state.entries[at].item.clone(), state.entries[at].included))
        }) else {
            return;
        };
        let now = (self.predicate)(&item);
        if now != was {
            self.flip(id, now);
        }
    }

    fn flip(&self, id: u64, now: bool) {
        let view_change = {
            let mut state = self.state.borrow_mut();
            let Some(at) = state.position(id) else {
                return;
            };
            if state.entries[at].included == now {
                return;
            }
            let view_at = state.view_index(at);
            state.entries[at].included = now;
            if now {
                let item = state.entries[at].item.clone();
                state.matched.insert(view_at, item.clone());
                CollectionChange::Added {
                    index: view_at,
                    item,
                }
            } else {
                CollectionChange::Removed {
                    index: view_at,
                    item: state.matched.remove(view_at),
                }
            }
        };
        self.changes.emit(&view_change);
    }
}

/// Live subset of an [`ObservableVec`] in source order.
///
/// Cloning creates another handle to the same view.
pub struct FilteredView<T> {
    inner: Rc<ViewInner<T>>,
}

impl<T> Clone for FilteredView<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> FilteredView<T> {
    /// View of `source` filtered by `predicate`, re-evaluated on structural
    /// changes only.
    pub fn new(source: &ObservableVec<T>, predicate: impl Fn(&T) -> bool + 'static) -> Self {
        Self::build(source, Box::new(predicate), None)
    }

    /// View that also re-evaluates an element whenever one of the notifiers
    /// `watch` yields for it fires.
    pub fn with_watch(
        source: &ObservableVec<T>,
        predicate: impl Fn(&T) -> bool + 'static,
        watch: impl Fn(&T) -> Vec<Box<dyn Notifier>> + 'static,
    ) -> Self {
        Self::build(source, Box::new(predicate), Some(Rc::new(watch)))
    }

    fn build(
        source: &ObservableVec<T>,
        predicate: Box<dyn Fn(&T) -> bool>,
        watch: Option<WatchFn<T>>,
    ) -> Self {
        let inner = Rc::new(ViewInner {
            source: source.clone(),
            predicate,
            watch,
            ids: IdSource::default(),
            state: RefCell::new(ViewState::empty()),
            changes: Broadcast::new(),
            upstream: RefCell::new(None),
        });
        inner.rebuild();
        let weak = Rc::downgrade(&inner);
        let upstream = source.subscribe(move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.on_source_change(change);
            }
        });
        *inner.upstream.borrow_mut() = Some(upstream);
        Self { inner }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.borrow().matched.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.borrow().matched.is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.state.borrow().matched.get(index).cloned()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.state.borrow().matched.clone()
    }

    /// Borrow the included items.
    ///
    /// # Panics
    ///
    /// Panics if `f` mutates the source.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.inner.state.borrow().matched)
    }

    /// Re-evaluate the predicate for every element.
    ///
    /// Needed only when the predicate depends on state the view does not
    /// watch. Emits one `Added` or `Removed` per element that flipped.
    pub fn refresh(&self) {
        let snapshot: Vec<(u64, T, bool)> = {
            let state = self.inner.state.borrow();
            state
                .entries
                .iter()
                .map(|e| (e.id, e.item.clone(), e.included))
                .collect()
        };
        let source_len = snapshot.len();
        let mut matched = 0usize;
        for (id, item, was) in snapshot {
            let now = (self.inner.predicate)(&item);
            matched += usize::from(now);
            if now != was {
                self.inner.flip(id, now);
            }
        }
        tracing::debug!(message = "view.refresh", source_len, matched);
    }

    /// Observe view changes. Nothing is replayed.
    pub fn subscribe(&self, observer: impl Fn(&CollectionChange<T>) + 'static) -> Subscription {
        self.inner.changes.subscribe(observer)
    }

    /// Detach from the source and from every element.
    pub fn dispose(&self) {
        let upstream = self.inner.upstream.borrow_mut().take();
        drop(upstream);
        let old = std::mem::replace(&mut *self.inner.state.borrow_mut(), ViewState::empty());
        drop(old);
        self.inner.changes.dispose();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.changes.is_disposed()
    }
}

impl<T: Clone + 'static> Source<CollectionChange<T>> for FilteredView<T> {
    fn observe(&self, observer: Rc<dyn Fn(&CollectionChange<T>)>) -> Subscription {
        self.inner.changes.observe(observer)
    }
}

impl<T: Clone + 'static> Notifier for FilteredView<T> {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.inner.changes.notify_on_change(on_change)
    }
}

impl<T: fmt::Debug> fmt::Debug for FilteredView<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.state.try_borrow() {
            Ok(state) => f.debug_list().entries(state.matched.iter()).finish(),
            Err(_) => f.write_str("FilteredView(<borrowed>)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rprop_core::ValueCell;

    fn even(n: &i32) -> bool {
        n % 2 == 0
    }

    fn recorder<T: Clone + 'static>(
        view: &FilteredView<T>,
    ) -> (Rc<RefCell<Vec<CollectionChange<T>>>>, Subscription) {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen_clone = Rc::clone(&seen);
        let sub = view.subscribe(move |c| seen_clone.borrow_mut().push(c.clone()));
        (seen, sub)
    }

    #[test]
    fn initial_contents_follow_predicate() {
        let vec = ObservableVec::from(vec![1, 2, 3, 4]);
        let view = FilteredView::new(&vec, even);
        assert_eq!(view.to_vec(), vec![2, 4]);
        assert_eq!(view.get(1), Some(4));
        assert_eq!(view.len(), 2);
    }

    #[test]
    fn added_items_land_at_filtered_position() {
        let vec = ObservableVec::from(vec![2, 3, 8]);
        let view = FilteredView::new(&vec, even);
        let (seen, _sub) = recorder(&view);

        vec.insert(2, 6);
        vec.insert(0, 5);
        vec.push(10);
        assert_eq!(view.to_vec(), vec![2, 6, 8, 10]);
        assert_eq!(
            *seen.borrow(),
            vec![
                CollectionChange::Added { index: 1, item: 6 },
                CollectionChange::Added { index: 3, item: 10 },
            ]
        );
    }

    #[test]
    fn removals_of_excluded_items_are_silent() {
        let vec = ObservableVec::from(vec![1, 2, 3, 4]);
        let view = FilteredView::new(&vec, even);
        let (seen, _sub) = recorder(&view);
        vec.remove(0);
        vec.remove(2);
        assert_eq!(view.to_vec(), vec![2]);
        assert_eq!(
            *seen.borrow(),
            vec![CollectionChange::Removed { index: 1, item: 4 }]
        );
    }

    #[test]
    fn move_emits_only_when_view_order_changes() {
        let vec = ObservableVec::from(vec![2, 1, 4, 3]);
        let view = FilteredView::new(&vec, even);
        let (seen, _sub) = recorder(&view);

        // 2 hops over an odd item only: view order unchanged.
        vec.move_item(0, 1);
        assert!(seen.borrow().is_empty());

        // 2 now passes 4.
        vec.move_item(1, 3);
        assert_eq!(view.to_vec(), vec![4, 2]);
        assert_eq!(
            *seen.borrow(),
            vec![CollectionChange::Moved { from: 0, to: 1, item: 2 }]
        );
    }

    #[test]
    fn replace_covers_all_membership_cases() {
        let vec = ObservableVec::from(vec![2, 1]);
        let view = FilteredView::new(&vec, even);
        let (seen, _sub) = recorder(&view);

        vec.replace(0, 4);
        vec.replace(1, 6);
        vec.replace(0, 5);
        vec.replace(0, 7);
        assert_eq!(view.to_vec(), vec![6]);
        assert_eq!(
            *seen.borrow(),
            vec![
                CollectionChange::Replaced { index: 0, old: 2, new: 4 },
                CollectionChange::Added { index: 1, item: 6 },
                CollectionChange::Removed { index: 0, item: 4 },
            ]
        );
    }

    #[test]
    fn reset_rebuilds_and_is_forwarded() {
        let vec = ObservableVec::from(vec![2, 4]);
        let view = FilteredView::new(&vec, even);
        let (seen, _sub) = recorder(&view);
        vec.clear();
        vec.push(8);
        assert_eq!(view.to_vec(), vec![8]);
        assert_eq!(seen.borrow()[0], CollectionChange::Reset);
    }

    #[test]
    fn watched_element_changes_flip_membership() {
        let a = ValueCell::new(false);
        let b = ValueCell::new(true);
        let vec = ObservableVec::from(vec![a.clone(), b.clone()]);
        let done = FilteredView::with_watch(&vec, |c: &ValueCell<bool>| c.get(), |c| {
            vec![Box::new(c.clone()) as Box<dyn Notifier>]
        });
        let (seen, _sub) = recorder(&done);
        assert_eq!(done.len(), 1);

        a.set(true);
        assert_eq!(done.len(), 2);
        b.set(false);
        assert_eq!(done.len(), 1);
        assert!(done.get(0).is_some_and(|c| c.get()));

        let kinds: Vec<_> = seen.borrow().iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec!["added", "removed"]);
        match &seen.borrow()[0] {
            CollectionChange::Added { index, .. } => assert_eq!(*index, 0),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn removed_elements_are_no_longer_watched() {
        let a = ValueCell::new(false);
        let vec = ObservableVec::from(vec![a.clone()]);
        let done = FilteredView::with_watch(&vec, |c: &ValueCell<bool>| c.get(), |c| {
            vec![Box::new(c.clone()) as Box<dyn Notifier>]
        });
        assert_eq!(a.subscriber_count(), 1);
        vec.remove(0);
        assert_eq!(a.subscriber_count(), 0);
        a.set(true);
        assert!(done.is_empty());
    }

    #[test]
    #[tracing_test::traced_test]
    fn refresh_picks_up_unwatched_state() {
        let threshold = Rc::new(std::cell::Cell::new(2));
        let t = Rc::clone(&threshold);
        let vec = ObservableVec::from(vec![1, 2, 3, 4]);
        let view = FilteredView::new(&vec, move |n: &i32| *n > t.get());
        assert_eq!(view.to_vec(), vec![3, 4]);

        threshold.set(0);
        assert_eq!(view.len(), 2);
        view.refresh();
        assert_eq!(view.to_vec(), vec![1, 2, 3, 4]);
        assert!(logs_contain("view.refresh"));
    }

    #[test]
    fn keeps_source_order_when_an_earlier_observer_mutates() {
        let vec = ObservableVec::new();
        let handle = vec.clone();
        let _feeder = vec.subscribe(move |change| {
            if let CollectionChange::Added { item, .. } = change {
                if *item < 3 {
                    handle.push(item + 1);
                }
            }
        });
        let view = FilteredView::new(&vec, |_: &i32| true);
        let (seen, _sub) = recorder(&view);

        vec.push(0);
        assert_eq!(vec.to_vec(), vec![0, 1, 2, 3]);
        assert_eq!(view.to_vec(), vec![0, 1, 2, 3]);
        let indices: Vec<usize> = seen
            .borrow()
            .iter()
            .filter_map(|c| match c {
                CollectionChange::Added { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn watched_elements_are_found_after_structural_edits() {
        let cells: Vec<ValueCell<i32>> = (0..6).map(ValueCell::new).collect();
        let vec = ObservableVec::from(cells.clone());
        let view = FilteredView::with_watch(
            &vec,
            |c: &ValueCell<i32>| c.get() % 2 == 0,
            |c| vec![Box::new(c.clone()) as Box<dyn Notifier>],
        );
        vec.remove(0);
        vec.move_item(4, 0);
        vec.replace(2, ValueCell::new(10));
        vec.insert(1, ValueCell::new(7));

        cells[5].set(8);
        cells[1].set(12);
        let values: Vec<i32> = view.to_vec().iter().map(ValueCell::get).collect();
        let expected: Vec<i32> = vec
            .to_vec()
            .iter()
            .map(ValueCell::get)
            .filter(|n| n % 2 == 0)
            .collect();
        assert_eq!(values, expected);
        assert_eq!(values, vec![8, 12, 10, 4]);
    }

    #[test]
    fn dispose_detaches_from_source() {
        let vec = ObservableVec::from(vec![2]);
        let view = FilteredView::new(&vec, even);
        view.dispose();
        assert!(view.is_disposed());
        assert_eq!(vec.subscriber_count(), 0);
        vec.push(4);
        assert!(view.is_empty());
    }

    #[test]
    fn dropping_the_view_detaches_too() {
        let vec = ObservableVec::from(vec![2]);
        drop(FilteredView::new(&vec, even));
        assert_eq!(vec.subscriber_count(), 0);
    }
}
