#![forbid(unsafe_code)]

//! Per-element change tracking.
//!
//! Collections announce structural changes only. To react when a property
//! *inside* an element changes (a todo item's `done` flag, say), a watch
//! function maps each element to the [`Notifier`]s worth listening to, and an
//! [`ElementObserver`] keeps one set of subscriptions per element in step
//! with the collection.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use rprop_core::{Broadcast, Notifier, Source, Subscription};

use crate::vec::{CollectionChange, ObservableVec};

/// Maps an element to the notifiers that signal changes inside it.
pub type WatchFn<T> = Rc<dyn Fn(&T) -> Vec<Box<dyn Notifier>>>;

/// Subscribe `on_change` to every notifier `watch` yields for `item`.
pub(crate) fn watch_item<T>(watch: &WatchFn<T>, item: &T, on_change: Rc<dyn Fn()>) -> Vec<Subscription> {
    watch(item)
        .iter()
        .map(|notifier| notifier.notify_on_change(Rc::clone(&on_change)))
        .collect()
}

/// Stable identity for a tracked element, independent of its position.
#[derive(Debug, Default)]
pub(crate) struct IdSource(Cell<u64>);

impl IdSource {
    pub(crate) fn next(&self) -> u64 {
        let id = self.0.get();
        self.0.set(id + 1);
        id
    }
}

/// The subscriptions watching one element, held for their drop.
struct Tracked {
    _subs: Vec<Subscription>,
}

struct ObserverInner<T> {
    source: ObservableVec<T>,
    watch: WatchFn<T>,
    entries: RefCell<Vec<Tracked>>,
    output: Broadcast<T>,
    upstream: RefCell<Option<Subscription>>,
}

impl<T: Clone + 'static> ObserverInner<T> {
    /// Watch `item`. The subscriptions die with its entry, so the callback
    /// never fires for an element that has left the collection.
    fn track(self: &Rc<Self>, item: &T) -> Tracked {
        let weak: Weak<Self> = Rc::downgrade(self);
        let changed = item.clone();
        let subs = watch_item(
            &self.watch,
            item,
            Rc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.output.emit(&changed);
                }
            }),
        );
        Tracked { _subs: subs }
    }

    fn rebuild(self: &Rc<Self>) {
        let items = self.source.to_vec();
        let fresh: Vec<Tracked> = items.iter().map(|item| self.track(item)).collect();
        let old = std::mem::replace(&mut *self.entries.borrow_mut(), fresh);
        drop(old);
    }

    fn on_source_change(self: &Rc<Self>, change: &CollectionChange<T>) {
        match change {
            CollectionChange::Added { index, item } => {
                let tracked = self.track(item);
                let mut entries = self.entries.borrow_mut();
                let at = (*index).min(entries.len());
                entries.insert(at, tracked);
            }
            CollectionChange::Removed { index, .. } => {
                let removed = {
                    let mut entries = self.entries.borrow_mut();
                    (*index < entries.len()).then(|| entries.remove(*index))
                };
                drop(removed);
            }
            CollectionChange::Moved { from, to, .. } => {
                let mut entries = self.entries.borrow_mut();
                if *from < entries.len() && *to < entries.len() {
                    let entry = entries.remove(*from);
                    entries.insert(*to, entry);
                }
            }
            CollectionChange::Replaced { index, new, .. } => {
                let tracked = self.track(new);
                let old = {
                    let mut entries = self.entries.borrow_mut();
                    entries
                        .get_mut(*index)
                        .map(|entry| std::mem::replace(entry, tracked))
                };
                drop(old);
            }
            CollectionChange::Reset => self.rebuild(),
        }
    }
}

/// Emits an element whenever one of its watched notifiers fires.
///
/// Cloning creates another handle to the same observer.
pub struct ElementObserver<T> {
    inner: Rc<ObserverInner<T>>,
}

impl<T> Clone for ElementObserver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> ElementObserver<T> {
    pub fn new(
        source: &ObservableVec<T>,
        watch: impl Fn(&T) -> Vec<Box<dyn Notifier>> + 'static,
    ) -> Self {
        let inner = Rc::new(ObserverInner {
            source: source.clone(),
            watch: Rc::new(watch),
            entries: RefCell::new(Vec::new()),
            output: Broadcast::new(),
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

    /// Receive each element whose watched state changed.
    pub fn subscribe(&self, observer: impl Fn(&T) + 'static) -> Subscription {
        self.inner.output.subscribe(observer)
    }

    /// Number of elements currently tracked.
    #[must_use]
    pub fn tracked(&self) -> usize {
        self.inner.entries.borrow().len()
    }

    /// Stop tracking and drop every element subscription.
    pub fn dispose(&self) {
        let upstream = self.inner.upstream.borrow_mut().take();
        drop(upstream);
        let entries = std::mem::take(&mut *self.inner.entries.borrow_mut());
        drop(entries);
        self.inner.output.dispose();
    }
}

impl<T: Clone + 'static> Source<T> for ElementObserver<T> {
    fn observe(&self, observer: Rc<dyn Fn(&T)>) -> Subscription {
        self.inner.output.observe(observer)
    }
}

impl<T: Clone + 'static> Notifier for ElementObserver<T> {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.inner.output.notify_on_change(on_change)
    }
}

impl<T: 'static> fmt::Debug for ElementObserver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElementObserver")
            .field("output", &self.inner.output)
            .finish_non_exhaustive()
    }
}
