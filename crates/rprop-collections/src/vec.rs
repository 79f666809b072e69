#![forbid(unsafe_code)]

//! Observable ordered collection.
//!
//! Every mutation updates the backing `Vec`, releases the borrow, then emits
//! exactly one [`CollectionChange`] describing it. Observers may read the
//! collection, or mutate it again, from inside their callback.
//!
//! A mutation made while a change is being delivered does not interrupt the
//! pass: its change is queued and delivered once every observer has seen the
//! current one, so all observers see changes in mutation order. Changes
//! raised while a [`CollectionChange::Reset`] is queued or being delivered
//! are folded into another `Reset`, since observers handle a reset by
//! re-reading the live contents.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use rprop_core::{Broadcast, Notifier, Source, Subscription};

/// One structural change of an [`ObservableVec`] or a view of it.
///
/// Indices refer to the collection after the change, except `Removed` and
/// `Moved::from`, which refer to the position before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollectionChange<T> {
    Added { index: usize, item: T },
    Removed { index: usize, item: T },
    Moved { from: usize, to: usize, item: T },
    Replaced { index: usize, old: T, new: T },
    /// Contents changed wholesale; re-read everything.
    Reset,
}

impl<T> CollectionChange<T> {
    /// Short event name, used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Added { .. } => "added",
            Self::Removed { .. } => "removed",
            Self::Moved { .. } => "moved",
            Self::Replaced { .. } => "replaced",
            Self::Reset => "reset",
        }
    }
}

struct VecInner<T> {
    items: RefCell<Vec<T>>,
    changes: Broadcast<CollectionChange<T>>,
    /// Changes raised while a pass is in flight, in mutation order.
    pending: RefCell<VecDeque<CollectionChange<T>>>,
    emitting: Cell<bool>,
    delivering_reset: Cell<bool>,
}

/// Ordered collection that announces every change.
///
/// Cloning creates another handle to the same collection.
pub struct ObservableVec<T> {
    inner: Rc<VecInner<T>>,
}

impl<T> Clone for ObservableVec<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Default for ObservableVec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + 'static> From<Vec<T>> for ObservableVec<T> {
    fn from(items: Vec<T>) -> Self {
        Self {
            inner: Rc::new(VecInner {
                items: RefCell::new(items),
                changes: Broadcast::new(),
                pending: RefCell::new(VecDeque::new()),
                emitting: Cell::new(false),
                delivering_reset: Cell::new(false),
            }),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for ObservableVec<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.inner.items.try_borrow() {
            Ok(items) => f.debug_list().entries(items.iter()).finish(),
            Err(_) => f.write_str("ObservableVec(<borrowed>)"),
        }
    }
}

impl<T: Clone + 'static> ObservableVec<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::from(Vec::new())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.items.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<T> {
        self.inner.items.borrow().get(index).cloned()
    }

    #[must_use]
    pub fn to_vec(&self) -> Vec<T> {
        self.inner.items.borrow().clone()
    }

    /// Borrow the contents.
    ///
    /// # Panics
    ///
    /// Panics if `f` mutates this collection.
    pub fn with<R>(&self, f: impl FnOnce(&[T]) -> R) -> R {
        f(&self.inner.items.borrow())
    }

    pub fn push(&self, item: T) {
        let index = {
            let mut items = self.inner.items.borrow_mut();
            items.push(item.clone());
            items.len() - 1
        };
        self.emit(CollectionChange::Added { index, item });
    }

    /// Insert `item` at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index > len`.
    pub fn insert(&self, index: usize, item: T) {
        self.inner.items.borrow_mut().insert(index, item.clone());
        self.emit(CollectionChange::Added { index, item });
    }

    /// Remove and return the item at `index`, if any.
    pub fn remove(&self, index: usize) -> Option<T> {
        let item = {
            let mut items = self.inner.items.borrow_mut();
            (index < items.len()).then(|| items.remove(index))
        }?;
        self.emit(CollectionChange::Removed {
            index,
            item: item.clone(),
        });
        Some(item)
    }

    /// Remove every item for which `keep` returns false, one `Removed`
    /// change per item, front to back. Returns how many were removed.
    pub fn retain(&self, mut keep: impl FnMut(&T) -> bool) -> usize {
        let mut removed = 0;
        let mut from = 0;
        loop {
            let hit = {
                let items = self.inner.items.borrow();
                items
                    .get(from..)
                    .and_then(|rest| rest.iter().position(|item| !keep(item)))
                    .map(|offset| from + offset)
            };
            let Some(index) = hit else {
                break;
            };
            let item = self.inner.items.borrow_mut().remove(index);
            self.emit(CollectionChange::Removed { index, item });
            removed += 1;
            from = index;
        }
        removed
    }

    /// Move the item at `from` so it ends up at `to`. Returns false if
    /// either index is out of range.
    pub fn move_item(&self, from: usize, to: usize) -> bool {
        let item = {
            let mut items = self.inner.items.borrow_mut();
            if from >= items.len() || to >= items.len() {
                return false;
            }
            let item = items.remove(from);
            items.insert(to, item.clone());
            item
        };
        if from != to {
            self.emit(CollectionChange::Moved { from, to, item });
        }
        true
    }

    /// Replace the item at `index`, returning the old one.
    pub fn replace(&self, index: usize, item: T) -> Option<T> {
        let old = {
            let mut items = self.inner.items.borrow_mut();
            let slot = items.get_mut(index)?;
            std::mem::replace(slot, item.clone())
        };
        self.emit(CollectionChange::Replaced {
            index,
            old: old.clone(),
            new: item,
        });
        Some(old)
    }

    /// Remove everything and emit [`CollectionChange::Reset`].
    pub fn clear(&self) {
        let old = std::mem::take(&mut *self.inner.items.borrow_mut());
        drop(old);
        self.emit(CollectionChange::Reset);
    }

    /// Observe structural changes. Nothing is replayed.
    pub fn subscribe(&self, observer: impl Fn(&CollectionChange<T>) + 'static) -> Subscription {
        self.inner.changes.subscribe(observer)
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.changes.subscriber_count()
    }

    fn emit(&self, change: CollectionChange<T>) {
        tracing::trace!(message = "collection.change", kind = change.kind());
        if self.inner.emitting.get() {
            self.enqueue(change);
            return;
        }

        self.inner.emitting.set(true);
        let mut first_panic = None;
        let mut next = Some(change);
        while let Some(change) = next {
            self.inner
                .delivering_reset
                .set(matches!(change, CollectionChange::Reset));
            let delivered =
                panic::catch_unwind(AssertUnwindSafe(|| self.inner.changes.emit(&change)));
            if let Err(payload) = delivered {
                first_panic.get_or_insert(payload);
            }
            next = self.inner.pending.borrow_mut().pop_front();
        }
        self.inner.delivering_reset.set(false);
        self.inner.emitting.set(false);

        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    fn enqueue(&self, change: CollectionChange<T>) {
        let mut pending = self.inner.pending.borrow_mut();
        let folds = matches!(change, CollectionChange::Reset)
            || self.inner.delivering_reset.get()
            || pending.iter().any(|c| matches!(c, CollectionChange::Reset));
        if folds {
            pending.clear();
            pending.push_back(CollectionChange::Reset);
        } else {
            pending.push_back(change);
        }
        tracing::trace!(message = "collection.change_queued", queued = pending.len());
    }
}

impl<T: Clone + 'static> Source<CollectionChange<T>> for ObservableVec<T> {
    fn observe(&self, observer: Rc<dyn Fn(&CollectionChange<T>)>) -> Subscription {
        self.inner.changes.observe(observer)
    }
}

impl<T: Clone + 'static> Notifier for ObservableVec<T> {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.inner.changes.notify_on_change(on_change)
    }
}
