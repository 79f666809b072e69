#![forbid(unsafe_code)]

//! Values derived from a whole collection.
//!
//! A [`LiveAggregate`] recomputes `compute(&items)` whenever the collection
//! changes structurally or a watched element changes inside. Recomputation is
//! either immediate or coalesced over a debounce window, and always reads the
//! collection as it is at that moment. The result is held in a distinct,
//! replaying cell.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rprop_core::{
    Debouncer, Duration, Merged, Notifier, ReadOnlyCell, Scheduler, Source, Subscription,
    ValueCell, merge,
};

use crate::element::ElementObserver;
use crate::vec::ObservableVec;

/// A derived value kept in step with an [`ObservableVec`].
pub struct LiveAggregate<T, R> {
    value: ValueCell<R>,
    elements: ElementObserver<T>,
    debouncer: Option<Debouncer>,
    recompute: Rc<dyn Fn()>,
    trigger: RefCell<Subscription>,
    _merged: Merged,
}

impl<T: Clone + 'static, R: Clone + PartialEq + 'static> LiveAggregate<T, R> {
    /// Recompute synchronously on every change.
    pub fn new(
        source: &ObservableVec<T>,
        watch: impl Fn(&T) -> Vec<Box<dyn Notifier>> + 'static,
        compute: impl Fn(&[T]) -> R + 'static,
    ) -> Self {
        Self::build(source, watch, compute, None)
    }

    /// Recompute once the collection has been quiet for `window`.
    pub fn debounced(
        source: &ObservableVec<T>,
        watch: impl Fn(&T) -> Vec<Box<dyn Notifier>> + 'static,
        compute: impl Fn(&[T]) -> R + 'static,
        window: Duration,
        scheduler: Rc<dyn Scheduler>,
    ) -> Self {
        Self::build(source, watch, compute, Some(Debouncer::new(scheduler, window)))
    }

    fn build(
        source: &ObservableVec<T>,
        watch: impl Fn(&T) -> Vec<Box<dyn Notifier>> + 'static,
        compute: impl Fn(&[T]) -> R + 'static,
        debouncer: Option<Debouncer>,
    ) -> Self {
        let value = ValueCell::new(source.with(&compute));
        let elements = ElementObserver::new(source, watch);

        let weak_value = value.downgrade();
        let items = source.clone();
        let recompute: Rc<dyn Fn()> = Rc::new(move || {
            let Some(value) = weak_value.upgrade() else {
                return;
            };
            let next = items.with(&compute);
            tracing::trace!(message = "aggregate.recompute", len = items.len());
            value.set(next);
        });

        let merged = merge([
            Box::new(elements.clone()) as Box<dyn Notifier>,
            Box::new(source.clone()),
        ]);
        let on_change = Rc::clone(&recompute);
        let pending = debouncer.clone();
        let trigger = merged.notify_on_change(Rc::new(move || match &pending {
            Some(debouncer) => {
                let run = Rc::clone(&on_change);
                debouncer.trigger(move || run());
            }
            None => on_change(),
        }));

        Self {
            value,
            elements,
            debouncer,
            recompute,
            trigger: RefCell::new(trigger),
            _merged: merged,
        }
    }

    #[must_use]
    pub fn get(&self) -> R {
        self.value.get()
    }

    /// Observe the aggregate; the current value is replayed first.
    pub fn subscribe(&self, observer: impl Fn(&R) + 'static) -> Subscription {
        self.value.subscribe(observer)
    }

    /// Detached read-only mirror of the aggregate.
    #[must_use]
    pub fn read_only(&self) -> ReadOnlyCell<R> {
        ReadOnlyCell::from_source(&self.value, self.value.get(), self.value.mode())
    }

    /// Skip any pending debounce and recompute now.
    pub fn recompute_now(&self) {
        if let Some(debouncer) = &self.debouncer {
            debouncer.cancel();
        }
        (self.recompute)();
    }

    /// Whether a debounced recomputation is scheduled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.debouncer.as_ref().is_some_and(Debouncer::is_pending)
    }

    /// Stop recomputing and release every subscription. Idempotent.
    pub fn dispose(&self) {
        self.trigger.borrow_mut().dispose();
        if let Some(debouncer) = &self.debouncer {
            debouncer.cancel();
        }
        self.elements.dispose();
        self.value.dispose();
    }
}

impl<T, R> Drop for LiveAggregate<T, R> {
    fn drop(&mut self) {
        if let Some(debouncer) = &self.debouncer {
            debouncer.cancel();
        }
    }
}

impl<T: Clone + 'static, R: Clone + 'static> Source<R> for LiveAggregate<T, R> {
    fn observe(&self, observer: Rc<dyn Fn(&R)>) -> Subscription {
        self.value.observe(observer)
    }
}

impl<T: Clone + 'static, R: Clone + 'static> Notifier for LiveAggregate<T, R> {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.value.notify_on_change(on_change)
    }
}

impl<T, R: fmt::Debug> fmt::Debug for LiveAggregate<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveAggregate")
            .field("value", &self.value)
            .field("debounced", &self.debouncer.is_some())
            .finish_non_exhaustive()
    }
}
