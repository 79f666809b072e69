#![forbid(unsafe_code)]

//! Combine-latest over a fixed set of sources.
//!
//! [`CombineLatest`] remembers the latest value of each input and, once every
//! input has produced at least one value, recomputes on every input emission.
//! [`all_true`] and [`all_false`] are the boolean reductions.
//!
//! The input set is captured at construction. Aggregation over a collection
//! whose membership changes is the job of the collections crate's live
//! aggregate, which re-reads membership on every recomputation.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::broadcast::{Broadcast, Notifier, Source};
use crate::registry::Subscription;

struct CombineState<T, R> {
    latest: Vec<Option<T>>,
    missing: usize,
    current: Option<R>,
}

struct CombineInner<T, R> {
    state: RefCell<CombineState<T, R>>,
    combine: Box<dyn Fn(&[T]) -> R>,
    output: Broadcast<R>,
}

impl<T: Clone + 'static, R: Clone + 'static> CombineInner<T, R> {
    fn accept(&self, slot: usize, value: &T) {
        let result = {
            let mut state = self.state.borrow_mut();
            if state.latest[slot].replace(value.clone()).is_none() {
                state.missing -= 1;
            }
            if state.missing > 0 {
                return;
            }
            let values: Vec<T> = state.latest.iter().flatten().cloned().collect();
            drop(state);
            (self.combine)(&values)
        };
        self.publish(result);
    }

    fn publish(&self, result: R) {
        self.state.borrow_mut().current = Some(result.clone());
        self.output.emit(&result);
    }
}

/// Latest-value combination of a fixed list of sources.
///
/// Subscribers receive the most recent combined value on subscribe (once one
/// exists) and every recomputation after that. Dropping the last handle
/// detaches from all inputs.
pub struct CombineLatest<T, R> {
    inner: Rc<CombineInner<T, R>>,
    _inputs: Rc<Vec<Subscription>>,
}

impl<T, R> Clone for CombineLatest<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
            _inputs: Rc::clone(&self._inputs),
        }
    }
}

impl<T: Clone + 'static, R: Clone + 'static> CombineLatest<T, R> {
    /// Combine `sources` with `combine`, called with the latest value of each
    /// source in the order given.
    ///
    /// With no sources the combination is computed once, immediately, over
    /// an empty slice.
    pub fn new<I, S>(sources: I, combine: impl Fn(&[T]) -> R + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Source<T>,
    {
        let sources: Vec<S> = sources.into_iter().collect();
        let inner = Rc::new(CombineInner {
            state: RefCell::new(CombineState {
                latest: vec![None; sources.len()],
                missing: sources.len(),
                current: None,
            }),
            combine: Box::new(combine),
            output: Broadcast::new(),
        });

        if sources.is_empty() {
            let result = (inner.combine)(&[]);
            inner.publish(result);
        }

        let subscriptions = sources
            .iter()
            .enumerate()
            .map(|(slot, source)| {
                let weak = Rc::downgrade(&inner);
                source.observe(Rc::new(move |value: &T| {
                    if let Some(inner) = weak.upgrade() {
                        inner.accept(slot, value);
                    }
                }))
            })
            .collect();

        Self {
            inner,
            _inputs: Rc::new(subscriptions),
        }
    }

    /// The most recent combined value, `None` until every input has emitted.
    #[must_use]
    pub fn latest(&self) -> Option<R> {
        self.inner.state.borrow().current.clone()
    }

    pub fn subscribe(&self, observer: impl Fn(&R) + 'static) -> Subscription {
        self.observe(Rc::new(observer))
    }
}

impl<T: Clone + 'static, R: Clone + 'static> Source<R> for CombineLatest<T, R> {
    fn observe(&self, observer: Rc<dyn Fn(&R)>) -> Subscription {
        let subscription = self.inner.output.observe(Rc::clone(&observer));
        if let Some(current) = self.latest() {
            observer(&current);
        }
        subscription
    }
}

impl<T: 'static, R: 'static> Notifier for CombineLatest<T, R> {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.inner.output.notify_on_change(on_change)
    }
}

impl<T, R: fmt::Debug> fmt::Debug for CombineLatest<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("CombineLatest")
            .field("inputs", &state.latest.len())
            .field("missing", &state.missing)
            .field("current", &state.current)
            .finish()
    }
}

/// `true` when the latest value of every source is `true`.
pub fn all_true<I, S>(sources: I) -> CombineLatest<bool, bool>
where
    I: IntoIterator<Item = S>,
    S: Source<bool>,
{
    CombineLatest::new(sources, |values| values.iter().all(|v| *v))
}

/// `true` when the latest value of every source is `false`.
pub fn all_false<I, S>(sources: I) -> CombineLatest<bool, bool>
where
    I: IntoIterator<Item = S>,
    S: Source<bool>,
{
    CombineLatest::new(sources, |values| values.iter().all(|v| !*v))
}
