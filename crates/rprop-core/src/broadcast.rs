#![forbid(unsafe_code)]

//! Stateless multicast streams and the traits shared by every observable.
//!
//! - [`Source<T>`]: anything that delivers `&T` values to observers.
//! - [`Notifier`]: type-erased "something changed" signal, used where only
//!   the fact of a change matters (filtered views, aggregates).
//! - [`Broadcast<T>`]: a hot multicast stream with no current value.
//! - [`merge`]: fold several notifiers into one unit stream.

use std::rc::Rc;

use crate::registry::{SubscriberList, Subscription};

/// A push-based stream of `T` values.
pub trait Source<T: ?Sized> {
    /// Attach `observer`. Whether it is called synchronously with a current
    /// value before this returns depends on the implementor.
    fn observe(&self, observer: Rc<dyn Fn(&T)>) -> Subscription;
}

impl<T: ?Sized, S: Source<T> + ?Sized> Source<T> for &S {
    fn observe(&self, observer: Rc<dyn Fn(&T)>) -> Subscription {
        (**self).observe(observer)
    }
}

impl<T: ?Sized, S: Source<T> + ?Sized> Source<T> for Box<S> {
    fn observe(&self, observer: Rc<dyn Fn(&T)>) -> Subscription {
        (**self).observe(observer)
    }
}

/// A change signal without a payload.
///
/// Implementations never replay a current value: `on_change` fires only for
/// changes that happen after the call.
pub trait Notifier {
    /// Call `on_change` after every subsequent change.
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription;
}

impl<N: Notifier + ?Sized> Notifier for &N {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        (**self).notify_on_change(on_change)
    }
}

impl<N: Notifier + ?Sized> Notifier for Box<N> {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        (**self).notify_on_change(on_change)
    }
}

/// A hot multicast stream.
///
/// Values are delivered synchronously to the subscribers attached at the
/// time of [`emit`](Broadcast::emit); nothing is buffered or replayed.
/// Cloning yields another handle to the same stream.
pub struct Broadcast<T: ?Sized> {
    subscribers: Rc<SubscriberList<T>>,
}

impl<T: ?Sized> Clone for Broadcast<T> {
    fn clone(&self) -> Self {
        Self {
            subscribers: Rc::clone(&self.subscribers),
        }
    }
}

impl<T: ?Sized + 'static> Default for Broadcast<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized + 'static> Broadcast<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: SubscriberList::new(),
        }
    }

    /// Deliver `value` to all current subscribers, in subscription order.
    pub fn emit(&self, value: &T) {
        self.subscribers.notify(value);
    }

    pub fn subscribe(&self, observer: impl Fn(&T) + 'static) -> Subscription {
        self.subscribers.subscribe(Rc::new(observer))
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Detach all subscribers. Later emits and subscribes are no-ops.
    pub fn dispose(&self) {
        self.subscribers.close();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.subscribers.is_closed()
    }
}

impl<T: ?Sized + 'static> Source<T> for Broadcast<T> {
    fn observe(&self, observer: Rc<dyn Fn(&T)>) -> Subscription {
        self.subscribers.subscribe(observer)
    }
}

impl<T: ?Sized + 'static> Notifier for Broadcast<T> {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.subscribers.subscribe(Rc::new(move |_: &T| on_change()))
    }
}

impl<T: ?Sized + 'static> std::fmt::Debug for Broadcast<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcast")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Unit stream firing whenever any of its inputs fires.
///
/// Dropping the `Merged` detaches it from all inputs.
pub struct Merged {
    output: Broadcast<()>,
    _inputs: Vec<Subscription>,
}

/// Merge several change signals into one.
///
/// The inputs are observed in the order given; a change on any of them is
/// forwarded as one `()` emission.
pub fn merge<I, N>(inputs: I) -> Merged
where
    I: IntoIterator<Item = N>,
    N: Notifier,
{
    let output = Broadcast::new();
    let subscriptions = inputs
        .into_iter()
        .map(|input| {
            let output = output.clone();
            input.notify_on_change(Rc::new(move || output.emit(&())))
        })
        .collect();
    Merged {
        output,
        _inputs: subscriptions,
    }
}

impl Merged {
    pub fn subscribe(&self, observer: impl Fn(&()) + 'static) -> Subscription {
        self.output.subscribe(observer)
    }
}

impl Source<()> for Merged {
    fn observe(&self, observer: Rc<dyn Fn(&())>) -> Subscription {
        self.output.observe(observer)
    }
}

impl Notifier for Merged {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.output.notify_on_change(on_change)
    }
}
