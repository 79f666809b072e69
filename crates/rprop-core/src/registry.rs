#![forbid(unsafe_code)]

//! Ordered subscriber registry and the [`Subscription`] handle.
//!
//! # Design
//!
//! Subscribers live in a [`SlotMap`] arena threaded with an intrusive
//! doubly-linked list. The arena gives O(1) removal by key; the list keeps
//! delivery in subscription order. Removing one subscriber never moves or
//! reorders any other.
//!
//! # Invariants
//!
//! 1. Delivery order for a single notification equals subscription order.
//! 2. A subscriber removed before its turn in an in-flight notification pass
//!    is skipped for the rest of that pass.
//! 3. Subscribers added during a pass are not delivered until the next pass.
//! 4. The registry is never borrowed while a callback runs, so callbacks may
//!    freely subscribe, unsubscribe, or notify re-entrantly.
//!
//! # Failure Modes
//!
//! - **Subscriber panics**: the panic is caught, the remaining subscribers of
//!   the pass are still delivered, and the first panic is resumed once the
//!   pass completes. The registry is never left mid-mutation.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use slotmap::{SlotMap, new_key_type};

new_key_type! {
    /// Stable key of one registered subscriber.
    pub(crate) struct SubscriberKey;
}

struct Node<A: ?Sized> {
    callback: Rc<dyn Fn(&A)>,
    prev: Option<SubscriberKey>,
    next: Option<SubscriberKey>,
}

/// Arena of subscriber callbacks linked in subscription order.
struct Registry<A: ?Sized> {
    nodes: SlotMap<SubscriberKey, Node<A>>,
    head: Option<SubscriberKey>,
    tail: Option<SubscriberKey>,
}

impl<A: ?Sized> Registry<A> {
    fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            head: None,
            tail: None,
        }
    }

    fn push_back(&mut self, callback: Rc<dyn Fn(&A)>) -> SubscriberKey {
        let prev = self.tail;
        let key = self.nodes.insert(Node {
            callback,
            prev,
            next: None,
        });
        match prev {
            Some(prev) => self.nodes[prev].next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        key
    }

    fn remove(&mut self, key: SubscriberKey) -> Option<Rc<dyn Fn(&A)>> {
        let node = self.nodes.remove(key)?;
        match node.prev {
            Some(prev) => self.nodes[prev].next = node.next,
            None => self.head = node.next,
        }
        match node.next {
            Some(next) => self.nodes[next].prev = node.prev,
            None => self.tail = node.prev,
        }
        Some(node.callback)
    }

    fn snapshot(&self) -> Vec<(SubscriberKey, Rc<dyn Fn(&A)>)> {
        let mut out = Vec::with_capacity(self.nodes.len());
        let mut cursor = self.head;
        while let Some(key) = cursor {
            let node = &self.nodes[key];
            out.push((key, Rc::clone(&node.callback)));
            cursor = node.next;
        }
        out
    }

    fn take_all(&mut self) -> SlotMap<SubscriberKey, Node<A>> {
        self.head = None;
        self.tail = None;
        std::mem::replace(&mut self.nodes, SlotMap::with_key())
    }
}

/// Shared, closable list of subscribers receiving `&A`.
///
/// This is the fan-out primitive underneath every observable type in the
/// crate. It is always held behind an `Rc` so that [`Subscription`] handles
/// can refer back to it weakly.
pub(crate) struct SubscriberList<A: ?Sized> {
    registry: RefCell<Registry<A>>,
    closed: Cell<bool>,
}

impl<A: ?Sized + 'static> SubscriberList<A> {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(Self {
            registry: RefCell::new(Registry::new()),
            closed: Cell::new(false),
        })
    }

    /// Register `callback` at the end of the delivery order.
    ///
    /// A closed list accepts nothing and returns an inert handle.
    pub(crate) fn subscribe(self: &Rc<Self>, callback: Rc<dyn Fn(&A)>) -> Subscription {
        if self.closed.get() {
            return Subscription::empty();
        }
        let key = self.registry.borrow_mut().push_back(callback);
        let weak: Weak<Self> = Rc::downgrade(self);
        Subscription::new(move || {
            if let Some(list) = weak.upgrade() {
                // Callbacks are dropped outside the borrow; they may own
                // subscriptions of their own.
                let removed = list.registry.borrow_mut().remove(key);
                drop(removed);
            }
        })
    }

    /// Deliver `value` to every current subscriber in subscription order.
    pub(crate) fn notify(&self, value: &A) {
        if self.closed.get() {
            return;
        }
        let snapshot = self.registry.borrow().snapshot();
        let mut first_panic: Option<Box<dyn Any + Send>> = None;
        for (key, callback) in snapshot {
            if !self.registry.borrow().nodes.contains_key(key) {
                continue;
            }
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(value))) {
                tracing::warn!(message = "cell.subscriber_panicked");
                first_panic.get_or_insert(payload);
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
    }

    /// Detach every subscriber and refuse further subscriptions.
    ///
    /// Returns the number of subscribers that were detached.
    pub(crate) fn close(&self) -> usize {
        self.closed.set(true);
        let detached = self.registry.borrow_mut().take_all();
        detached.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.get()
    }

    pub(crate) fn len(&self) -> usize {
        self.registry.borrow().nodes.len()
    }
}

/// Handle to one active subscription.
///
/// Dropping the handle unsubscribes. [`dispose`](Subscription::dispose) does
/// the same explicitly and is idempotent; [`detach`](Subscription::detach)
/// keeps the subscriber registered for the lifetime of its source.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    unsubscribe: Option<Box<dyn FnOnce()>>,
}

impl Subscription {
    /// Wrap an arbitrary teardown action.
    pub fn new(unsubscribe: impl FnOnce() + 'static) -> Self {
        Self {
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A handle that is already disposed.
    ///
    /// Returned when subscribing to a disposed source.
    pub fn empty() -> Self {
        Self { unsubscribe: None }
    }

    /// Remove the subscriber from its source. Safe to call repeatedly.
    pub fn dispose(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }

    /// Whether the subscriber may still receive notifications.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.unsubscribe.is_some()
    }

    /// Give up the handle without unsubscribing.
    pub fn detach(mut self) {
        self.unsubscribe = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
