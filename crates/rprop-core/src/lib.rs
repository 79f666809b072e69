#![forbid(unsafe_code)]

//! Core reactive primitives for rprop.
//!
//! - [`ValueCell`]: a mutable slot that broadcasts accepted writes, with a
//!   [`CellMode`] selecting distinct filtering and replay-on-subscribe.
//! - [`Subscription`]: handle that unsubscribes on dispose or drop.
//! - [`Broadcast`]: stateless multicast stream.
//! - [`Scheduler`]: injectable time source ([`ManualScheduler`] for virtual
//!   time, [`WallClockScheduler`] for event loops).
//! - [`Debouncer`] / [`debounce`]: trailing-edge coalescing.
//! - [`CombineLatest`], [`all_true`], [`all_false`]: latest-value combinators.
//!
//! # Architecture
//!
//! Everything is single-threaded and synchronous: `Rc<RefCell<..>>` for
//! shared state, callbacks run on the writer's stack, nested writes are
//! delivered depth-first. Only schedulers introduce delay.

pub mod broadcast;
pub mod cell;
pub mod combine;
pub mod debounce;
mod registry;
pub mod scheduler;

pub use broadcast::{Broadcast, Merged, Notifier, Source, merge};
pub use cell::{CellMode, ReadOnlyCell, ValueCell, WeakValueCell};
pub use combine::{CombineLatest, all_false, all_true};
pub use debounce::{Debounced, Debouncer, debounce};
pub use registry::Subscription;
pub use scheduler::{ManualScheduler, Scheduler, TimerId, WallClockScheduler};
pub use web_time::Duration;
