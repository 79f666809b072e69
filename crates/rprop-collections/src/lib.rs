#![forbid(unsafe_code)]

//! Observable collections for rprop.
//!
//! - [`ObservableVec`]: ordered collection emitting one [`CollectionChange`]
//!   per mutation.
//! - [`FilteredView`]: live, incrementally maintained subset in source order.
//! - [`ElementObserver`]: re-broadcasts changes *inside* elements.
//! - [`LiveAggregate`]: a value derived from the whole collection, optionally
//!   debounced.
//!
//! Like the rest of rprop, everything here is single-threaded and delivers
//! notifications synchronously on the mutating caller's stack.

pub mod aggregate;
pub mod element;
pub mod filtered;
pub mod vec;

pub use aggregate::LiveAggregate;
pub use element::{ElementObserver, WatchFn};
pub use filtered::FilteredView;
pub use vec::{CollectionChange, ObservableVec};
