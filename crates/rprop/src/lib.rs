#![forbid(unsafe_code)]

//! rprop public facade crate.
//!
//! Single-threaded reactive value cells with validation and observable
//! collections. The building blocks live in `rprop-core`; validation and
//! collections are behind the default `validation` and `collections`
//! features.

#[cfg(feature = "collections")]
pub use rprop_collections as collections;
#[cfg(feature = "validation")]
pub use rprop_validation as validation;

pub use rprop_core::{
    CellMode, ManualScheduler, ReadOnlyCell, Scheduler, Source, Subscription, ValueCell,
    WallClockScheduler,
};

pub mod prelude {
    pub use rprop_core as core;
    pub use rprop_core::{
        Broadcast, CellMode, CombineLatest, Debouncer, Duration, ManualScheduler, Notifier,
        ReadOnlyCell, Scheduler, Source, Subscription, ValueCell, WallClockScheduler, all_false,
        all_true, debounce, merge,
    };

    #[cfg(feature = "collections")]
    pub use rprop_collections::{
        CollectionChange, ElementObserver, FilteredView, LiveAggregate, ObservableVec,
    };

    #[cfg(feature = "validation")]
    pub use rprop_validation::{
        ErrorAggregation, Rule, RuleSet, ValidatedCell, ValidationErrors, ValidationGroup,
    };
}
