#![forbid(unsafe_code)]

//! Validation for rprop value cells.
//!
//! - [`ValidatedCell`] pairs a [`ValueCell`](rprop_core::ValueCell) with an
//!   ordered validator pipeline: closures, declarative [`RuleSet`]s, and
//!   async validators with optional debounce.
//! - [`ValidationErrors`] is the published error set; `None` means valid.
//! - [`ValidationGroup`] looks errors up by member name across cells.
//!
//! Async validators need a `futures` [`LocalSpawn`](futures::task::LocalSpawn)
//! executor; debounced ones also need a [`Scheduler`](rprop_core::Scheduler).
//! Missing either is reported by [`ValidatedCellBuilder::build`].

pub mod error;
pub mod group;
pub mod pipeline;
pub mod rules;

pub use error::{BuildError, RuleError, ValidationErrors};
pub use group::ValidationGroup;
pub use pipeline::{ErrorAggregation, ValidatedCell, ValidatedCellBuilder};
pub use rules::{Rule, RuleSet, RuleValue};
