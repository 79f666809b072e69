#![forbid(unsafe_code)]

//! Named groups of validated cells.
//!
//! A [`ValidationGroup`] answers form-level questions: which member has which
//! errors, whether anything is invalid, and a live "all valid" stream built
//! from every member's `has_errors` cell.

use std::fmt;

use rprop_core::{CombineLatest, ValueCell, all_false};

use crate::error::ValidationErrors;
use crate::pipeline::ValidatedCell;

trait GroupMember {
    fn name(&self) -> &str;
    fn errors(&self) -> Option<ValidationErrors>;
    fn has_errors_cell(&self) -> ValueCell<bool>;
    fn force_validate(&self);
}

impl<T: Clone + 'static> GroupMember for ValidatedCell<T> {
    fn name(&self) -> &str {
        self.member()
    }

    fn errors(&self) -> Option<ValidationErrors> {
        ValidatedCell::errors(self)
    }

    fn has_errors_cell(&self) -> ValueCell<bool> {
        ValidatedCell::has_errors_cell(self)
    }

    fn force_validate(&self) {
        ValidatedCell::force_validate(self);
    }
}

/// Validated cells addressed by member name.
#[derive(Default)]
pub struct ValidationGroup {
    members: Vec<Box<dyn GroupMember>>,
}

impl ValidationGroup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `cell` under its member name. A later cell with the same name
    /// shadows the earlier one for [`errors`](Self::errors).
    pub fn register<T: Clone + 'static>(&mut self, cell: &ValidatedCell<T>) {
        self.members.push(Box::new(cell.clone()));
    }

    #[must_use]
    pub fn with<T: Clone + 'static>(mut self, cell: &ValidatedCell<T>) -> Self {
        self.register(cell);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Messages currently published for `member`; empty for unknown names.
    #[must_use]
    pub fn errors(&self, member: &str) -> Vec<String> {
        self.members
            .iter()
            .rev()
            .find(|m| m.name() == member)
            .and_then(|m| m.errors())
            .map(ValidationErrors::into_vec)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.members.iter().any(|m| m.errors().is_some())
    }

    /// Names of members with errors, in registration order.
    #[must_use]
    pub fn invalid_members(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.errors().is_some())
            .map(|m| m.name())
            .collect()
    }

    pub fn force_validate(&self) {
        for member in &self.members {
            member.force_validate();
        }
    }

    /// Live `true` while no current member has errors.
    ///
    /// Membership is fixed at call time; register first, then observe.
    #[must_use]
    pub fn observe_is_valid(&self) -> CombineLatest<bool, bool> {
        all_false(self.members.iter().map(|m| m.has_errors_cell()))
    }

    /// Live `true` while any current member has errors.
    #[must_use]
    pub fn observe_has_errors(&self) -> CombineLatest<bool, bool> {
        CombineLatest::new(
            self.members.iter().map(|m| m.has_errors_cell()),
            |flags: &[bool]| flags.iter().any(|f| *f),
        )
    }
}

impl fmt::Debug for ValidationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.members.iter().map(|m| m.name()))
            .finish()
    }
}
