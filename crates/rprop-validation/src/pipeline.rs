#![forbid(unsafe_code)]

//! Validated value cells.
//!
//! A [`ValidatedCell<T>`] owns a [`ValueCell<T>`] and re-runs its validators
//! on every accepted change of that cell, on [`force_notify`] and on
//! [`force_validate`]. Validators run in registration order:
//!
//! - sync validators and rule sets run inline, on the writer's stack;
//! - async validators are spawned on a `LocalSpawn` executor and never block
//!   the write. An optional debounce window delays the call until the value
//!   has been quiet for that long.
//!
//! Each validator keeps its own latest outcome. The published error set is
//! derived from those outcomes: the first failing validator's messages by
//! default, or every failing validator's messages with
//! [`ErrorAggregation::All`]. An async validator that is still running keeps
//! its previous outcome.
//!
//! # Invariants
//!
//! 1. Every pass bumps a generation counter. An async outcome is applied only
//!    if no pass has started since its own; otherwise it is dropped.
//! 2. `has_errors()` is true iff the published error set is non-empty.
//! 3. The error stream fires only when the published set changes.
//! 4. With `ignore_initial_error`, outcomes are computed but nothing is
//!    published until the first write, forced notification or forced
//!    validation.
//!
//! [`force_notify`]: ValidatedCell::force_notify
//! [`force_validate`]: ValidatedCell::force_validate

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::FutureExt;
use futures::future::LocalBoxFuture;
use futures::task::{LocalSpawn, LocalSpawnExt};
use rprop_core::{
    CellMode, Debouncer, Duration, Notifier, ReadOnlyCell, Scheduler, Source, Subscription,
    ValueCell,
};

use crate::error::{BuildError, ValidationErrors};
use crate::rules::{RuleSet, RuleValue};

type SyncCheck<T> = Box<dyn Fn(&str, &T) -> Vec<String>>;
type AsyncCheck<T> = Rc<dyn Fn(T) -> LocalBoxFuture<'static, Option<String>>>;

/// How outcomes of several validators become one error set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorAggregation {
    /// Messages of the first failing validator in registration order.
    #[default]
    FirstError,
    /// Messages of every failing validator, in registration order.
    All,
}

enum ValidatorConfig<T> {
    Sync(SyncCheck<T>),
    Async {
        check: AsyncCheck<T>,
        debounce: Option<Duration>,
    },
}

enum Validator<T> {
    Sync(SyncCheck<T>),
    Async {
        check: AsyncCheck<T>,
        debouncer: Option<Debouncer>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassKind {
    Initial,
    Changed,
    Forced,
}

struct PassState {
    /// Latest outcome per validator; `None` until it first completes.
    outcomes: Vec<Option<Vec<String>>>,
    generation: u64,
    suppress_initial: bool,
}

struct ValidatedInner<T> {
    value: ValueCell<T>,
    member: String,
    validators: Vec<Validator<T>>,
    aggregation: ErrorAggregation,
    spawner: Option<Rc<dyn LocalSpawn>>,
    state: RefCell<PassState>,
    errors: ValueCell<Option<ValidationErrors>>,
    has_errors: ValueCell<bool>,
    value_watch: RefCell<Option<Subscription>>,
}

impl<T: Clone + 'static> ValidatedInner<T> {
    fn run_pass(self: &Rc<Self>, kind: PassKind) {
        if self.value.is_disposed() {
            return;
        }
        let value = self.value.get();
        let generation = {
            let mut state = self.state.borrow_mut();
            state.generation += 1;
            if kind != PassKind::Initial {
                state.suppress_initial = false;
            }
            state.generation
        };
        for (slot, validator) in self.validators.iter().enumerate() {
            match validator {
                Validator::Sync(check) => {
                    let messages = check(&self.member, &value);
                    self.state.borrow_mut().outcomes[slot] = Some(messages);
                }
                Validator::Async { check, debouncer } => {
                    self.dispatch_async(slot, check, debouncer.as_ref(), value.clone(), generation);
                }
            }
        }
        self.publish();
    }

    fn dispatch_async(
        self: &Rc<Self>,
        slot: usize,
        check: &AsyncCheck<T>,
        debouncer: Option<&Debouncer>,
        value: T,
        generation: u64,
    ) {
        let weak = Rc::downgrade(self);
        let check = Rc::clone(check);
        let start = move || {
            if let Some(inner) = weak.upgrade() {
                inner.spawn_check(slot, check(value), generation);
            }
        };
        match debouncer {
            Some(debouncer) => debouncer.trigger(start),
            None => start(),
        }
    }

    fn spawn_check(
        self: &Rc<Self>,
        slot: usize,
        pending: LocalBoxFuture<'static, Option<String>>,
        generation: u64,
    ) {
        let Some(spawner) = &self.spawner else {
            return;
        };
        let weak = Rc::downgrade(self);
        let task = async move {
            let outcome = pending.await;
            if let Some(inner) = weak.upgrade() {
                inner.complete_async(slot, generation, outcome);
            }
        };
        if let Err(err) = spawner.spawn_local(task) {
            tracing::warn!(message = "validation.spawn_failed", slot, error = %err);
        }
    }

    fn complete_async(&self, slot: usize, generation: u64, outcome: Option<String>) {
        {
            let mut state = self.state.borrow_mut();
            if state.generation != generation || self.value.is_disposed() {
                tracing::trace!(
                    message = "validation.stale_result",
                    slot,
                    generation,
                    current = state.generation
                );
                return;
            }
            state.outcomes[slot] = Some(outcome.into_iter().collect());
        }
        self.publish();
    }

    fn publish(&self) {
        let errors = {
            let state = self.state.borrow();
            if state.suppress_initial {
                return;
            }
            let mut failing = state
                .outcomes
                .iter()
                .flatten()
                .filter(|messages| !messages.is_empty());
            let messages = match self.aggregation {
                ErrorAggregation::FirstError => failing.next().cloned().unwrap_or_default(),
                ErrorAggregation::All => failing.flat_map(|m| m.iter().cloned()).collect(),
            };
            ValidationErrors::from_messages(messages)
        };
        let error_count = errors.as_ref().map_or(0, ValidationErrors::len);
        if self.errors.set(errors) {
            tracing::debug!(
                message = "validation.errors_changed",
                member = %self.member,
                error_count
            );
        }
        self.has_errors.set(error_count > 0);
    }
}

/// A value cell with an attached validation pipeline.
///
/// Cloning yields another handle to the same cell and pipeline.
pub struct ValidatedCell<T> {
    inner: Rc<ValidatedInner<T>>,
}

impl<T> Clone for ValidatedCell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + Clone + 'static> fmt::Debug for ValidatedCell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedCell")
            .field("member", &self.inner.member)
            .field("value", &self.inner.value)
            .field("errors", &self.inner.errors.get())
            .finish()
    }
}

impl<T: Clone + PartialEq + 'static> ValidatedCell<T> {
    /// Start configuring a validated cell holding `initial`.
    pub fn builder(initial: T) -> ValidatedCellBuilder<T> {
        ValidatedCellBuilder::new(initial)
    }
}

impl<T: Clone + 'static> ValidatedCell<T> {
    #[must_use]
    pub fn get(&self) -> T {
        self.inner.value.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.value.with(f)
    }

    /// Write through to the underlying cell; accepted writes re-validate.
    pub fn set(&self, value: T) -> bool {
        self.inner.value.set(value)
    }

    /// Subscribe to the value itself.
    pub fn subscribe(&self, observer: impl Fn(&T) + 'static) -> Subscription {
        self.inner.value.subscribe(observer)
    }

    /// The underlying cell. Writes through it are validated too.
    #[must_use]
    pub fn cell(&self) -> &ValueCell<T> {
        &self.inner.value
    }

    #[must_use]
    pub fn member(&self) -> &str {
        &self.inner.member
    }

    /// Re-deliver the value to subscribers, which also re-validates.
    pub fn force_notify(&self) {
        self.inner.value.force_notify();
    }

    /// Re-run every validator against the current value.
    pub fn force_validate(&self) {
        self.inner.run_pass(PassKind::Forced);
    }

    /// Currently published errors.
    #[must_use]
    pub fn errors(&self) -> Option<ValidationErrors> {
        self.inner.errors.get()
    }

    /// Currently published messages for `member`.
    ///
    /// A single cell has one aggregate, so every member name yields it;
    /// [`ValidationGroup`](crate::ValidationGroup) resolves names across cells.
    #[must_use]
    pub fn errors_for(&self, _member: &str) -> Vec<String> {
        self.errors().map(ValidationErrors::into_vec).unwrap_or_default()
    }

    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.inner.errors.with(Option::is_some)
    }

    /// Observe changes of the published error set.
    ///
    /// If the value cell replays on subscribe, so does this stream.
    pub fn observe_errors(
        &self,
        observer: impl Fn(&Option<ValidationErrors>) + 'static,
    ) -> Subscription {
        self.inner.errors.subscribe(observer)
    }

    /// The error set as a read-only cell.
    #[must_use]
    pub fn error_cell(&self) -> ReadOnlyCell<Option<ValidationErrors>> {
        let errors = &self.inner.errors;
        ReadOnlyCell::from_source(errors, errors.get(), errors.mode())
    }

    /// `has_errors` as a read-only cell, replaying on subscribe.
    #[must_use]
    pub fn observe_has_errors(&self) -> ReadOnlyCell<bool> {
        let flag = &self.inner.has_errors;
        ReadOnlyCell::from_source(flag, flag.get(), CellMode::default())
    }

    /// Tear down the cell, its error streams and pending debounced checks.
    /// Outstanding async checks complete into the void. Idempotent.
    pub fn dispose(&self) {
        let watch = self.inner.value_watch.borrow_mut().take();
        drop(watch);
        for validator in &self.inner.validators {
            if let Validator::Async {
                debouncer: Some(debouncer),
                ..
            } = validator
            {
                debouncer.cancel();
            }
        }
        self.inner.value.dispose();
        self.inner.errors.dispose();
        self.inner.has_errors.dispose();
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.inner.value.is_disposed()
    }

    pub(crate) fn has_errors_cell(&self) -> ValueCell<bool> {
        self.inner.has_errors.clone()
    }
}

impl<T: Clone + 'static> Source<T> for ValidatedCell<T> {
    fn observe(&self, observer: Rc<dyn Fn(&T)>) -> Subscription {
        self.inner.value.observe(observer)
    }
}

impl<T: Clone + 'static> Notifier for ValidatedCell<T> {
    fn notify_on_change(&self, on_change: Rc<dyn Fn()>) -> Subscription {
        self.inner.value.notify_on_change(on_change)
    }
}

/// Configuration for a [`ValidatedCell`].
pub struct ValidatedCellBuilder<T> {
    initial: T,
    mode: CellMode,
    equality: Option<Box<dyn Fn(&T, &T) -> bool>>,
    member: String,
    ignore_initial_error: bool,
    aggregation: ErrorAggregation,
    spawner: Option<Rc<dyn LocalSpawn>>,
    scheduler: Option<Rc<dyn Scheduler>>,
    validators: Vec<ValidatorConfig<T>>,
}

impl<T: Clone + PartialEq + 'static> ValidatedCellBuilder<T> {
    fn new(initial: T) -> Self {
        Self {
            initial,
            mode: CellMode::default(),
            equality: None,
            member: String::from("Value"),
            ignore_initial_error: false,
            aggregation: ErrorAggregation::default(),
            spawner: None,
            scheduler: None,
            validators: Vec::new(),
        }
    }

    #[must_use]
    pub fn mode(mut self, mode: CellMode) -> Self {
        self.mode = mode;
        self
    }

    /// Compare values with `equality` instead of `PartialEq`.
    #[must_use]
    pub fn equality(mut self, equality: impl Fn(&T, &T) -> bool + 'static) -> Self {
        self.equality = Some(Box::new(equality));
        self
    }

    /// Name used by rule messages and validation groups.
    #[must_use]
    pub fn member(mut self, name: impl Into<String>) -> Self {
        self.member = name.into();
        self
    }

    /// Hold back the first outcome until a write or forced pass.
    #[must_use]
    pub fn ignore_initial_error(mut self, ignore: bool) -> Self {
        self.ignore_initial_error = ignore;
        self
    }

    #[must_use]
    pub fn aggregation(mut self, aggregation: ErrorAggregation) -> Self {
        self.aggregation = aggregation;
        self
    }

    /// Executor for async validators.
    #[must_use]
    pub fn spawner(mut self, spawner: Rc<dyn LocalSpawn>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    /// Time source for debounced validators.
    #[must_use]
    pub fn scheduler(mut self, scheduler: Rc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Attach a synchronous validator returning a message on failure.
    #[must_use]
    pub fn attach_sync<M: Into<String>>(
        mut self,
        validate: impl Fn(&T) -> Option<M> + 'static,
    ) -> Self {
        self.validators.push(ValidatorConfig::Sync(Box::new(move |_, value| {
            validate(value).map(Into::into).into_iter().collect()
        })));
        self
    }

    /// Attach declarative rules; every failing rule contributes a message.
    #[must_use]
    pub fn attach_rules(mut self, rules: RuleSet) -> Self
    where
        T: RuleValue,
    {
        self.validators.push(ValidatorConfig::Sync(Box::new(move |member, value| {
            rules.check(member, value)
        })));
        self
    }

    /// Attach an asynchronous validator, started on every pass.
    #[must_use]
    pub fn attach_async<F, Fut>(self, validate: F) -> Self
    where
        F: Fn(T) -> Fut + 'static,
        Fut: Future<Output = Option<String>> + 'static,
    {
        self.push_async(validate, None)
    }

    /// Attach an asynchronous validator that starts only after the value has
    /// been quiet for `window`.
    #[must_use]
    pub fn attach_async_debounced<F, Fut>(self, validate: F, window: Duration) -> Self
    where
        F: Fn(T) -> Fut + 'static,
        Fut: Future<Output = Option<String>> + 'static,
    {
        self.push_async(validate, Some(window))
    }

    fn push_async<F, Fut>(mut self, validate: F, debounce: Option<Duration>) -> Self
    where
        F: Fn(T) -> Fut + 'static,
        Fut: Future<Output = Option<String>> + 'static,
    {
        let check: AsyncCheck<T> = Rc::new(move |value| validate(value).boxed_local());
        self.validators.push(ValidatorConfig::Async { check, debounce });
        self
    }

    /// Create the cell and run the initial validation pass.
    pub fn build(self) -> Result<ValidatedCell<T>, BuildError> {
        let mut validators = Vec::with_capacity(self.validators.len());
        for (index, config) in self.validators.into_iter().enumerate() {
            validators.push(match config {
                ValidatorConfig::Sync(check) => Validator::Sync(check),
                ValidatorConfig::Async { check, debounce } => {
                    if self.spawner.is_none() {
                        return Err(BuildError::MissingSpawner { index });
                    }
                    let debouncer = match debounce {
                        Some(window) => {
                            let scheduler = self
                                .scheduler
                                .clone()
                                .ok_or(BuildError::MissingScheduler { index })?;
                            Some(Debouncer::new(scheduler, window))
                        }
                        None => None,
                    };
                    Validator::Async { check, debouncer }
                }
            });
        }

        let value = match self.equality {
            Some(equality) => ValueCell::with_equality(self.initial, self.mode, equality),
            None => ValueCell::with_mode(self.initial, self.mode),
        };
        let error_mode = if self.mode.contains(CellMode::RAISE_LATEST_ON_SUBSCRIBE) {
            CellMode::default()
        } else {
            CellMode::DISTINCT_UNTIL_CHANGED
        };
        let inner = Rc::new(ValidatedInner {
            value,
            member: self.member,
            aggregation: self.aggregation,
            spawner: self.spawner,
            state: RefCell::new(PassState {
                outcomes: vec![None; validators.len()],
                generation: 0,
                suppress_initial: self.ignore_initial_error,
            }),
            validators,
            errors: ValueCell::with_mode(None, error_mode),
            has_errors: ValueCell::new(false),
            value_watch: RefCell::new(None),
        });

        let weak = Rc::downgrade(&inner);
        let watch = inner.value.notify_on_change(Rc::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.run_pass(PassKind::Changed);
            }
        }));
        *inner.value_watch.borrow_mut() = Some(watch);

        inner.run_pass(PassKind::Initial);
        Ok(ValidatedCell { inner })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
