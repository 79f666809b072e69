#![forbid(unsafe_code)]

//! Todo list model.
//!
//! A small end-to-end model over rprop: items are pairs of cells, the list is
//! an [`ObservableVec`], the active and completed lists are [`FilteredView`]s
//! that watch each item's `done` cell, and "everything is completed" is a
//! debounced [`LiveAggregate`].

use std::fmt;
use std::rc::Rc;

use rprop_collections::{FilteredView, LiveAggregate, ObservableVec};
use rprop_core::{Duration, Notifier, ReadOnlyCell, Scheduler, ValueCell};

/// One todo entry. Cloning yields a handle to the same entry.
#[derive(Clone)]
pub struct TodoItem {
    pub title: ValueCell<String>,
    pub done: ValueCell<bool>,
}

impl TodoItem {
    #[must_use]
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: ValueCell::new(title.into()),
            done: ValueCell::new(false),
        }
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done.get()
    }
}

impl fmt::Debug for TodoItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TodoItem")
            .field("title", &self.title.get())
            .field("done", &self.done.get())
            .finish()
    }
}

fn watch_done(item: &TodoItem) -> Vec<Box<dyn Notifier>> {
    vec![Box::new(item.done.clone())]
}

fn all_done(items: &[TodoItem]) -> bool {
    !items.is_empty() && items.iter().all(TodoItem::is_done)
}

/// Tunables for [`TodoApp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TodoConfig {
    /// Quiet period before `all_completed` is recomputed.
    pub completion_window: Duration,
}

impl Default for TodoConfig {
    fn default() -> Self {
        Self {
            completion_window: Duration::from_millis(10),
        }
    }
}

/// The todo list with its derived views.
pub struct TodoApp {
    items: ObservableVec<TodoItem>,
    active: FilteredView<TodoItem>,
    completed: FilteredView<TodoItem>,
    all_completed: LiveAggregate<TodoItem, bool>,
}

impl TodoApp {
    /// Create an empty list using the default configuration.
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self::with_config(scheduler, TodoConfig::default())
    }

    pub fn with_config(scheduler: Rc<dyn Scheduler>, config: TodoConfig) -> Self {
        let items = ObservableVec::new();
        let active = FilteredView::with_watch(&items, |i: &TodoItem| !i.is_done(), watch_done);
        let completed = FilteredView::with_watch(&items, TodoItem::is_done, watch_done);
        let all_completed = LiveAggregate::debounced(
            &items,
            watch_done,
            all_done,
            config.completion_window,
            scheduler,
        );
        Self {
            items,
            active,
            completed,
            all_completed,
        }
    }

    pub fn add_item(&self, item: TodoItem) {
        tracing::debug!(message = "todo.add", title = %item.title.get());
        self.items.push(item);
    }

    /// Mark every item done, or, if all already are, mark every item active.
    pub fn check_all(&self) {
        let target = self.items.with(|items| items.iter().any(|i| !i.is_done()));
        for item in self.items.to_vec() {
            item.done.set(target);
        }
        tracing::debug!(message = "todo.check_all", done = target);
    }

    /// Remove every completed item. Returns how many were removed.
    pub fn clear_completed(&self) -> usize {
        let removed = self.items.retain(|i| !i.is_done());
        tracing::debug!(message = "todo.clear_completed", removed);
        removed
    }

    #[must_use]
    pub fn all_items(&self) -> &ObservableVec<TodoItem> {
        &self.items
    }

    #[must_use]
    pub fn active_items(&self) -> &FilteredView<TodoItem> {
        &self.active
    }

    #[must_use]
    pub fn completed_items(&self) -> &FilteredView<TodoItem> {
        &self.completed
    }

    /// `true` once the list is non-empty and every item is done, settled
    /// after the configured window.
    #[must_use]
    pub fn all_completed(&self) -> ReadOnlyCell<bool> {
        self.all_completed.read_only()
    }

    #[must_use]
    pub fn is_all_completed(&self) -> bool {
        self.all_completed.get()
    }

    /// Detach the derived views and the aggregate from the item list.
    pub fn dispose(&self) {
        self.active.dispose();
        self.completed.dispose();
        self.all_completed.dispose();
    }
}

impl fmt::Debug for TodoApp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TodoApp")
            .field("items", &self.items.len())
            .field("active", &self.active.len())
            .field("completed", &self.completed.len())
            .field("all_completed", &self.all_completed.get())
            .finish()
    }
}
