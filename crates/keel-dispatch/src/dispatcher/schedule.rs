//! Time-ordered index of deferred and cyclic tasks
//!
//! Entries are keyed by `(due, id)`, so iteration follows due time and ties
//! break by id (submission order). A side map from id to due time makes
//! cancellation a keyed removal instead of a scan.

use crate::dispatcher::{Task, TaskId};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Scheduled tasks owned by the dispatch thread
#[derive(Debug, Default)]
pub struct ScheduleIndex {
    /// Tasks ordered by due time, then id
    by_due: BTreeMap<(Instant, TaskId), Task>,

    /// Due time of every indexed task, by id
    keys: FxHashMap<TaskId, Instant>,
}

impl ScheduleIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task; an entry with the same id is replaced
    pub fn insert(&mut self, task: Task) {
        let id = task.id();
        let due = task.due();
        if let Some(previous) = self.keys.insert(id, due) {
            self.by_due.remove(&(previous, id));
        }
        self.by_due.insert((due, id), task);
    }

    /// Remove a task by id, returning it if it was indexed
    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        let due = self.keys.remove(&id)?;
        self.by_due.remove(&(due, id))
    }

    /// Drop a task by id. Returns whether anything was removed.
    pub fn cancel(&mut self, id: TaskId) -> bool {
        self.remove(id).is_some()
    }

    /// Take the earliest task if it is due at `now`
    pub fn pop_due(&mut self, now: Instant) -> Option<Task> {
        let entry = self.by_due.first_entry()?;
        if entry.key().0 > now {
            return None;
        }
        let task = entry.remove();
        self.keys.remove(&task.id());
        Some(task)
    }

    /// Due time of the earliest task
    pub fn next_due(&self) -> Option<Instant> {
        self.by_due.keys().next().map(|(due, _)| *due)
    }

    /// Time left until the earliest task is due.
    ///
    /// `Some(ZERO)` if it is already due, `None` if the index is empty.
    pub fn time_until_next(&self, now: Instant) -> Option<Duration> {
        self.next_due().map(|due| due.saturating_duration_since(now))
    }

    /// Whether a task with this id is indexed
    pub fn contains(&self, id: TaskId) -> bool {
        self.keys.contains_key(&id)
    }

    /// Ids in execution order
    pub fn ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.by_due.keys().map(|(_, id)| *id)
    }

    /// Number of indexed tasks
    pub fn len(&self) -> usize {
        self.by_due.len()
    }

    /// Whether the index is empty
    pub fn is_empty(&self) -> bool {
        self.by_due.is_empty()
    }
}
