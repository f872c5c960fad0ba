//! What is executing right now, and the submission paths available to it

use crate::dispatcher::parallel::ParallelDispatcher;
use crate::dispatcher::{Producer, Task, TaskGroup, TaskId};

/// How the current task was dispatched
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DispatchKind {
    /// Serial event on the dispatch thread
    Event,
    /// Member of a parallel batch
    AsyncEvent,
    /// One-shot scheduled task
    ScheduledEvent,
    /// Run of a cyclic task
    CycleEvent,
}

/// Context handed to every task payload.
///
/// It lives for one execution. Work submitted through it lands in the buffer
/// of the lane the task runs on.
pub struct DispatchContext<'a> {
    group: TaskGroup,
    kind: DispatchKind,
    task_name: &'static str,
    lane: &'a Producer,
    parallel: &'a ParallelDispatcher,
}

impl<'a> DispatchContext<'a> {
    pub(crate) fn new(
        group: TaskGroup,
        kind: DispatchKind,
        task_name: &'static str,
        lane: &'a Producer,
        parallel: &'a ParallelDispatcher,
    ) -> Self {
        Self {
            group,
            kind,
            task_name,
            lane,
            parallel,
        }
    }

    /// Group of the running task
    pub fn group(&self) -> TaskGroup {
        self.group
    }

    /// How the running task was dispatched
    pub fn kind(&self) -> DispatchKind {
        self.kind
    }

    /// Label of the running task
    pub fn task_name(&self) -> &'static str {
        self.task_name
    }

    /// Whether the running task belongs to a parallel batch
    pub fn is_async(&self) -> bool {
        self.kind == DispatchKind::AsyncEvent
    }

    /// Queue serial work for a later cycle
    pub fn add_event<F>(&self, f: F, context: &'static str)
    where
        F: FnOnce(&DispatchContext<'_>) + Send + 'static,
    {
        self.lane.add_event(f, context);
    }

    /// Run serial work now if already on the dispatch thread, else queue it
    pub fn try_add_event<F>(&self, f: F, context: &'static str)
    where
        F: FnOnce(&DispatchContext<'_>) + Send + 'static,
    {
        if self.is_async() {
            self.lane.add_event(f, context);
        } else {
            f(self);
        }
    }

    /// Queue work for a group, labelled with the running task's name
    pub fn async_event<F>(&self, f: F, group: TaskGroup)
    where
        F: FnOnce(&DispatchContext<'_>) + Send + 'static,
    {
        self.lane.async_event_labeled(f, group, self.task_name);
    }

    /// Register a timed or cyclic task
    pub fn schedule_event(&self, task: Task) -> TaskId {
        self.lane.schedule_event(task)
    }

    /// Cancel a scheduled task; a cyclic task may cancel itself
    pub fn stop_event(&self, id: TaskId) {
        self.lane.stop_event(id);
    }

    /// Run `f(i)` for every `i` in `0..n` and wait for all of them.
    ///
    /// Spread over the worker pool when called from the dispatch thread.
    /// Nested calls, from inside a parallel batch, run in place.
    pub fn parallel_for<F>(&self, n: usize, f: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        self.parallel.run(n, f);
    }
}

impl std::fmt::Debug for DispatchContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchContext")
            .field("group", &self.group)
            .field("kind", &self.kind)
            .field("task_name", &self.task_name)
            .finish_non_exhaustive()
    }
}
