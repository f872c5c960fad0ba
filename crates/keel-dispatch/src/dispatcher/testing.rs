//! Deterministic dispatcher fixture for unit tests

use crate::config::DispatcherConfig;
use crate::dispatcher::{DispatchContext, DispatchKind, Dispatcher, Task, TaskGroup, TaskOutcome};
use crate::pool::InlinePool;
use std::sync::Arc;
use std::time::Instant;

/// Dispatcher on an inline pool, driven by explicit `run_cycle` calls
pub(crate) struct Harness {
    dispatcher: Dispatcher,
}

impl Harness {
    pub(crate) fn new() -> Self {
        Self {
            dispatcher: Dispatcher::new(Arc::new(InlinePool::new(2)), &DispatcherConfig::default()),
        }
    }

    pub(crate) fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub(crate) fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    pub(crate) fn context(
        &self,
        group: TaskGroup,
        kind: DispatchKind,
        task_name: &'static str,
    ) -> DispatchContext<'_> {
        self.dispatcher.context(group, kind, task_name)
    }

    /// Execute a task as a serial event
    pub(crate) fn execute(&self, task: &mut Task, now: Instant) -> TaskOutcome {
        let ctx = self.context(TaskGroup::Serial, DispatchKind::Event, task.context());
        task.execute(&ctx, now)
    }
}
