//! Task structure, groups and execution outcome

use crate::dispatcher::DispatchContext;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Unique identifier for a Task
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    /// Generate a new unique TaskId
    pub fn new() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the numeric ID value
    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// Create a TaskId from a u64 value
    pub fn from_u64(id: u64) -> Self {
        TaskId(id)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Execution group of a task.
///
/// Groups run in declaration order every cycle: `Serial` on the dispatch
/// thread, then each parallel group as one partitioned batch.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskGroup {
    /// Runs on the dispatch thread, in submission order, one at a time
    Serial = 0,
    /// General-purpose parallel work
    GenericParallel = 1,
    /// Path-finding and movement work
    Walk = 2,
}

impl TaskGroup {
    /// Number of groups
    pub const COUNT: usize = 3;

    /// Every group in execution order
    pub const ALL: [TaskGroup; TaskGroup::COUNT] =
        [TaskGroup::Serial, TaskGroup::GenericParallel, TaskGroup::Walk];

    /// Position of the group in execution order
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether tasks of this group may run off the dispatch thread
    pub fn is_parallel(self) -> bool {
        self != TaskGroup::Serial
    }
}

/// Result of executing a task
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Ran; do not run again
    Completed,
    /// Ran; a cyclic task fires again one period after its due time
    Reschedule,
    /// Ran and failed (or panicked); never rescheduled
    Failed,
    /// Waited past its expiry; the payload was not run
    Expired,
}

impl TaskOutcome {
    /// Whether the payload was actually invoked
    pub fn ran(self) -> bool {
        self != TaskOutcome::Expired
    }
}

type OnceFn = Box<dyn FnOnce(&DispatchContext<'_>) + Send>;
type RepeatFn = Box<dyn FnMut(&DispatchContext<'_>) -> TaskOutcome + Send>;

enum Payload {
    Once(Option<OnceFn>),
    Repeat(RepeatFn),
}

/// A unit of work owned by the dispatcher until it runs or is dropped
pub struct Task {
    /// Unique identifier, shared by every run of a cyclic task
    id: TaskId,

    /// Diagnostic label
    context: &'static str,

    /// When the task becomes runnable
    due: Instant,

    /// Re-fire interval for cyclic tasks
    period: Option<Duration>,

    /// Maximum time the task may wait past `due` and still run
    expires_after: Option<Duration>,

    /// Work to perform
    payload: Payload,
}

impl Task {
    /// Create a one-shot task that is due immediately
    pub fn new<F>(context: &'static str, f: F) -> Self
    where
        F: FnOnce(&DispatchContext<'_>) + Send + 'static,
    {
        Self::delayed(Duration::ZERO, context, f)
    }

    /// Create a one-shot task that becomes due after `delay`
    pub fn delayed<F>(delay: Duration, context: &'static str, f: F) -> Self
    where
        F: FnOnce(&DispatchContext<'_>) + Send + 'static,
    {
        Self {
            id: TaskId::new(),
            context,
            due: Instant::now() + delay,
            period: None,
            expires_after: None,
            payload: Payload::Once(Some(Box::new(f))),
        }
    }

    /// Create a cyclic task that first fires one `period` from now.
    ///
    /// The body decides whether to keep going: only `TaskOutcome::Reschedule`
    /// keeps the task alive.
    pub fn cyclic<F>(period: Duration, context: &'static str, f: F) -> Self
    where
        F: FnMut(&DispatchContext<'_>) -> TaskOutcome + Send + 'static,
    {
        Self {
            id: TaskId::new(),
            context,
            due: Instant::now() + period,
            period: Some(period),
            expires_after: None,
            payload: Payload::Repeat(Box::new(f)),
        }
    }

    /// Override the first due time to `delay` from now
    pub fn first_run_after(mut self, delay: Duration) -> Self {
        self.due = Instant::now() + delay;
        self
    }

    /// Skip the task if it has waited longer than `ttl` past its due time
    pub fn expires_after(mut self, ttl: Duration) -> Self {
        self.expires_after = Some(ttl);
        self
    }

    /// Get the Task's unique ID
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Diagnostic label
    pub fn context(&self) -> &'static str {
        self.context
    }

    /// Next due time
    pub fn due(&self) -> Instant {
        self.due
    }

    /// Re-fire interval, if cyclic
    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Whether the task re-fires after running
    pub fn is_cycle(&self) -> bool {
        self.period.is_some()
    }

    /// Whether the task waited past its expiry at `now`
    pub fn is_expired(&self, now: Instant) -> bool {
        self.expires_after
            .is_some_and(|ttl| now.saturating_duration_since(self.due) > ttl)
    }

    /// Run the payload under `ctx`.
    ///
    /// A panic inside the payload is contained here and reported as
    /// `TaskOutcome::Failed`.
    pub fn execute(&mut self, ctx: &DispatchContext<'_>, now: Instant) -> TaskOutcome {
        if self.is_expired(now) {
            return TaskOutcome::Expired;
        }

        let payload = &mut self.payload;
        let result = panic::catch_unwind(AssertUnwindSafe(|| match payload {
            Payload::Once(f) => {
                if let Some(f) = f.take() {
                    f(ctx);
                }
                TaskOutcome::Completed
            }
            Payload::Repeat(f) => f(ctx),
        }));

        match result {
            Ok(outcome) => outcome,
            Err(cause) => {
                let message = cause
                    .downcast_ref::<&str>()
                    .copied()
                    .or_else(|| cause.downcast_ref::<String>().map(String::as_str))
                    .unwrap_or("<non-string panic>");
                tracing::warn!(
                    task = %self.id,
                    context = self.context,
                    panic = message,
                    "task panicked"
                );
                TaskOutcome::Failed
            }
        }
    }

    /// Move a cyclic task to its next due time
    pub(crate) fn advance(&mut self) {
        if let Some(period) = self.period {
            self.due += period;
        }
    }
}

#[cfg(test)]
impl Task {
    pub(crate) fn set_due_for_test(&mut self, due: Instant) {
        self.due = due;
    }

    pub(crate) fn set_id_for_test(&mut self, id: TaskId) {
        self.id = id;
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("context", &self.context)
            .field("due", &self.due)
            .field("period", &self.period)
            .field("expires_after", &self.expires_after)
            .finish_non_exhaustive()
    }
}
