//! Central Dispatcher
//!
//! Producers stage work in their own buffers; a single dispatch thread merges
//! the buffers, runs serial events in order, farms parallel groups out to the
//! worker pool and fires scheduled tasks when they fall due.

mod buffer;
mod context;
#[allow(clippy::module_inception)]
mod dispatcher;
mod handle;
mod parallel;
mod schedule;
mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use context::{DispatchContext, DispatchKind};
pub use dispatcher::Dispatcher;
pub use handle::{DispatcherHandle, DispatcherStats, Producer};
pub use schedule::ScheduleIndex;
pub use task::{Task, TaskGroup, TaskId, TaskOutcome};
