//! Keel Central Dispatcher
//!
//! This crate provides a single-threaded dispatch loop fed by many producers:
//! - Serial events executed on the dispatch thread in submission order
//! - Parallel task groups farmed out to a worker pool in partitioned batches
//! - Deferred and cyclic tasks ordered by due time, cancellable by id
//! - An idle wait that wakes on new work or on the next deadline

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod config;
pub mod dispatcher;
pub mod pool;

use std::time::Duration;

pub use config::{ConfigError, DispatcherConfig};
pub use dispatcher::{
    DispatchContext, DispatchKind, Dispatcher, DispatcherHandle, DispatcherStats, Producer,
    ScheduleIndex, Task, TaskGroup, TaskId, TaskOutcome,
};
pub use pool::{
    partition, BatchHandle, InlinePool, StopHook, ThreadPool, WorkerPool,
    DEFAULT_SHUTDOWN_TIMEOUT,
};

/// Dispatcher infrastructure errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// A pool or dispatch thread could not be spawned
    #[error("Failed to spawn thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The dispatch loop did not exit within the configured timeout
    #[error("Dispatcher did not stop within {0:?}")]
    ShutdownTimeout(Duration),

    /// The worker pool has already been shut down
    #[error("Worker pool is stopped")]
    AlreadyStopped,

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Dispatcher result
pub type DispatchResult<T> = Result<T, DispatchError>;
