//! Producer-facing handles and the state they share with the dispatch loop

use crate::dispatcher::buffer::{BufferRegistry, ProducerBuffer};
use crate::dispatcher::{DispatchContext, DispatchKind, Task, TaskGroup, TaskId, TaskOutcome};
use crate::{DispatchError, DispatchResult};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wake-up flag for the idle dispatch loop.
///
/// A notification that arrives while the loop is busy stays pending, so the
/// next wait returns at once instead of missing it.
#[derive(Default)]
pub(crate) struct Signal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn notify(&self) {
        *self.pending.lock() = true;
        self.cond.notify_one();
    }

    /// Block until notified or until `timeout` passes (`None` waits forever).
    ///
    /// Returns whether a notification was consumed.
    pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut pending = self.pending.lock();
        if !*pending {
            match timeout {
                Some(timeout) if timeout.is_zero() => {}
                Some(timeout) => {
                    self.cond.wait_for(&mut pending, timeout);
                }
                None => {
                    while !*pending {
                        self.cond.wait(&mut pending);
                    }
                }
            }
        }
        std::mem::take(&mut *pending)
    }
}

/// Running totals kept by the dispatch loop
#[derive(Default)]
pub(crate) struct Counters {
    cycles: AtomicU64,
    dispatcher_cycle: AtomicU64,
    async_run: AtomicU64,
    scheduled_run: AtomicU64,
    expired: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    pending_scheduled: AtomicUsize,
}

impl Counters {
    pub(crate) fn record(&self, kind: DispatchKind, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Expired => {
                self.expired.fetch_add(1, Ordering::Relaxed);
                return;
            }
            TaskOutcome::Failed => {
                self.failed.fetch_add(1, Ordering::Relaxed);
            }
            TaskOutcome::Completed | TaskOutcome::Reschedule => {}
        }

        let ran = match kind {
            DispatchKind::Event => &self.dispatcher_cycle,
            DispatchKind::AsyncEvent => &self.async_run,
            DispatchKind::ScheduledEvent | DispatchKind::CycleEvent => &self.scheduled_run,
        };
        ran.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cycle(&self) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn cancelled(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_pending_scheduled(&self, count: usize) {
        self.pending_scheduled.store(count, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatcherStats {
        DispatcherStats {
            cycles: self.cycles.load(Ordering::Relaxed),
            dispatcher_cycle: self.dispatcher_cycle.load(Ordering::Relaxed),
            async_run: self.async_run.load(Ordering::Relaxed),
            scheduled_run: self.scheduled_run.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            pending_scheduled: self.pending_scheduled.load(Ordering::Relaxed),
        }
    }
}

/// Dispatcher statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Control loop iterations
    pub cycles: u64,
    /// Serial events that ran
    pub dispatcher_cycle: u64,
    /// Parallel-group tasks that ran
    pub async_run: u64,
    /// Scheduled and cyclic runs
    pub scheduled_run: u64,
    /// Tasks skipped because they waited past their expiry
    pub expired: u64,
    /// Runs that failed or panicked
    pub failed: u64,
    /// Scheduled tasks removed by `stop_event`
    pub cancelled: u64,
    /// Tasks currently in the schedule index
    pub pending_scheduled: usize,
}

/// State shared between handles, producers and the dispatch loop
pub(crate) struct Shared {
    pub(crate) buffers: BufferRegistry,
    pub(crate) signal: Signal,
    pub(crate) cancel_tx: Sender<TaskId>,
    pub(crate) cancel_rx: Receiver<TaskId>,
    pub(crate) counters: Counters,
    stop_requested: AtomicBool,
    running: Mutex<bool>,
    exited: Condvar,
    shutdown_timeout: Duration,
}

impl Shared {
    pub(crate) fn new(shutdown_timeout: Duration) -> Arc<Self> {
        let (cancel_tx, cancel_rx) = channel::unbounded();
        Arc::new(Self {
            buffers: BufferRegistry::default(),
            signal: Signal::default(),
            cancel_tx,
            cancel_rx,
            counters: Counters::default(),
            stop_requested: AtomicBool::new(false),
            running: Mutex::new(false),
            exited: Condvar::new(),
            shutdown_timeout,
        })
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        *self.running.lock() = running;
        if !running {
            self.exited.notify_all();
        }
    }

    fn is_running(&self) -> bool {
        *self.running.lock()
    }

    /// Wait for the loop to exit. Returns false on timeout.
    fn wait_exited(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut running = self.running.lock();
        while *running {
            if self.exited.wait_until(&mut running, deadline).timed_out() {
                return !*running;
            }
        }
        true
    }
}

/// Submission endpoint owned by one producer thread.
///
/// Each producer stages work in its own buffer. Dropping the producer retires
/// the buffer: whatever it still holds is merged once more, then the buffer
/// is unregistered.
pub struct Producer {
    name: &'static str,
    buffer: Arc<ProducerBuffer>,
    shared: Arc<Shared>,
}

impl Producer {
    pub(crate) fn new(shared: Arc<Shared>, name: &'static str) -> Self {
        let buffer = shared.buffers.register();
        Self {
            name,
            buffer,
            shared,
        }
    }

    /// Producer label, used as the task name of its async events
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Queue serial work for the dispatch thread
    pub fn add_event<F>(&self, f: F, context: &'static str)
    where
        F: FnOnce(&DispatchContext<'_>) + Send + 'static,
    {
        self.submit(TaskGroup::Serial, Task::new(context, f));
    }

    /// Queue serial work that is skipped if it waits longer than `ttl`
    pub fn add_event_with_expiry<F>(&self, f: F, context: &'static str, ttl: Duration)
    where
        F: FnOnce(&DispatchContext<'_>) + Send + 'static,
    {
        self.submit(TaskGroup::Serial, Task::new(context, f).expires_after(ttl));
    }

    /// Register a timed or cyclic task and return its id for `stop_event`
    pub fn schedule_event(&self, task: Task) -> TaskId {
        let id = task.id();
        self.buffer.push_scheduled(task);
        self.shared.signal.notify();
        id
    }

    /// Queue work for a group; parallel groups run as one partitioned batch
    pub fn async_event<F>(&self, f: F, group: TaskGroup)
    where
        F: FnOnce(&DispatchContext<'_>) + Send + 'static,
    {
        self.async_event_labeled(f, group, self.name);
    }

    pub(crate) fn async_event_labeled<F>(&self, f: F, group: TaskGroup, label: &'static str)
    where
        F: FnOnce(&DispatchContext<'_>) + Send + 'static,
    {
        self.submit(group, Task::new(label, f));
    }

    /// Cancel a scheduled task. Unknown or finished ids are ignored.
    pub fn stop_event(&self, id: TaskId) {
        request_cancel(&self.shared, id);
    }

    /// Handle to the dispatcher this producer feeds
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            shared: self.shared.clone(),
        }
    }

    fn submit(&self, group: TaskGroup, task: Task) {
        self.buffer.push(group, task);
        self.shared.signal.notify();
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.buffer.retire();
        self.shared.buffers.note_retired();
        self.shared.signal.notify();
    }
}

impl std::fmt::Debug for Producer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Producer").field("name", &self.name).finish()
    }
}

fn request_cancel(shared: &Shared, id: TaskId) {
    // The receiver lives in `shared`, so the channel cannot be disconnected
    let _ = shared.cancel_tx.send(id);
    shared.signal.notify();
    tracing::trace!(task = %id, "cancellation requested");
}

/// Cloneable handle to a dispatcher
#[derive(Clone)]
pub struct DispatcherHandle {
    pub(crate) shared: Arc<Shared>,
}

impl DispatcherHandle {
    /// Create a producer with its own buffer
    pub fn producer(&self, name: &'static str) -> Producer {
        Producer::new(self.shared.clone(), name)
    }

    /// Cancel a scheduled task. Unknown or finished ids are ignored.
    pub fn stop_event(&self, id: TaskId) {
        request_cancel(&self.shared, id);
    }

    /// Current statistics
    pub fn stats(&self) -> DispatcherStats {
        self.shared.counters.snapshot()
    }

    /// Whether the dispatch loop is running
    pub fn is_running(&self) -> bool {
        self.shared.is_running()
    }

    /// Stop the dispatch loop and wait for it to exit.
    ///
    /// Work still queued is dropped without running. Calling this from a task
    /// on the dispatch thread always times out.
    pub fn shutdown(&self) -> DispatchResult<()> {
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared.signal.notify();

        let timeout = self.shared.shutdown_timeout;
        if self.shared.wait_exited(timeout) {
            tracing::debug!("dispatcher stopped");
            Ok(())
        } else {
            tracing::warn!(?timeout, "dispatcher did not stop in time");
            Err(DispatchError::ShutdownTimeout(timeout))
        }
    }
}

impl std::fmt::Debug for DispatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatcherHandle")
            .field("running", &self.is_running())
            .finish()
    }
}
