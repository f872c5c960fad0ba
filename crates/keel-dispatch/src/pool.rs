//! Worker pool used by the dispatcher
//!
//! The dispatcher only needs three things from a pool: start a detached job
//! (the dispatch loop itself), run a half-open index range across threads and
//! hand back a joinable handle, and report whether it is shutting down. Pools
//! also run registered stop hooks when they shut down, which is how an idle
//! dispatch loop learns that its pool is gone.
//! `ThreadPool` feeds named threads through a crossbeam channel; `InlinePool`
//! runs ranges on the caller and is used to drive the dispatcher
//! deterministically.

use crate::config::DispatcherConfig;
use crate::{DispatchError, DispatchResult};
use crossbeam::channel::{self, Receiver, SendError, Sender};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// Detached background job
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Body of a parallel range, called once per index
pub type RangeFn = Arc<dyn Fn(usize) + Send + Sync + 'static>;

/// Callback run once when a pool stops
pub type StopHook = Box<dyn Fn() + Send + Sync + 'static>;

/// Join timeout used when a pool is built without a config
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Thread pool collaborator consumed by the dispatcher
pub trait WorkerPool: Send + Sync {
    /// Fire a background job that runs until it returns on its own
    fn run_detached(&self, job: Job) -> DispatchResult<()>;

    /// Execute `f(i)` for every `i` in `low..high` across pool threads
    fn run_parallel_range(&self, low: usize, high: usize, f: RangeFn) -> BatchHandle;

    /// Whether the pool is shutting down
    fn is_stopped(&self) -> bool;

    /// Number of threads ranges are spread over
    fn thread_count(&self) -> usize;

    /// Register `hook` to run when the pool stops.
    ///
    /// Runs immediately if the pool is already stopped.
    fn on_stop(&self, hook: StopHook);
}

/// Hooks waiting for a pool to stop
#[derive(Default)]
struct StopHooks {
    hooks: Mutex<Vec<StopHook>>,
}

impl StopHooks {
    fn register(&self, hook: StopHook, stopped: &AtomicBool) {
        let mut hooks = self.hooks.lock();
        // Checked under the lock so a concurrent `fire` cannot miss the hook
        if stopped.load(Ordering::Acquire) {
            drop(hooks);
            hook();
            return;
        }
        hooks.push(hook);
    }

    fn fire(&self) {
        let hooks = std::mem::take(&mut *self.hooks.lock());
        for hook in hooks {
            hook();
        }
    }
}

/// Split `0..len` into contiguous chunks, at most `parts` of them.
///
/// Each chunk holds at least `min_chunk` indices (except possibly the last).
pub fn partition(len: usize, parts: usize, min_chunk: usize) -> Vec<(usize, usize)> {
    if len == 0 {
        return Vec::new();
    }

    let chunk = len.div_ceil(parts.max(1)).max(min_chunk.max(1));
    let mut ranges = Vec::with_capacity(len.div_ceil(chunk));
    let mut start = 0;
    while start < len {
        let end = (start + chunk).min(len);
        ranges.push((start, end));
        start = end;
    }
    ranges
}

/// Countdown latch backing a `BatchHandle`
struct Latch {
    remaining: Mutex<usize>,
    done: Condvar,
}

impl Latch {
    fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            done: Condvar::new(),
        }
    }

    fn count_down(&self) {
        let mut remaining = self.remaining.lock();
        *remaining = remaining.saturating_sub(1);
        if *remaining == 0 {
            self.done.notify_all();
        }
    }

    fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.done.wait(&mut remaining);
        }
    }

    fn is_done(&self) -> bool {
        *self.remaining.lock() == 0
    }
}

/// Counts the latch down when dropped, including during unwinding
struct LatchGuard(Arc<Latch>);

impl Drop for LatchGuard {
    fn drop(&mut self) {
        self.0.count_down();
    }
}

/// Joinable handle for a parallel range.
///
/// Dropping an unjoined handle blocks until the range has finished, so data
/// the range refers to is never released while pool threads still use it.
#[must_use = "a batch handle should be joined"]
pub struct BatchHandle {
    latch: Option<Arc<Latch>>,
}

impl BatchHandle {
    /// Handle for a range that already ran to completion
    pub fn completed() -> Self {
        Self { latch: None }
    }

    fn pending(latch: Arc<Latch>) -> Self {
        Self { latch: Some(latch) }
    }

    /// Whether every index of the range has been executed
    pub fn is_finished(&self) -> bool {
        self.latch.as_ref().map_or(true, |latch| latch.is_done())
    }

    /// Block until every index of the range has been executed
    pub fn join(mut self) {
        if let Some(latch) = self.latch.take() {
            latch.wait();
        }
    }
}

impl Drop for BatchHandle {
    fn drop(&mut self) {
        if let Some(latch) = self.latch.take() {
            latch.wait();
        }
    }
}

/// Channel-fed pool of named worker threads
pub struct ThreadPool {
    /// Thread name prefix
    name: String,

    /// Number of worker threads
    thread_count: usize,

    /// Job queue; `None` once shutdown has begun
    job_tx: Mutex<Option<Sender<Job>>>,

    /// Worker thread handles
    workers: Mutex<Vec<JoinHandle<()>>>,

    /// Detached job thread handles
    detached: Mutex<Vec<JoinHandle<()>>>,

    /// Counter used to name detached threads
    detached_spawned: AtomicUsize,

    /// Shutdown signal
    stopped: AtomicBool,

    /// Run after `stopped` flips, before threads are joined
    stop_hooks: StopHooks,

    /// How long shutdown waits for each thread before detaching it
    shutdown_timeout: Duration,
}

impl ThreadPool {
    /// Start a pool with `thread_count` workers (0 = number of CPU cores)
    pub fn new(thread_count: usize, name: &str) -> DispatchResult<Self> {
        let count = if thread_count == 0 {
            num_cpus::get()
        } else {
            thread_count
        };

        let (job_tx, job_rx) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(count);
        for i in 0..count {
            let rx = job_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-worker-{}", name, i))
                .spawn(move || Self::worker_loop(rx))?;
            workers.push(handle);
        }

        tracing::debug!(pool = name, threads = count, "worker pool started");

        Ok(Self {
            name: name.to_string(),
            thread_count: count,
            job_tx: Mutex::new(Some(job_tx)),
            workers: Mutex::new(workers),
            detached: Mutex::new(Vec::new()),
            detached_spawned: AtomicUsize::new(0),
            stopped: AtomicBool::new(false),
            stop_hooks: StopHooks::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        })
    }

    /// Start a pool sized, named and timed by the configuration
    pub fn from_config(config: &DispatcherConfig) -> DispatchResult<Self> {
        config.validate()?;
        Ok(Self::new(config.effective_worker_threads(), &config.thread_name)?
            .with_shutdown_timeout(config.shutdown_timeout()))
    }

    /// Override how long shutdown waits for each thread
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Per-thread join timeout used by `shutdown`
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Stop accepting work, let workers drain the queue, and join all threads.
    ///
    /// Ranges submitted after this point run inline on the caller.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        // Dropping the sender lets workers finish queued jobs, then disconnect
        self.job_tx.lock().take();
        self.stop_hooks.fire();

        let timeout = self.shutdown_timeout;
        for handle in self.workers.lock().drain(..) {
            Self::join_with_timeout(handle, timeout);
        }
        for handle in self.detached.lock().drain(..) {
            Self::join_with_timeout(handle, timeout);
        }

        tracing::debug!(pool = %self.name, "worker pool stopped");
    }

    fn worker_loop(job_rx: Receiver<Job>) {
        while let Ok(job) = job_rx.recv() {
            // A panicking job must not take the worker down with it
            let _ = panic::catch_unwind(AssertUnwindSafe(job));
        }
    }

    /// Join a thread with timeout, detach if stuck.
    fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
        let start = Instant::now();
        loop {
            if handle.is_finished() {
                let _ = handle.join();
                return;
            }
            if start.elapsed() > timeout {
                tracing::warn!(
                    thread = handle.thread().name().unwrap_or("<unnamed>"),
                    "thread did not exit in time, detaching"
                );
                drop(handle);
                return;
            }
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl WorkerPool for ThreadPool {
    fn run_detached(&self, job: Job) -> DispatchResult<()> {
        if self.is_stopped() {
            return Err(DispatchError::AlreadyStopped);
        }

        let index = self.detached_spawned.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("{}-detached-{}", self.name, index))
            .spawn(job)?;
        self.detached.lock().push(handle);
        Ok(())
    }

    fn run_parallel_range(&self, low: usize, high: usize, f: RangeFn) -> BatchHandle {
        if high <= low {
            return BatchHandle::completed();
        }

        let blocks = partition(high - low, self.thread_count, 1);
        let latch = Arc::new(Latch::new(blocks.len()));
        let mut rejected: Vec<Job> = Vec::new();

        {
            let job_tx = self.job_tx.lock();
            let Some(tx) = job_tx.as_ref() else {
                drop(job_tx);
                for i in low..high {
                    f(i);
                }
                return BatchHandle::completed();
            };

            for (start, end) in blocks {
                let f = f.clone();
                let guard = LatchGuard(latch.clone());
                let job: Job = Box::new(move || {
                    let _guard = guard;
                    for i in (low + start)..(low + end) {
                        f(i);
                    }
                });
                if let Err(SendError(job)) = tx.send(job) {
                    rejected.push(job);
                }
            }
        }

        // Only reachable if every worker is gone; keep the join promise anyway
        for job in rejected {
            job();
        }

        BatchHandle::pending(latch)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn thread_count(&self) -> usize {
        self.thread_count
    }

    fn on_stop(&self, hook: StopHook) {
        self.stop_hooks.register(hook, &self.stopped);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Pool that runs parallel ranges synchronously on the calling thread.
///
/// It still reports a configurable thread count so batches get partitioned
/// exactly as they would be on a real pool.
pub struct InlinePool {
    thread_count: usize,
    stopped: AtomicBool,
    stop_hooks: StopHooks,
}

impl InlinePool {
    /// Create an inline pool that pretends to have `thread_count` threads
    pub fn new(thread_count: usize) -> Self {
        Self {
            thread_count: thread_count.max(1),
            stopped: AtomicBool::new(false),
            stop_hooks: StopHooks::default(),
        }
    }

    /// Flag the pool as stopped and run its stop hooks
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.stop_hooks.fire();
        }
    }
}

impl WorkerPool for InlinePool {
    fn run_detached(&self, job: Job) -> DispatchResult<()> {
        if self.is_stopped() {
            return Err(DispatchError::AlreadyStopped);
        }
        thread::Builder::new()
            .name("keel-inline-detached".to_string())
            .spawn(job)?;
        Ok(())
    }

    fn run_parallel_range(&self, low: usize, high: usize, f: RangeFn) -> BatchHandle {
        for i in low..high {
            f(i);
        }
        BatchHandle::completed()
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn thread_count(&self) -> usize {
        self.thread_count
    }

    fn on_stop(&self, hook: StopHook) {
        self.stop_hooks.register(hook, &self.stopped);
    }
}
