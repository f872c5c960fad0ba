//! Partitioned parallel dispatch
//!
//! A batch of `n` items is cut into contiguous chunks. Chunk 0 runs on the
//! calling thread while the rest go to the pool as one range; the caller then
//! joins. A flag marks that a batch is in flight, and any batch started while
//! it is set runs entirely in place, so pool threads never wait on the pool.

use crate::dispatcher::handle::Shared;
use crate::dispatcher::{DispatchContext, DispatchKind, Producer, Task, TaskGroup};
use crate::pool::{partition, RangeFn, WorkerPool};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Clears the in-flight flag when dropped, including during unwinding
struct ReentrancyGuard<'a>(&'a AtomicBool);

impl<'a> ReentrancyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ReentrancyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(crate) struct ParallelDispatcher {
    pool: Arc<dyn WorkerPool>,
    active: AtomicBool,
    min_chunk: usize,
}

impl ParallelDispatcher {
    pub(crate) fn new(pool: Arc<dyn WorkerPool>, min_chunk: usize) -> Self {
        Self {
            pool,
            active: AtomicBool::new(false),
            min_chunk: min_chunk.max(1),
        }
    }

    pub(crate) fn pool(&self) -> &dyn WorkerPool {
        self.pool.as_ref()
    }

    /// Whether a batch is currently in flight
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Run `f(i)` for `i` in `0..n`, returning once every call has finished
    pub(crate) fn run<F>(&self, n: usize, f: F)
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        if n == 0 {
            return;
        }

        let Some(_guard) = ReentrancyGuard::acquire(&self.active) else {
            tracing::trace!(n, "nested parallel batch, running in place");
            (0..n).for_each(f);
            return;
        };

        let parts = partition(n, self.pool.thread_count(), self.min_chunk);
        if parts.len() <= 1 {
            (0..n).for_each(f);
            return;
        }

        let (_, split) = parts[0];
        let f: RangeFn = Arc::new(f);
        let batch = self.pool.run_parallel_range(split, n, f.clone());
        for i in 0..split {
            f(i);
        }
        batch.join();
    }
}

/// Tasks of one group handed to a parallel run, one slot per task
pub(crate) struct ParallelBatch {
    group: TaskGroup,
    now: Instant,
    slots: Box<[Mutex<Option<Task>>]>,
    lanes: Arc<[Producer]>,
    shared: Arc<Shared>,
    parallel: Arc<ParallelDispatcher>,
}

impl ParallelBatch {
    pub(crate) fn new(
        group: TaskGroup,
        now: Instant,
        tasks: Vec<Task>,
        lanes: Arc<[Producer]>,
        shared: Arc<Shared>,
        parallel: Arc<ParallelDispatcher>,
    ) -> Self {
        Self {
            group,
            now,
            slots: tasks.into_iter().map(|t| Mutex::new(Some(t))).collect(),
            lanes,
            shared,
            parallel,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Execute the task in slot `i`
    pub(crate) fn run_one(&self, i: usize) {
        let Some(mut task) = self.slots.get(i).and_then(|slot| slot.lock().take()) else {
            return;
        };

        // Neighbouring indices usually share a chunk, so they share a lane too
        let lane = &self.lanes[i * self.lanes.len() / self.slots.len()];
        let ctx = DispatchContext::new(
            self.group,
            DispatchKind::AsyncEvent,
            task.context(),
            lane,
            &self.parallel,
        );
        let outcome = task.execute(&ctx, self.now);
        self.shared.counters.record(DispatchKind::AsyncEvent, outcome);
    }
}
