//! Central dispatcher: the control loop and its cycle steps
//!
//! One cycle runs, in order:
//! 1. serial events, then every parallel group as a partitioned batch
//! 2. due scheduled tasks, then parallel work they produced
//! 3. merge of every producer buffer into the central queues
//!
//! When nothing is pending afterwards the loop sleeps until the next
//! scheduled task is due, or until a producer signals.

use crate::config::DispatcherConfig;
use crate::dispatcher::buffer::GroupQueues;
use crate::dispatcher::handle::Shared;
use crate::dispatcher::parallel::{ParallelBatch, ParallelDispatcher};
use crate::dispatcher::{
    DispatchContext, DispatchKind, DispatcherHandle, Producer, ScheduleIndex, Task, TaskGroup,
    TaskId, TaskOutcome,
};
use crate::pool::WorkerPool;
use crate::DispatchResult;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Owner of the central queues and the schedule index
pub struct Dispatcher {
    /// State shared with handles and producers
    shared: Arc<Shared>,

    /// Partitioned dispatch over the worker pool
    parallel: Arc<ParallelDispatcher>,

    /// Internal producers for work submitted from running tasks.
    /// Lane 0 belongs to the dispatch thread.
    lanes: Arc<[Producer]>,

    /// Merged tasks waiting to run, one queue per group
    queues: GroupQueues,

    /// Deferred and cyclic tasks
    scheduled: ScheduleIndex,

    /// Cyclic tasks that ran this cycle, re-inserted once the drain ends
    rescheduled: Vec<Task>,

    /// Scratch list for scheduled tasks moved out of buffers
    incoming: Vec<Task>,
}

impl Dispatcher {
    /// Create a dispatcher that farms parallel batches out to `pool`
    pub fn new(pool: Arc<dyn WorkerPool>, config: &DispatcherConfig) -> Self {
        let shared = Shared::new(config.shutdown_timeout());
        let lane_count = pool.thread_count() + 1;
        let lanes: Arc<[Producer]> = (0..lane_count)
            .map(|i| Producer::new(shared.clone(), if i == 0 { "dispatcher" } else { "worker" }))
            .collect();
        let parallel = Arc::new(ParallelDispatcher::new(pool, config.min_parallel_chunk));

        Self {
            shared,
            parallel,
            lanes,
            queues: GroupQueues::default(),
            scheduled: ScheduleIndex::new(),
            rescheduled: Vec::new(),
            incoming: Vec::new(),
        }
    }

    /// Handle for creating producers, cancelling and shutting down
    pub fn handle(&self) -> DispatcherHandle {
        DispatcherHandle {
            shared: self.shared.clone(),
        }
    }

    /// Start the control loop on a detached pool thread
    pub fn start(self) -> DispatchResult<DispatcherHandle> {
        let handle = self.handle();
        let shared = self.shared.clone();
        let pool = self.parallel.clone();

        // An idle loop has no timeout, so pool shutdown must wake it
        let waker = Arc::downgrade(&shared);
        pool.pool().on_stop(Box::new(move || {
            if let Some(shared) = waker.upgrade() {
                shared.signal.notify();
            }
        }));

        shared.set_running(true);
        let started = pool.pool().run_detached(Box::new(move || {
            let _running = LoopGuard(self.shared.clone());
            self.run();
        }));

        if let Err(err) = started {
            shared.set_running(false);
            return Err(err);
        }
        Ok(handle)
    }

    fn run(mut self) {
        tracing::debug!(lanes = self.lanes.len(), "dispatch loop started");

        while !self.should_stop() {
            self.run_cycle(Instant::now());

            if self.has_pending_tasks() {
                continue;
            }
            let timeout = self.time_until_next_scheduled(Instant::now());
            self.shared.signal.wait(timeout);
        }

        tracing::debug!(
            dropped_events = self.queues.iter().map(Vec::len).sum::<usize>(),
            dropped_scheduled = self.scheduled.len(),
            "dispatch loop stopped"
        );
    }

    fn should_stop(&self) -> bool {
        self.shared.stop_requested() || self.parallel.pool().is_stopped()
    }

    /// Run one full cycle with `now` as the clock snapshot
    pub fn run_cycle(&mut self, now: Instant) {
        self.shared.counters.cycle();
        self.execute_events(now);
        self.execute_scheduled(now);
        self.merge();

        tracing::trace!(
            serial = self.pending_events(TaskGroup::Serial),
            scheduled = self.scheduled.len(),
            "dispatch cycle finished"
        );
    }

    /// Whether merged events are waiting for the next cycle
    pub fn has_pending_tasks(&self) -> bool {
        self.queues.iter().any(|queue| !queue.is_empty())
    }

    /// How long the loop may sleep before the next scheduled task is due
    pub fn time_until_next_scheduled(&self, now: Instant) -> Option<Duration> {
        self.scheduled.time_until_next(now)
    }

    /// Merged tasks waiting in a group's queue
    pub fn pending_events(&self, group: TaskGroup) -> usize {
        self.queues[group.index()].len()
    }

    /// Scheduled and cyclic tasks not yet due
    pub fn scheduled(&self) -> &ScheduleIndex {
        &self.scheduled
    }

    /// Serial events first, then each parallel group in order
    fn execute_events(&mut self, now: Instant) {
        let serial = std::mem::take(&mut self.queues[TaskGroup::Serial.index()]);
        for mut task in serial {
            let outcome = self.execute_on_dispatch_thread(
                &mut task,
                TaskGroup::Serial,
                DispatchKind::Event,
                now,
            );
            self.shared.counters.record(DispatchKind::Event, outcome);
        }

        self.execute_parallel_groups(now);
    }

    fn execute_parallel_groups(&mut self, now: Instant) {
        self.merge_parallel();

        for group in TaskGroup::ALL.into_iter().filter(|g| g.is_parallel()) {
            let tasks = std::mem::take(&mut self.queues[group.index()]);
            if tasks.is_empty() {
                continue;
            }

            let batch = Arc::new(ParallelBatch::new(
                group,
                now,
                tasks,
                self.lanes.clone(),
                self.shared.clone(),
                self.parallel.clone(),
            ));
            let n = batch.len();
            tracing::trace!(?group, n, "dispatching parallel batch");
            self.parallel.run(n, move |i: usize| batch.run_one(i));
        }
    }

    /// Run every scheduled task due at `now`, in time order
    fn execute_scheduled(&mut self, now: Instant) {
        self.apply_cancellations();

        while let Some(mut task) = self.scheduled.pop_due(now) {
            let kind = if task.is_cycle() {
                DispatchKind::CycleEvent
            } else {
                DispatchKind::ScheduledEvent
            };
            let outcome = self.execute_on_dispatch_thread(&mut task, TaskGroup::Serial, kind, now);
            self.shared.counters.record(kind, outcome);

            if outcome == TaskOutcome::Reschedule && task.is_cycle() {
                task.advance();
                self.rescheduled.push(task);
            }

            if !self.shared.cancel_rx.is_empty() {
                self.apply_cancellations();
            }
        }

        for task in self.rescheduled.drain(..) {
            self.scheduled.insert(task);
        }
        self.shared.counters.set_pending_scheduled(self.scheduled.len());

        self.execute_parallel_groups(now);
    }

    /// Apply queued `stop_event` requests.
    ///
    /// Scheduled tasks are pulled out of the buffers after the requests are
    /// taken, so a cancel never overtakes the schedule it refers to.
    fn apply_cancellations(&mut self) {
        let ids: Vec<TaskId> = self.shared.cancel_rx.try_iter().collect();
        if ids.is_empty() {
            return;
        }

        self.pull_scheduled();
        for id in ids {
            let removed = self.scheduled.cancel(id) || self.cancel_rescheduled(id);
            if removed {
                self.shared.counters.cancelled();
                tracing::debug!(task = %id, "scheduled task cancelled");
            }
        }
    }

    fn cancel_rescheduled(&mut self, id: TaskId) -> bool {
        let before = self.rescheduled.len();
        self.rescheduled.retain(|task| task.id() != id);
        before != self.rescheduled.len()
    }

    fn execute_on_dispatch_thread(
        &self,
        task: &mut Task,
        group: TaskGroup,
        kind: DispatchKind,
        now: Instant,
    ) -> TaskOutcome {
        let ctx = DispatchContext::new(group, kind, task.context(), &self.lanes[0], &self.parallel);
        task.execute(&ctx, now)
    }

    /// Move every buffered task into the central structures
    fn merge(&mut self) {
        let queues = &mut self.queues;
        let incoming = &mut self.incoming;
        self.shared
            .buffers
            .for_each(|buffer| buffer.take_all(queues, incoming));
        self.index_incoming();

        let pruned = self.shared.buffers.prune_retired();
        if pruned > 0 {
            tracing::debug!(pruned, "retired producer buffers removed");
        }
    }

    fn merge_parallel(&mut self) {
        let queues = &mut self.queues;
        self.shared
            .buffers
            .for_each(|buffer| buffer.take_parallel(queues));
    }

    fn pull_scheduled(&mut self) {
        let incoming = &mut self.incoming;
        self.shared
            .buffers
            .for_each(|buffer| buffer.take_scheduled(incoming));
        self.index_incoming();
    }

    fn index_incoming(&mut self) {
        for task in self.incoming.drain(..) {
            self.scheduled.insert(task);
        }
        self.shared.counters.set_pending_scheduled(self.scheduled.len());
    }

    #[cfg(test)]
    pub(crate) fn context(
        &self,
        group: TaskGroup,
        kind: DispatchKind,
        task_name: &'static str,
    ) -> DispatchContext<'_> {
        DispatchContext::new(group, kind, task_name, &self.lanes[0], &self.parallel)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("lanes", &self.lanes.len())
            .field("queued", &self.queues.iter().map(Vec::len).sum::<usize>())
            .field("scheduled", &self.scheduled.len())
            .finish()
    }
}

/// Marks the loop as exited when dropped, including during unwinding
struct LoopGuard(Arc<Shared>);

impl Drop for LoopGuard {
    fn drop(&mut self) {
        self.0.set_running(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::testing::Harness;
    use crate::pool::ThreadPool;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_serial_order_across_producers() {
        let mut harness = Harness::new();
        let handle = harness.dispatcher().handle();
        let log = Arc::new(Mutex::new(Vec::new()));

        let producers: Vec<_> = ["a", "b", "c"].into_iter().map(|n| handle.producer(n)).collect();
        for (producer, label) in producers.iter().zip(["a1", "b1", "c1"]) {
            let sink = log.clone();
            producer.add_event(move |_| sink.lock().push(label), label);
        }
        let sink = log.clone();
        producers[0].add_event(move |_| sink.lock().push("a2"), "a2");

        let now = Instant::now();
        harness.dispatcher_mut().run_cycle(now);
        assert!(log.lock().is_empty());
        assert_eq!(harness.dispatcher().pending_events(TaskGroup::Serial), 4);

        harness.dispatcher_mut().run_cycle(now);
        assert_eq!(*log.lock(), vec!["a1", "a2", "b1", "c1"]);
        assert!(!harness.dispatcher().has_pending_tasks());
        assert_eq!(handle.stats().dispatcher_cycle, 4);
    }

    #[test]
    fn test_serial_runs_before_parallel_groups() {
        let mut harness = Harness::new();
        let producer = harness.dispatcher().handle().producer("p");
        let log = Arc::new(Mutex::new(Vec::new()));

        let sink = log.clone();
        producer.async_event(move |_| sink.lock().push("walk"), TaskGroup::Walk);
        let sink = log.clone();
        producer.async_event(move |_| sink.lock().push("generic"), TaskGroup::GenericParallel);
        let sink = log.clone();
        producer.add_event(move |_| sink.lock().push("serial"), "serial");

        let now = Instant::now();
        // Cycle 1 merges everything; parallel groups are already pulled in
        // before the batches run, serial waits for the next cycle
        harness.dispatcher_mut().run_cycle(now);
        assert_eq!(*log.lock(), vec!["generic", "walk"]);

        harness.dispatcher_mut().run_cycle(now);
        assert_eq!(*log.lock(), vec!["generic", "walk", "serial"]);
    }

    #[test]
    fn test_parallel_work_from_serial_runs_same_cycle() {
        let mut harness = Harness::new();
        let producer = harness.dispatcher().handle().producer("p");
        let log = Arc::new(Mutex::new(Vec::new()));

        let sink = log.clone();
        producer.add_event(
            move |ctx| {
                sink.lock().push("serial");
                for _ in 0..3 {
                    let sink = sink.clone();
                    ctx.async_event(
                        move |inner| {
                            assert!(inner.is_async());
                            sink.lock().push(inner.task_name());
                        },
                        TaskGroup::GenericParallel,
                    );
                }
            },
            "spawner",
        );

        let now = Instant::now();
        harness.dispatcher_mut().run_cycle(now);
        harness.dispatcher_mut().run_cycle(now);
        assert_eq!(*log.lock(), vec!["serial", "spawner", "spawner", "spawner"]);
        assert_eq!(harness.dispatcher().handle().stats().async_run, 3);
    }

    #[test]
    fn test_empty_group_does_not_stop_later_groups() {
        let mut harness = Harness::new();
        let producer = harness.dispatcher().handle().producer("p");
        let ran = Arc::new(AtomicU32::new(0));

        let r = ran.clone();
        producer.async_event(
            move |_| {
                r.fetch_add(1, Ordering::Relaxed);
            },
            TaskGroup::Walk,
        );

        harness.dispatcher_mut().run_cycle(Instant::now());
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_scheduled_run_in_time_order() {
        let mut harness = Harness::new();
        let producer = harness.dispatcher().handle().producer("p");
        let log = Arc::new(Mutex::new(Vec::new()));

        let sink = log.clone();
        producer.schedule_event(Task::delayed(ms(20), "t2", move |_| sink.lock().push("t2")));
        let sink = log.clone();
        producer.schedule_event(Task::delayed(ms(10), "t1", move |ctx| {
            assert_eq!(ctx.kind(), DispatchKind::ScheduledEvent);
            sink.lock().push("t1");
        }));

        let start = Instant::now();
        harness.dispatcher_mut().run_cycle(start);
        assert_eq!(harness.dispatcher().scheduled().len(), 2);
        assert!(harness.dispatcher().time_until_next_scheduled(start).is_some());

        harness.dispatcher_mut().run_cycle(start + ms(100));
        assert_eq!(*log.lock(), vec!["t1", "t2"]);
        assert!(harness.dispatcher().scheduled().is_empty());
        assert_eq!(harness.dispatcher().time_until_next_scheduled(start), None);
    }

    #[test]
    fn test_scheduled_not_run_before_due() {
        let mut harness = Harness::new();
        let producer = harness.dispatcher().handle().producer("p");
        let ran = Arc::new(AtomicU32::new(0));

        let r = ran.clone();
        let task = Task::delayed(ms(50), "later", move |_| {
            r.fetch_add(1, Ordering::Relaxed);
        });
        let due = task.due();
        producer.schedule_event(task);

        harness.dispatcher_mut().run_cycle(due - ms(40));
        harness.dispatcher_mut().run_cycle(due - ms(1));
        assert_eq!(ran.load(Ordering::Relaxed), 0);
        assert_eq!(
            harness.dispatcher().time_until_next_scheduled(due - ms(1)),
            Some(ms(1))
        );

        harness.dispatcher_mut().run_cycle(due);
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_cancel_before_due() {
        let mut harness = Harness::new();
        let handle = harness.dispatcher().handle();
        let producer = handle.producer("p");
        let ran = Arc::new(AtomicU32::new(0));

        let r = ran.clone();
        let task = Task::delayed(ms(50), "x", move |_| {
            r.fetch_add(1, Ordering::Relaxed);
        });
        let due = task.due();
        let id = producer.schedule_event(task);

        // Cancel lands before the schedule has ever been merged
        producer.stop_event(id);
        harness.dispatcher_mut().run_cycle(due + ms(1));
        harness.dispatcher_mut().run_cycle(due + ms(100));

        assert_eq!(ran.load(Ordering::Relaxed), 0);
        assert!(!harness.dispatcher().scheduled().contains(id));
        assert_eq!(handle.stats().cancelled, 1);
    }

    #[test]
    fn test_cancel_after_run_is_noop() {
        let mut harness = Harness::new();
        let handle = harness.dispatcher().handle();
        let producer = handle.producer("p");

        let task = Task::delayed(ms(5), "x", |_| {});
        let due = task.due();
        let id = producer.schedule_event(task);
        harness.dispatcher_mut().run_cycle(due);
        harness.dispatcher_mut().run_cycle(due);

        handle.stop_event(id);
        handle.stop_event(id);
        handle.stop_event(TaskId::from_u64(u64::MAX));
        harness.dispatcher_mut().run_cycle(due);

        assert_eq!(handle.stats().cancelled, 0);
        assert_eq!(handle.stats().scheduled_run, 1);
    }

    #[test]
    fn test_cyclic_runs_until_completed() {
        let mut harness = Harness::new();
        let producer = harness.dispatcher().handle().producer("p");
        let runs = Arc::new(AtomicU32::new(0));

        let r = runs.clone();
        let task = Task::cyclic(ms(10), "y", move |ctx| {
            assert_eq!(ctx.kind(), DispatchKind::CycleEvent);
            if r.fetch_add(1, Ordering::Relaxed) + 1 < 3 {
                TaskOutcome::Reschedule
            } else {
                TaskOutcome::Completed
            }
        });
        let first = task.due();
        let id = producer.schedule_event(task);

        harness.dispatcher_mut().run_cycle(Instant::now());
        for k in 0..10 {
            harness.dispatcher_mut().run_cycle(first + ms(10 * k));
        }

        assert_eq!(runs.load(Ordering::Relaxed), 3);
        assert!(!harness.dispatcher().scheduled().contains(id));
    }

    #[test]
    fn test_cyclic_runs_at_most_once_per_cycle() {
        let mut harness = Harness::new();
        let producer = harness.dispatcher().handle().producer("p");
        let runs = Arc::new(AtomicU32::new(0));

        let r = runs.clone();
        let task = Task::cyclic(ms(1), "fast", move |_| {
            r.fetch_add(1, Ordering::Relaxed);
            TaskOutcome::Reschedule
        });
        let first = task.due();
        let id = producer.schedule_event(task);
        harness.dispatcher_mut().run_cycle(Instant::now());

        // Far in the future: many periods are overdue, one run per cycle
        harness.dispatcher_mut().run_cycle(first + ms(100));
        assert_eq!(runs.load(Ordering::Relaxed), 1);
        harness.dispatcher_mut().run_cycle(first + ms(100));
        assert_eq!(runs.load(Ordering::Relaxed), 2);
        assert!(harness.dispatcher().scheduled().contains(id));
    }

    #[test]
    fn test_cyclic_task_cancels_itself() {
        let mut harness = Harness::new();
        let producer = harness.dispatcher().handle().producer("p");
        let runs = Arc::new(AtomicU32::new(0));
        let own_id = Arc::new(Mutex::new(None));

        let (r, slot) = (runs.clone(), own_id.clone());
        let task = Task::cyclic(ms(10), "self-stop", move |ctx| {
            r.fetch_add(1, Ordering::Relaxed);
            if let Some(id) = *slot.lock() {
                ctx.stop_event(id);
            }
            TaskOutcome::Reschedule
        });
        let first = task.due();
        *own_id.lock() = Some(producer.schedule_event(task));

        harness.dispatcher_mut().run_cycle(Instant::now());
        harness.dispatcher_mut().run_cycle(first);
        harness.dispatcher_mut().run_cycle(first + ms(50));

        assert_eq!(runs.load(Ordering::Relaxed), 1);
        assert!(harness.dispatcher().scheduled().is_empty());
    }

    #[test]
    fn test_failed_cyclic_is_not_rescheduled() {
        let mut harness = Harness::new();
        let handle = harness.dispatcher().handle();
        let producer = handle.producer("p");

        let task = Task::cyclic(ms(5), "broken", |_| panic!("cycle body failed"));
        let first = task.due();
        let id = producer.schedule_event(task);
        harness.dispatcher_mut().run_cycle(Instant::now());
        harness.dispatcher_mut().run_cycle(first);

        assert!(!harness.dispatcher().scheduled().contains(id));
        assert_eq!(handle.stats().failed, 1);
    }

    #[test]
    fn test_expired_event_is_skipped() {
        let mut harness = Harness::new();
        let handle = harness.dispatcher().handle();
        let producer = handle.producer("p");
        let ran = Arc::new(AtomicU32::new(0));

        let r = ran.clone();
        producer.add_event_with_expiry(
            move |_| {
                r.fetch_add(1, Ordering::Relaxed);
            },
            "stale",
            ms(5),
        );

        let later = Instant::now() + ms(50);
        harness.dispatcher_mut().run_cycle(later);
        harness.dispatcher_mut().run_cycle(later);

        assert_eq!(ran.load(Ordering::Relaxed), 0);
        assert_eq!(handle.stats().expired, 1);
        assert_eq!(handle.stats().dispatcher_cycle, 0);
    }

    #[test]
    fn test_panicking_event_does_not_stop_cycle() {
        let mut harness = Harness::new();
        let handle = harness.dispatcher().handle();
        let producer = handle.producer("p");
        let ran = Arc::new(AtomicU32::new(0));

        producer.add_event(|_| panic!("event failed"), "bad");
        let r = ran.clone();
        producer.add_event(
            move |_| {
                r.fetch_add(1, Ordering::Relaxed);
            },
            "good",
        );

        let now = Instant::now();
        harness.dispatcher_mut().run_cycle(now);
        harness.dispatcher_mut().run_cycle(now);

        assert_eq!(ran.load(Ordering::Relaxed), 1);
        assert_eq!(handle.stats().failed, 1);
    }

    #[test]
    fn test_dropped_producer_is_merged_then_pruned() {
        let mut harness = Harness::new();
        let handle = harness.dispatcher().handle();
        let ran = Arc::new(AtomicU32::new(0));
        let baseline = handle.shared.buffers.len();

        {
            let producer = handle.producer("short-lived");
            let r = ran.clone();
            producer.add_event(
                move |_| {
                    r.fetch_add(1, Ordering::Relaxed);
                },
                "farewell",
            );
        }

        let now = Instant::now();
        harness.dispatcher_mut().run_cycle(now);
        assert_eq!(handle.shared.buffers.len(), baseline);
        harness.dispatcher_mut().run_cycle(now);
        assert_eq!(ran.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_start_and_shutdown() {
        let pool = Arc::new(ThreadPool::new(2, "disp-start").unwrap());
        let config = DispatcherConfig {
            shutdown_timeout_ms: 1000,
            ..Default::default()
        };
        let handle = Dispatcher::new(pool.clone(), &config).start().unwrap();
        assert!(handle.is_running());

        let producer = handle.producer("p");
        let (tx, rx) = crossbeam::channel::bounded(1);
        producer.add_event(
            move |_| {
                let _ = tx.send(thread::current().name().map(str::to_string));
            },
            "thread-name",
        );

        let name = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(name.unwrap_or_default().starts_with("disp-start-detached-"));

        handle.shutdown().unwrap();
        assert!(!handle.is_running());
        pool.shutdown();
    }

    #[test]
    fn test_start_on_stopped_pool_fails() {
        let pool = Arc::new(crate::pool::InlinePool::new(1));
        pool.stop();
        let dispatcher = Dispatcher::new(pool, &DispatcherConfig::default());
        let handle = dispatcher.handle();

        assert!(dispatcher.start().is_err());
        assert!(!handle.is_running());
    }

    #[test]
    fn test_idle_loop_exits_when_pool_stops() {
        let pool = Arc::new(crate::pool::InlinePool::new(1));
        let handle = Dispatcher::new(pool.clone(), &DispatcherConfig::default())
            .start()
            .unwrap();

        // Let the loop reach its untimed idle wait
        thread::sleep(Duration::from_millis(20));
        assert!(handle.is_running());

        pool.stop();
        let deadline = Instant::now() + Duration::from_secs(2);
        while handle.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!handle.is_running());
    }
}
