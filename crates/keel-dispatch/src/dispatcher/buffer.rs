//! Per-producer staging buffers
//!
//! Each producer appends to its own buffer, so submitters only ever contend
//! with the dispatch thread, and only while it moves the contents out.

use crate::dispatcher::{Task, TaskGroup};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Central queues, one per group
pub(crate) type GroupQueues = [Vec<Task>; TaskGroup::COUNT];

#[derive(Default)]
struct Pending {
    groups: GroupQueues,
    scheduled: Vec<Task>,
}

/// Staging area owned by one producer
#[derive(Default)]
pub(crate) struct ProducerBuffer {
    pending: Mutex<Pending>,
    retired: AtomicBool,
}

impl ProducerBuffer {
    pub(crate) fn push(&self, group: TaskGroup, task: Task) {
        self.pending.lock().groups[group.index()].push(task);
    }

    pub(crate) fn push_scheduled(&self, task: Task) {
        self.pending.lock().scheduled.push(task);
    }

    /// Move every pending task out, keeping submission order per group
    pub(crate) fn take_all(&self, queues: &mut GroupQueues, scheduled: &mut Vec<Task>) {
        let mut pending = self.pending.lock();
        for (queue, staged) in queues.iter_mut().zip(pending.groups.iter_mut()) {
            queue.append(staged);
        }
        scheduled.append(&mut pending.scheduled);
    }

    /// Move pending parallel-group tasks out
    pub(crate) fn take_parallel(&self, queues: &mut GroupQueues) {
        let mut pending = self.pending.lock();
        for group in TaskGroup::ALL.iter().filter(|g| g.is_parallel()) {
            queues[group.index()].append(&mut pending.groups[group.index()]);
        }
    }

    /// Move pending scheduled tasks out
    pub(crate) fn take_scheduled(&self, scheduled: &mut Vec<Task>) {
        scheduled.append(&mut self.pending.lock().scheduled);
    }

    pub(crate) fn is_empty(&self) -> bool {
        let pending = self.pending.lock();
        pending.scheduled.is_empty() && pending.groups.iter().all(Vec::is_empty)
    }

    /// Mark the buffer as abandoned by its producer
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::Release);
    }

    pub(crate) fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }
}

/// Every live producer buffer, in registration order
#[derive(Default)]
pub(crate) struct BufferRegistry {
    buffers: RwLock<Vec<Arc<ProducerBuffer>>>,

    /// Set when some buffer was retired since the last prune
    has_retired: AtomicBool,
}

impl BufferRegistry {
    /// Create and register a new buffer
    pub(crate) fn register(&self) -> Arc<ProducerBuffer> {
        let buffer = Arc::new(ProducerBuffer::default());
        self.buffers.write().push(buffer.clone());
        buffer
    }

    /// Visit every buffer in registration order
    pub(crate) fn for_each(&self, mut f: impl FnMut(&ProducerBuffer)) {
        for buffer in self.buffers.read().iter() {
            f(buffer);
        }
    }

    /// Note that a buffer was retired so the next prune looks for it
    pub(crate) fn note_retired(&self) {
        self.has_retired.store(true, Ordering::Release);
    }

    /// Unregister retired buffers that have been fully drained.
    ///
    /// Returns how many were removed.
    pub(crate) fn prune_retired(&self) -> usize {
        if !self.has_retired.swap(false, Ordering::AcqRel) {
            return 0;
        }

        let mut buffers = self.buffers.write();
        let before = buffers.len();
        let mut kept_retired = false;
        buffers.retain(|buffer| {
            if !buffer.is_retired() {
                return true;
            }
            let keep = !buffer.is_empty();
            kept_retired |= keep;
            keep
        });
        if kept_retired {
            self.has_retired.store(true, Ordering::Release);
        }
        before - buffers.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.buffers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(label: &'static str) -> Task {
        Task::new(label, |_| {})
    }

    fn labels(tasks: &[Task]) -> Vec<&'static str> {
        tasks.iter().map(Task::context).collect()
    }

    #[test]
    fn test_take_all_preserves_order() {
        let buffer = ProducerBuffer::default();
        buffer.push(TaskGroup::Serial, task("a"));
        buffer.push(TaskGroup::Walk, task("w"));
        buffer.push(TaskGroup::Serial, task("b"));
        buffer.push_scheduled(Task::delayed(Duration::from_secs(1), "later", |_| {}));
        assert!(!buffer.is_empty());

        let mut queues = GroupQueues::default();
        let mut scheduled = Vec::new();
        buffer.take_all(&mut queues, &mut scheduled);

        assert_eq!(labels(&queues[TaskGroup::Serial.index()]), vec!["a", "b"]);
        assert_eq!(labels(&queues[TaskGroup::Walk.index()]), vec!["w"]);
        assert!(queues[TaskGroup::GenericParallel.index()].is_empty());
        assert_eq!(labels(&scheduled), vec!["later"]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_take_all_appends_after_existing() {
        let buffer = ProducerBuffer::default();
        let mut queues = GroupQueues::default();
        queues[TaskGroup::Serial.index()].push(task("old"));

        buffer.push(TaskGroup::Serial, task("new"));
        buffer.take_all(&mut queues, &mut Vec::new());

        assert_eq!(labels(&queues[TaskGroup::Serial.index()]), vec!["old", "new"]);
    }

    #[test]
    fn test_take_parallel_leaves_serial() {
        let buffer = ProducerBuffer::default();
        buffer.push(TaskGroup::Serial, task("s"));
        buffer.push(TaskGroup::GenericParallel, task("p"));
        buffer.push(TaskGroup::Walk, task("w"));

        let mut queues = GroupQueues::default();
        buffer.take_parallel(&mut queues);

        assert!(queues[TaskGroup::Serial.index()].is_empty());
        assert_eq!(labels(&queues[TaskGroup::GenericParallel.index()]), vec!["p"]);
        assert_eq!(labels(&queues[TaskGroup::Walk.index()]), vec!["w"]);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_take_scheduled() {
        let buffer = ProducerBuffer::default();
        buffer.push(TaskGroup::Serial, task("s"));
        buffer.push_scheduled(task("t"));

        let mut scheduled = Vec::new();
        buffer.take_scheduled(&mut scheduled);
        assert_eq!(labels(&scheduled), vec!["t"]);
        assert!(!buffer.is_empty());
    }

    #[test]
    fn test_registry_order_and_prune() {
        let registry = BufferRegistry::default();
        let first = registry.register();
        let second = registry.register();
        let third = registry.register();
        assert_eq!(registry.len(), 3);

        first.push(TaskGroup::Serial, task("1"));
        second.push(TaskGroup::Serial, task("2"));
        third.push(TaskGroup::Serial, task("3"));

        let mut queues = GroupQueues::default();
        registry.for_each(|buffer| buffer.take_all(&mut queues, &mut Vec::new()));
        assert_eq!(labels(&queues[TaskGroup::Serial.index()]), vec!["1", "2", "3"]);

        // Nothing retired yet
        assert_eq!(registry.prune_retired(), 0);

        second.retire();
        registry.note_retired();
        assert_eq!(registry.prune_retired(), 1);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_retired_buffer_kept_until_drained() {
        let registry = BufferRegistry::default();
        let buffer = registry.register();
        buffer.push(TaskGroup::Serial, task("last words"));
        buffer.retire();
        registry.note_retired();

        assert_eq!(registry.prune_retired(), 0);
        assert_eq!(registry.len(), 1);

        let mut queues = GroupQueues::default();
        registry.for_each(|b| b.take_all(&mut queues, &mut Vec::new()));
        assert_eq!(registry.prune_retired(), 1);
        assert_eq!(registry.len(), 0);
        assert_eq!(labels(&queues[TaskGroup::Serial.index()]), vec!["last words"]);
    }
}
