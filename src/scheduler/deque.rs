//! Per-worker work-stealing deque.
//!
//! The owning worker pushes and pops the tail (LIFO — the hottest task
//! in cache runs first); thieves pop the head (FIFO — the oldest task
//! moves to another core). Access is serialized by a per-deque mutex;
//! a Chase–Lev deque could replace this with the same contract.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use super::priority::TaskFn;

/// A double-ended task queue owned by one worker.
///
/// Cloning shares the underlying deque; [`stealer`](Self::stealer)
/// produces the thief-side handle.
#[derive(Clone)]
pub struct WorkerDeque {
    inner: Arc<Mutex<VecDeque<TaskFn>>>,
}

impl WorkerDeque {
    /// Creates an empty deque.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Pushes a task onto the owner end.
    #[inline]
    pub fn push(&self, task: TaskFn) {
        self.inner.lock().push_back(task);
    }

    /// Pushes several tasks under a single lock acquisition.
    #[inline]
    pub fn push_many(&self, tasks: impl IntoIterator<Item = TaskFn>) {
        let mut deque = self.inner.lock();
        deque.extend(tasks);
    }

    /// Pops the most recently pushed task (owner side, LIFO).
    #[inline]
    #[must_use]
    pub fn pop(&self) -> Option<TaskFn> {
        self.inner.lock().pop_back()
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if no tasks are queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Creates a thief-side handle for this deque.
    #[must_use]
    pub fn stealer(&self) -> Stealer {
        Stealer {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for WorkerDeque {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WorkerDeque {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDeque")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// A handle to steal tasks from another worker's deque.
#[derive(Clone)]
pub struct Stealer {
    inner: Arc<Mutex<VecDeque<TaskFn>>>,
}

impl Stealer {
    /// Pops the oldest task (thief side, FIFO).
    #[inline]
    #[must_use]
    pub fn steal(&self) -> Option<TaskFn> {
        self.inner.lock().pop_front()
    }
}

impl std::fmt::Debug for Stealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stealer").finish_non_exhaustive()
    }
}
