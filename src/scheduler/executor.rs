//! Future-returning executor over the priority scheduler.
//!
//! [`ThreadPoolExecutor`] wraps each submitted callable in a shim that
//! fulfils a shared completion slot, then forwards to a
//! [`PriorityScheduler`](crate::scheduler::PriorityScheduler). The
//! returned [`JoinHandle`] blocks until the slot is filled and carries
//! either the result or the recorded fault:
//!
//! - a user panic is caught on the worker and surfaced to the joiner as
//!   [`ErrorKind::TaskPanic`];
//! - a task discarded at shutdown before running surfaces as
//!   [`ErrorKind::SchedulerStopped`].
//!
//! Submissions beyond the pending bound fail fast with
//! [`ErrorKind::QueueFull`].

use crate::config::ExecutorConfig;
use crate::error::{Error, ErrorKind};
use crate::scheduler::PriorityScheduler;
use crate::types::{Priority, TaskId, TaskState, TaskStateCell};
use parking_lot::{Condvar, Mutex};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Shared completion slot between a running task and its joiner.
struct Completion<R> {
    slot: Mutex<Option<Result<R, Error>>>,
    filled: Condvar,
    state: TaskStateCell,
}

impl<R> Completion<R> {
    fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            filled: Condvar::new(),
            state: TaskStateCell::new(),
        }
    }

    fn fill(&self, result: Result<R, Error>) {
        let mut slot = self.slot.lock();
        *slot = Some(result);
        drop(slot);
        self.filled.notify_all();
    }
}

/// Owning handle to a submitted task's result.
///
/// Created by [`ThreadPoolExecutor::submit`] and friends. Joining
/// blocks until the task reaches a terminal state.
pub struct JoinHandle<R> {
    completion: Arc<Completion<R>>,
    id: TaskId,
}

impl<R> JoinHandle<R> {
    /// The id assigned to the underlying task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Current lifecycle state of the task.
    #[must_use]
    pub fn state(&self) -> TaskState {
        self.completion.state.get()
    }

    /// Blocks until the task completes and returns its result.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::TaskPanic`] if the callable panicked (the panic
    /// message is preserved as the error detail when it was a string);
    /// [`ErrorKind::SchedulerStopped`] if the task was discarded at
    /// shutdown before running.
    pub fn join(self) -> Result<R, Error> {
        let mut slot = self.completion.slot.lock();
        while slot.is_none() {
            self.completion.filled.wait(&mut slot);
        }
        slot.take().expect("completion slot emptied while held")
    }

    /// Non-blocking variant of [`join`](Self::join).
    ///
    /// Returns `None` while the task has not reached a terminal state.
    pub fn try_join(&mut self) -> Option<Result<R, Error>> {
        self.completion.slot.lock().take()
    }
}

impl<R> std::fmt::Debug for JoinHandle<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinHandle")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Fills the completion slot if the task shim is dropped without
/// running (cancellation or shutdown discard).
struct CompletionGuard<R> {
    completion: Arc<Completion<R>>,
    armed: bool,
}

impl<R> CompletionGuard<R> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl<R> Drop for CompletionGuard<R> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.completion.state.transition_to(TaskState::Cancelled);
        self.completion.fill(Err(Error::with_detail(
            ErrorKind::SchedulerStopped,
            "task discarded before execution",
        )));
    }
}

/// A thread pool presenting a future-returning `submit` surface with
/// priority and delay variants.
///
/// ```
/// use taskmill::scheduler::ThreadPoolExecutor;
///
/// let executor = ThreadPoolExecutor::new(2);
/// let doubled = executor.submit(|| 21 * 2).unwrap();
/// assert_eq!(doubled.join().unwrap(), 42);
/// ```
pub struct ThreadPoolExecutor {
    scheduler: PriorityScheduler,
    max_queue: usize,
}

impl ThreadPoolExecutor {
    /// Creates an executor with `worker_threads` workers and the
    /// default pending bound of 10 000.
    #[must_use]
    pub fn new(worker_threads: usize) -> Self {
        Self::with_queue_bound(worker_threads, ExecutorConfig::default().max_queue)
    }

    /// Creates an executor with an explicit pending-task bound.
    ///
    /// # Panics
    ///
    /// Panics if `max_queue` is zero.
    #[must_use]
    pub fn with_queue_bound(worker_threads: usize, max_queue: usize) -> Self {
        assert!(max_queue > 0, "executor queue bound must be non-zero");
        Self {
            scheduler: PriorityScheduler::new(worker_threads),
            max_queue,
        }
    }

    /// Creates an executor from a validated configuration.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidConfig`] if validation fails.
    pub fn with_config(config: &ExecutorConfig) -> Result<Self, Error> {
        config
            .validate()
            .map_err(|err| Error::with_detail(ErrorKind::InvalidConfig, err.to_string()))?;
        Ok(Self {
            scheduler: PriorityScheduler::new(config.worker_threads),
            max_queue: config.max_queue,
        })
    }

    /// Submits a callable at default priority.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::QueueFull`] when the pending bound is reached;
    /// [`ErrorKind::SchedulerStopped`] after shutdown.
    pub fn submit<F, R>(&self, func: F) -> Result<JoinHandle<R>, Error>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_inner(func, 0, Instant::now())
    }

    /// Submits a callable with an explicit priority (larger = more
    /// urgent).
    ///
    /// # Errors
    ///
    /// As for [`submit`](Self::submit).
    pub fn submit_with_priority<F, R>(
        &self,
        priority: Priority,
        func: F,
    ) -> Result<JoinHandle<R>, Error>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_inner(func, priority, Instant::now())
    }

    /// Submits a callable to run no earlier than `delay` from now.
    ///
    /// # Errors
    ///
    /// As for [`submit`](Self::submit).
    pub fn schedule_after<F, R>(&self, delay: Duration, func: F) -> Result<JoinHandle<R>, Error>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.submit_inner(func, 0, Instant::now() + delay)
    }

    fn submit_inner<F, R>(
        &self,
        func: F,
        priority: Priority,
        run_at: Instant,
    ) -> Result<JoinHandle<R>, Error>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.scheduler.pending_tasks() >= self.max_queue {
            return Err(Error::new(ErrorKind::QueueFull));
        }

        let completion = Arc::new(Completion::new());
        let mut guard = CompletionGuard {
            completion: Arc::clone(&completion),
            armed: true,
        };

        let shim = move || {
            guard.disarm();
            let completion = Arc::clone(&guard.completion);
            completion.state.transition_to(TaskState::Running);
            match catch_unwind(AssertUnwindSafe(func)) {
                Ok(value) => {
                    completion.state.transition_to(TaskState::Completed);
                    completion.fill(Ok(value));
                }
                Err(payload) => {
                    completion.state.transition_to(TaskState::Failed);
                    completion.fill(Err(Error::from_panic(payload.as_ref())));
                }
            }
        };

        let id = self.scheduler.schedule_at(shim, run_at, priority)?;
        Ok(JoinHandle { completion, id })
    }

    /// Number of tasks waiting for dispatch.
    #[must_use]
    pub fn queue_size(&self) -> usize {
        self.scheduler.pending_tasks()
    }

    /// Number of worker threads.
    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.scheduler.worker_count()
    }
}

impl std::fmt::Debug for ThreadPoolExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadPoolExecutor")
            .field("threads", &self.thread_count())
            .field("queued", &self.queue_size())
            .field("max_queue", &self.max_queue)
            .finish_non_exhaustive()
    }
}
