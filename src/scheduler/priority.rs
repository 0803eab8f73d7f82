//! Priority scheduler with delay support.
//!
//! A fixed pool of workers drains a mutex-guarded max-heap of task
//! entries. Ordering is strict: higher priority first, then earlier
//! schedule time, then submission order (stable tie-break). Delayed
//! entries hold workers in bounded condvar waits until they come due.
//!
//! Dispatch order is only guaranteed at the single-worker level: two
//! workers popping back-to-back may finish in either order.

use crate::cancel::CancellationToken;
use crate::config::SchedulerConfig;
use crate::error::{Error, ErrorKind};
use crate::tracing_compat::{error, trace};
use crate::types::{Priority, TaskId};
use parking_lot::{Condvar, Mutex};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// The callable shape accepted by the schedulers.
pub type TaskFn = Box<dyn FnOnce() + Send + 'static>;

/// A pending task in the heap.
struct Entry {
    priority: Priority,
    run_at: Instant,
    /// Submission order; doubles as the stable tie-break.
    id: TaskId,
    token: CancellationToken,
    func: TaskFn,
}

impl Entry {
    /// Ordering key: priority descending, then run time ascending, then
    /// submission order ascending.
    fn key_cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.run_at.cmp(&self.run_at))
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key_cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key_cmp(other)
    }
}

struct State {
    heap: BinaryHeap<Entry>,
    stopping: bool,
}

struct Shared {
    state: Mutex<State>,
    work_available: Condvar,
}

/// A delay-aware, cancellable priority scheduler over a fixed worker
/// pool.
///
/// ```
/// use taskmill::scheduler::PriorityScheduler;
/// use std::sync::mpsc;
///
/// let scheduler = PriorityScheduler::new(2);
/// let (tx, rx) = mpsc::channel();
/// scheduler.schedule(move || tx.send(42).unwrap(), 0).unwrap();
/// assert_eq!(rx.recv().unwrap(), 42);
/// ```
///
/// Dropping the scheduler stops the workers, joins them, and discards
/// any entries still in the heap without executing them.
pub struct PriorityScheduler {
    shared: Arc<Shared>,
    workers: Vec<thread::JoinHandle<()>>,
    next_id: AtomicU64,
}

impl PriorityScheduler {
    /// Creates a scheduler with `worker_threads` workers.
    ///
    /// Zero workers is accepted: submissions queue but nothing runs.
    #[must_use]
    pub fn new(worker_threads: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                heap: BinaryHeap::new(),
                stopping: false,
            }),
            work_available: Condvar::new(),
        });

        let workers = (0..worker_threads)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("taskmill-priority-{index}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("failed to spawn priority worker")
            })
            .collect();

        Self {
            shared,
            workers,
            next_id: AtomicU64::new(0),
        }
    }

    /// Creates a scheduler from a validated configuration.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidConfig`] if validation fails.
    pub fn with_config(config: &SchedulerConfig) -> Result<Self, Error> {
        config
            .validate()
            .map_err(|err| Error::with_detail(ErrorKind::InvalidConfig, err.to_string()))?;
        Ok(Self::new(config.worker_threads))
    }

    /// Schedules `func` to run as soon as a worker is free.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::SchedulerStopped`] if the scheduler has shut down.
    pub fn schedule<F>(&self, func: F, priority: Priority) -> Result<TaskId, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(func, Instant::now(), priority)
    }

    /// Schedules `func` to run no earlier than `delay` from now.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::SchedulerStopped`] if the scheduler has shut down.
    pub fn schedule_after<F>(
        &self,
        func: F,
        delay: Duration,
        priority: Priority,
    ) -> Result<TaskId, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule_at(func, Instant::now() + delay, priority)
    }

    /// Schedules `func` to run no earlier than `run_at`.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::SchedulerStopped`] if the scheduler has shut down.
    pub fn schedule_at<F>(
        &self,
        func: F,
        run_at: Instant,
        priority: Priority,
    ) -> Result<TaskId, Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let id = TaskId::from_raw(self.next_id.fetch_add(1, AtomicOrdering::Relaxed));
        let entry = Entry {
            priority,
            run_at,
            id,
            token: CancellationToken::new(),
            func: Box::new(func),
        };

        {
            let mut state = self.shared.state.lock();
            if state.stopping {
                return Err(Error::new(ErrorKind::SchedulerStopped));
            }
            state.heap.push(entry);
        }
        self.shared.work_available.notify_one();
        Ok(id)
    }

    /// Removes the pending task with the given id.
    ///
    /// Returns `true` if the task was still pending and is now removed
    /// (its cancellation token is tripped); `false` if it already ran,
    /// is running, or was cancelled before. Ordering of the remaining
    /// entries is preserved.
    pub fn cancel(&self, id: TaskId) -> bool {
        let removed = {
            let mut state = self.shared.state.lock();
            let mut entries = std::mem::take(&mut state.heap).into_vec();
            let removed = entries
                .iter()
                .position(|entry| entry.id == id)
                .map(|pos| entries.swap_remove(pos));
            state.heap = BinaryHeap::from(entries);
            removed
        };

        match removed {
            Some(entry) => {
                entry.token.cancel();
                trace!(task_id = %id, "cancelled pending task");
                true
            }
            None => false,
        }
    }

    /// Number of tasks waiting in the heap (due or delayed).
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.shared.state.lock().heap.len()
    }

    /// Number of worker threads.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for PriorityScheduler {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.stopping = true;
        }
        self.shared.work_available.notify_all();
        // A task can hold the last handle to its own scheduler, running
        // this drop on a worker thread; that worker is detached instead
        // of self-joined and exits once it observes the stop flag.
        let current = thread::current().id();
        for worker in self.workers.drain(..) {
            if worker.thread().id() == current {
                drop(worker);
            } else {
                let _ = worker.join();
            }
        }
        // Discard whatever is left without executing it.
        let mut state = self.shared.state.lock();
        let discarded = state.heap.len();
        state.heap.clear();
        if discarded > 0 {
            trace!(discarded, "discarded pending tasks at shutdown");
        }
    }
}

impl std::fmt::Debug for PriorityScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityScheduler")
            .field("workers", &self.workers.len())
            .field("pending", &self.pending_tasks())
            .finish_non_exhaustive()
    }
}

/// Worker loop: wait until stopping or the top entry is due, pop it,
/// run it outside the lock.
fn worker_loop(shared: &Shared) {
    let mut state = shared.state.lock();
    loop {
        if state.stopping {
            return;
        }
        let now = Instant::now();
        match state.heap.peek() {
            None => {
                shared.work_available.wait(&mut state);
            }
            Some(top) if top.run_at <= now => {
                let entry = state.heap.pop().expect("peeked entry vanished");
                drop(state);
                run_entry(entry);
                state = shared.state.lock();
            }
            Some(top) => {
                // Bounded wait until the earliest entry comes due; an
                // earlier submission re-signals the condvar.
                let wait = top.run_at - now;
                let _ = shared.work_available.wait_for(&mut state, wait);
            }
        }
    }
}

fn run_entry(entry: Entry) {
    let id = entry.id;
    let result = catch_unwind(AssertUnwindSafe(entry.func));
    if let Err(payload) = result {
        let err = Error::from_panic(payload.as_ref());
        error!(task_id = %id, error = %err, "task panicked; worker continues");
    }
}
