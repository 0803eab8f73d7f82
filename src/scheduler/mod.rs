//! Task schedulers.
//!
//! - [`PriorityScheduler`] — strict priority/time ordering over a
//!   mutex-guarded heap; delay-aware and cancellable.
//! - [`ThreadPoolExecutor`] — future-returning submit surface wrapping
//!   the priority scheduler.
//! - [`WorkStealingScheduler`] — low-latency dispatch for many small
//!   tasks: per-worker deques, LIFO own-pops, FIFO steals, random
//!   victim selection. Priority here is only a hint; strict-priority
//!   workloads belong on the [`PriorityScheduler`].

pub mod deque;
pub mod executor;
pub mod priority;
mod worker;

pub use deque::{Stealer, WorkerDeque};
pub use executor::{JoinHandle, ThreadPoolExecutor};
pub use priority::{PriorityScheduler, TaskFn};

use crate::config::WorkStealingConfig;
use crate::error::{Error, ErrorKind};
use crate::types::Priority;
use crate::util::DetRng;
use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use worker::{current_worker_index, Worker, WsShared};

/// A work-stealing scheduler over `N` workers with per-worker deques.
///
/// Submissions from a worker thread land on that worker's own deque
/// (tail end); submissions from outside round-robin across deques. An
/// idle worker first drains its own deque LIFO, then steals FIFO from
/// a random victim, then parks for a bounded interval.
///
/// The only ordering guarantee is that every submitted task eventually
/// runs unless the scheduler is dropped first.
///
/// ```
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
/// use taskmill::scheduler::WorkStealingScheduler;
///
/// let scheduler = WorkStealingScheduler::new(2);
/// let counter = Arc::new(AtomicUsize::new(0));
/// for _ in 0..100 {
///     let counter = Arc::clone(&counter);
///     scheduler.submit(move || {
///         counter.fetch_add(1, Ordering::SeqCst);
///     });
/// }
/// # while counter.load(Ordering::SeqCst) < 100 { std::thread::yield_now(); }
/// ```
pub struct WorkStealingScheduler {
    shared: Arc<WsShared>,
    deques: Vec<WorkerDeque>,
    threads: Vec<thread::JoinHandle<()>>,
    /// Round-robin cursor for submissions from non-worker threads.
    next_external: AtomicUsize,
}

impl WorkStealingScheduler {
    /// Creates a scheduler with `worker_threads` workers.
    ///
    /// # Panics
    ///
    /// Panics if `worker_threads` is zero; a deque-less scheduler has
    /// nowhere to put work. Use [`with_config`](Self::with_config) for
    /// a non-panicking construction path.
    #[must_use]
    pub fn new(worker_threads: usize) -> Self {
        assert!(worker_threads > 0, "work stealing requires at least one worker");
        Self::build(worker_threads, WorkStealingConfig::default().park_timeout)
    }

    /// Creates a scheduler from a validated configuration.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::InvalidConfig`] if validation fails.
    pub fn with_config(config: &WorkStealingConfig) -> Result<Self, Error> {
        config
            .validate()
            .map_err(|err| Error::with_detail(ErrorKind::InvalidConfig, err.to_string()))?;
        Ok(Self::build(config.worker_threads, config.park_timeout))
    }

    fn build(worker_threads: usize, park_timeout: Duration) -> Self {
        let shared = Arc::new(WsShared {
            running: AtomicBool::new(true),
            idle_lock: Mutex::new(()),
            work_available: Condvar::new(),
            completed: (0..worker_threads).map(|_| AtomicU64::new(0)).collect(),
            park_timeout,
        });

        let deques: Vec<WorkerDeque> = (0..worker_threads).map(|_| WorkerDeque::new()).collect();
        let stealers: Vec<Stealer> = deques.iter().map(WorkerDeque::stealer).collect();

        // Indices are fixed here, before any thread starts; each worker
        // binds its index in TLS at the top of its loop.
        let threads = (0..worker_threads)
            .map(|index| {
                let worker = Worker {
                    index,
                    deque: deques[index].clone(),
                    stealers: stealers.clone(),
                    shared: Arc::clone(&shared),
                    rng: DetRng::new(index as u64 + 1),
                };
                thread::Builder::new()
                    .name(format!("taskmill-steal-{index}"))
                    .spawn(move || worker.run())
                    .expect("failed to spawn work-stealing worker")
            })
            .collect();

        Self {
            shared,
            deques,
            threads,
            next_external: AtomicUsize::new(0),
        }
    }

    /// Submits a task.
    ///
    /// Called from one of this scheduler's workers, the task lands on
    /// that worker's own deque; otherwise deques are picked round-robin.
    pub fn submit<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let index = self.submit_index();
        self.deques[index].push(Box::new(task));
        self.shared.work_available.notify_one();
    }

    /// Submits a task with a priority hint.
    ///
    /// Priority here is cooperative, not strict: a non-positive
    /// priority (at or below the default) makes the executing worker
    /// yield once before running the task, giving more urgent work a
    /// chance to go first. Workloads needing strict ordering belong on
    /// the [`PriorityScheduler`].
    pub fn submit_with_priority<F>(&self, task: F, priority: Priority)
    where
        F: FnOnce() + Send + 'static,
    {
        if yields_before_run(priority) {
            self.submit(move || {
                thread::yield_now();
                task();
            });
        } else {
            self.submit(task);
        }
    }

    /// Submits a batch, striping roughly `n / workers` tasks per deque.
    pub fn submit_batch<I, F>(&self, tasks: I)
    where
        I: IntoIterator<Item = F>,
        F: FnOnce() + Send + 'static,
    {
        let tasks: Vec<TaskFn> = tasks
            .into_iter()
            .map(|task| Box::new(task) as TaskFn)
            .collect();
        if tasks.is_empty() {
            return;
        }

        let workers = self.deques.len();
        let base = tasks.len() / workers;
        let remainder = tasks.len() % workers;
        let start = self.submit_index();

        let mut iter = tasks.into_iter();
        for offset in 0..workers {
            let take = base + usize::from(offset < remainder);
            if take == 0 {
                continue;
            }
            let mut stripe: SmallVec<[TaskFn; 8]> = SmallVec::with_capacity(take);
            for _ in 0..take {
                stripe.push(iter.next().expect("stripe arithmetic out of sync"));
            }
            self.deques[(start + offset) % workers].push_many(stripe);
        }
        self.shared.work_available.notify_all();
    }

    /// Total tasks currently queued across all deques. Observational.
    #[must_use]
    pub fn active_tasks(&self) -> usize {
        self.deques.iter().map(WorkerDeque::len).sum()
    }

    /// Per-worker counts of executed tasks. Observational.
    #[must_use]
    pub fn completed_counts(&self) -> Vec<u64> {
        self.shared
            .completed
            .iter()
            .map(|count| count.load(Ordering::Relaxed))
            .collect()
    }

    /// Number of workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.deques.len()
    }

    /// Deque index for the calling thread: its own when it is one of
    /// this scheduler's workers, round-robin otherwise.
    fn submit_index(&self) -> usize {
        current_worker_index(self.shared.token()).unwrap_or_else(|| {
            self.next_external.fetch_add(1, Ordering::Relaxed) % self.deques.len()
        })
    }
}

/// Whether a priority hint earns a cooperative yield before the task
/// runs. Non-positive priorities are at or below the default and step
/// aside once for more urgent work.
const fn yields_before_run(priority: Priority) -> bool {
    priority <= 0
}

impl Drop for WorkStealingScheduler {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.work_available.notify_all();
        // A task can hold the last handle to its own scheduler, running
        // this drop on a worker thread; that worker is detached instead
        // of self-joined and exits once it observes the stop flag.
        let current = thread::current().id();
        for handle in self.threads.drain(..) {
            if handle.thread().id() == current {
                drop(handle);
            } else {
                let _ = handle.join();
            }
        }
        // Tasks still queued are dropped with the deques.
    }
}

impl std::fmt::Debug for WorkStealingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkStealingScheduler")
            .field("workers", &self.deques.len())
            .field("active_tasks", &self.active_tasks())
            .finish_non_exhaustive()
    }
}
