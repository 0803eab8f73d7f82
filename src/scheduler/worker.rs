//! Work-stealing worker loop.
//!
//! Each worker owns one deque and holds stealers for every peer. The
//! loop order is: own deque (LIFO), then one steal attempt from a
//! uniformly random victim, then a bounded park on the shared condvar.
//! Victim selection uses a per-worker deterministic RNG so no state is
//! shared between workers on the steal path.

use crate::error::Error;
use crate::tracing_compat::{error, trace};
use crate::util::DetRng;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use super::deque::{Stealer, WorkerDeque};

thread_local! {
    /// (scheduler identity, worker index) for the current thread, when
    /// it is a work-stealing worker. The identity guards against a
    /// worker of one scheduler submitting into another.
    static CURRENT_WORKER: Cell<Option<(usize, usize)>> = const { Cell::new(None) };
}

/// State shared between the scheduler handle and its workers.
pub(super) struct WsShared {
    /// Gates every worker loop; cleared once at shutdown.
    pub(super) running: AtomicBool,
    /// Idle workers park here between probes.
    pub(super) idle_lock: Mutex<()>,
    pub(super) work_available: Condvar,
    /// Per-worker executed-task counters.
    pub(super) completed: Vec<AtomicU64>,
    /// Upper bound on one idle park.
    pub(super) park_timeout: Duration,
}

impl WsShared {
    /// Identity token distinguishing scheduler instances in TLS.
    pub(super) fn token(self: &std::sync::Arc<Self>) -> usize {
        std::sync::Arc::as_ptr(self) as usize
    }
}

/// Returns the worker index bound to this thread, when the thread
/// belongs to the scheduler identified by `token`.
pub(super) fn current_worker_index(token: usize) -> Option<usize> {
    CURRENT_WORKER.with(|slot| match slot.get() {
        Some((bound_token, index)) if bound_token == token => Some(index),
        _ => None,
    })
}

/// A work-stealing worker, moved onto its thread at scheduler start.
pub(super) struct Worker {
    pub(super) index: usize,
    pub(super) deque: WorkerDeque,
    /// Stealers for all deques, self included; victim selection skips
    /// the worker's own index.
    pub(super) stealers: Vec<Stealer>,
    pub(super) shared: std::sync::Arc<WsShared>,
    pub(super) rng: DetRng,
}

impl Worker {
    /// Runs the scheduling loop until shutdown.
    pub(super) fn run(mut self) {
        let token = self.shared.token();
        CURRENT_WORKER.with(|slot| slot.set(Some((token, self.index))));

        while self.shared.running.load(Ordering::Acquire) {
            if let Some(task) = self.deque.pop() {
                self.execute(task);
                continue;
            }
            if let Some(task) = self.try_steal() {
                self.execute(task);
                continue;
            }
            self.park();
        }

        CURRENT_WORKER.with(Cell::take);
        trace!(worker = self.index, "work-stealing worker stopped");
    }

    /// One steal attempt from a uniformly random victim other than self.
    fn try_steal(&mut self) -> Option<super::priority::TaskFn> {
        let peers = self.stealers.len();
        if peers < 2 {
            return None;
        }
        let mut victim = self.rng.next_index(peers - 1);
        if victim >= self.index {
            victim += 1;
        }
        let stolen = self.stealers[victim].steal();
        if stolen.is_some() {
            trace!(worker = self.index, victim, "stole a task");
        }
        stolen
    }

    fn execute(&self, task: super::priority::TaskFn) {
        let result = catch_unwind(AssertUnwindSafe(task));
        if let Err(payload) = result {
            let err = Error::from_panic(payload.as_ref());
            error!(worker = self.index, error = %err, "task panicked; worker continues");
        }
        self.shared.completed[self.index].fetch_add(1, Ordering::Relaxed);
    }

    /// Bounded idle park; a submit signal or the timeout wakes us to
    /// re-probe.
    fn park(&self) {
        let mut guard = self.shared.idle_lock.lock();
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        let _ = self
            .shared
            .work_available
            .wait_for(&mut guard, self.shared.park_timeout);
    }
}
