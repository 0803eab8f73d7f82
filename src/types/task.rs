//! Task state machine.
//!
//! Within a single run, state transitions are monotone:
//!
//! ```text
//! Ready ──► Running ──► { Completed, Failed, Cancelled }
//!   ▲          │
//!   │          ▼
//!   └──── Suspended
//! ```
//!
//! A task that is re-queued (e.g. suspended and resumed) restarts at
//! `Ready`. Terminal states never change. [`TaskStateCell`] enforces
//! these rules atomically so the executor and a joiner can race on the
//! same cell without locks.

use core::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle state of a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TaskState {
    /// Queued, waiting for a worker.
    Ready = 0,
    /// Currently executing on a worker.
    Running = 1,
    /// Parked; will restart at `Ready` when resumed.
    Suspended = 2,
    /// Finished successfully. Terminal.
    Completed = 3,
    /// Removed before execution. Terminal.
    Cancelled = 4,
    /// The callable panicked. Terminal.
    Failed = 5,
}

impl TaskState {
    /// Returns `true` for states a task can never leave.
    #[inline]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }

    /// Returns `true` if a task may move from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Ready => matches!(next, Self::Running | Self::Cancelled),
            Self::Running => matches!(
                next,
                Self::Suspended | Self::Completed | Self::Failed | Self::Cancelled
            ),
            Self::Suspended => matches!(next, Self::Ready | Self::Cancelled),
            Self::Completed | Self::Cancelled | Self::Failed => false,
        }
    }

    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Ready,
            1 => Self::Running,
            2 => Self::Suspended,
            3 => Self::Completed,
            4 => Self::Cancelled,
            _ => Self::Failed,
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Suspended => "suspended",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Atomic holder for a task's state that enforces monotone transitions.
#[derive(Debug)]
pub struct TaskStateCell {
    state: AtomicU8,
}

impl TaskStateCell {
    /// Creates a cell starting at [`TaskState::Ready`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(TaskState::Ready as u8),
        }
    }

    /// Returns the current state.
    #[inline]
    #[must_use]
    pub fn get(&self) -> TaskState {
        TaskState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Attempts to move to `next`.
    ///
    /// Returns `true` if the transition was legal and applied. Illegal
    /// transitions (including any move out of a terminal state) leave
    /// the cell unchanged and return `false`.
    pub fn transition_to(&self, next: TaskState) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            if !TaskState::from_u8(current).can_transition_to(next) {
                return false;
            }
            match self.state.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }
}

impl Default for TaskStateCell {
    fn default() -> Self {
        Self::new()
    }
}
