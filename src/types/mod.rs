//! Core identifier and task types shared across the schedulers.

mod task;

pub use task::{TaskState, TaskStateCell};

use core::fmt;

/// Task priority. Larger values are more urgent.
///
/// The priority heap dispatches strictly by descending priority; within
/// equal priority, earlier schedule times run first.
pub type Priority = i32;

/// Identifier for a scheduled task.
///
/// Unique for the lifetime of the scheduler instance that issued it
/// (monotone counter, never reused).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
    /// Creates a task id from its raw counter value.
    #[inline]
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw counter value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TaskId({})", self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
