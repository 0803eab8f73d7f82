//! Error types and error handling strategy for taskmill.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Errors are classified by recoverability for retry logic
//! - User-code panics are isolated: workers never die, and a
//!   future-returning submit stores the panic for the joiner
//! - No global error state is maintained
//!
//! # Error Categories
//!
//! - **Queues**: bounded-queue conditions (`QueueFull`, `QueueEmpty`)
//! - **Deadlines**: `Timeout` on deadline-bounded operations
//! - **Schedulers**: `SchedulerStopped` for submits after shutdown
//! - **Tasks**: `TaskPanic` recorded from user callables
//! - **Memory**: `AllocationFailed` on OS memory exhaustion
//! - **Configuration**: `InvalidConfig` from config validation
//!
//! Queue and channel operations that hand a value back on failure use
//! the dedicated value-carrying types ([`EnqueueError`],
//! [`SendTimeoutError`], [`RecvTimeoutError`]) so callers never lose
//! the message they tried to send.

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Queues ===
    /// Bounded queue at capacity; recoverable by the caller.
    QueueFull,
    /// Non-blocking read on an empty queue; recoverable.
    QueueEmpty,

    // === Deadlines ===
    /// Deadline expired before the operation succeeded; recoverable.
    Timeout,

    // === Schedulers ===
    /// Submit attempted after shutdown; fatal for that submission.
    SchedulerStopped,

    // === Tasks ===
    /// A user callable panicked; recorded, never propagated into a worker.
    TaskPanic,

    // === Memory ===
    /// OS memory exhaustion; fatal.
    AllocationFailed,

    // === Configuration ===
    /// A configuration value failed validation.
    InvalidConfig,
}

impl ErrorKind {
    /// Returns `true` if the caller can reasonably retry after this error.
    #[must_use]
    pub const fn is_recoverable(self) -> bool {
        matches!(self, Self::QueueFull | Self::QueueEmpty | Self::Timeout)
    }

    const fn message(self) -> &'static str {
        match self {
            Self::QueueFull => "queue is at capacity",
            Self::QueueEmpty => "queue is empty",
            Self::Timeout => "deadline expired before the operation succeeded",
            Self::SchedulerStopped => "scheduler has been stopped",
            Self::TaskPanic => "task panicked",
            Self::AllocationFailed => "memory allocation failed",
            Self::InvalidConfig => "invalid configuration",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// An error produced by a taskmill component.
///
/// Carries a [`kind`](Self::kind) for programmatic matching and an
/// optional free-form detail for diagnostics (e.g. the message of a
/// recorded panic).
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    detail: Option<String>,
}

impl Error {
    /// Creates an error with no detail.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self { kind, detail: None }
    }

    /// Creates an error carrying a detail message.
    #[must_use]
    pub fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: Some(detail.into()),
        }
    }

    /// Creates a [`ErrorKind::TaskPanic`] error from a caught panic payload.
    ///
    /// String payloads (the overwhelmingly common case from `panic!`)
    /// are preserved as the detail; other payload types are recorded
    /// without a message.
    #[must_use]
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let detail = payload
            .downcast_ref::<&'static str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned());
        Self {
            kind: ErrorKind::TaskPanic,
            detail,
        }
    }

    /// Returns the error kind.
    #[inline]
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the detail message, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Returns `true` if the caller can reasonably retry.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        self.kind.is_recoverable()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {detail}", self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Error returned by [`MpmcQueue::try_enqueue`](crate::queue::MpmcQueue::try_enqueue).
///
/// Carries the rejected value back to the caller; a failed enqueue
/// attempt has no side effects on the queue.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError<T> {
    /// The queue was at capacity. Recoverable.
    Full(T),
    /// The node pool could not grow (OS memory exhaustion). Fatal.
    AllocationFailed(T),
}

impl<T> EnqueueError<T> {
    /// Returns the value that could not be enqueued.
    #[inline]
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::AllocationFailed(value) => value,
        }
    }

    /// Returns the matching [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Full(_) => ErrorKind::QueueFull,
            Self::AllocationFailed(_) => ErrorKind::AllocationFailed,
        }
    }
}

impl<T> fmt::Debug for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("EnqueueError::Full(..)"),
            Self::AllocationFailed(_) => f.write_str("EnqueueError::AllocationFailed(..)"),
        }
    }
}

impl<T> fmt::Display for EnqueueError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

impl<T> std::error::Error for EnqueueError<T> {}

/// Error returned by [`MpmcChannel::try_send`](crate::queue::MpmcChannel::try_send).
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum SendTimeoutError<T> {
    /// The channel was full and the timeout was zero.
    Full(T),
    /// The deadline expired with the channel still full.
    Timeout(T),
    /// The node pool could not grow (OS memory exhaustion). Fatal;
    /// never retried against the deadline.
    AllocationFailed(T),
}

impl<T> SendTimeoutError<T> {
    /// Returns the value that could not be sent.
    #[inline]
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(value) | Self::Timeout(value) | Self::AllocationFailed(value) => value,
        }
    }

    /// Returns the matching [`ErrorKind`].
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Full(_) => ErrorKind::QueueFull,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::AllocationFailed(_) => ErrorKind::AllocationFailed,
        }
    }
}

impl<T> fmt::Debug for SendTimeoutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => f.write_str("SendTimeoutError::Full(..)"),
            Self::Timeout(_) => f.write_str("SendTimeoutError::Timeout(..)"),
            Self::AllocationFailed(_) => f.write_str("SendTimeoutError::AllocationFailed(..)"),
        }
    }
}

impl<T> fmt::Display for SendTimeoutError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

impl<T> std::error::Error for SendTimeoutError<T> {}

/// Error returned by [`MpmcChannel::try_receive`](crate::queue::MpmcChannel::try_receive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    /// The channel was empty and the timeout was zero.
    Empty,
    /// The deadline expired with the channel still empty.
    Timeout,
}

impl RecvTimeoutError {
    /// Returns the matching [`ErrorKind`].
    #[must_use]
    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::Empty => ErrorKind::QueueEmpty,
            Self::Timeout => ErrorKind::Timeout,
        }
    }
}

impl fmt::Display for RecvTimeoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind())
    }
}

impl std::error::Error for RecvTimeoutError {}
