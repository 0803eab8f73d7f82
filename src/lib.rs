//! Work-stealing and priority task scheduling over lock-free MPMC queues
//! and a typed slab pool.
//!
//! taskmill is built from three tightly coupled layers, leaves first:
//!
//! 1. [`pool::MemoryPool`] — a typed slab allocator with a mutex-guarded
//!    free list. Slot addresses are stable for the pool's lifetime, which
//!    is what lets the lock-free layers CAS raw node pointers safely.
//! 2. [`queue::MpmcQueue`] / [`queue::MpmcChannel`] — bounded
//!    Michael–Scott lock-free FIFOs whose nodes come from a `MemoryPool`.
//!    The channel variant adds a two-phase commit bit and
//!    deadline-bounded send/receive.
//! 3. The schedulers — [`scheduler::PriorityScheduler`] (mutex-guarded
//!    priority heap, delay-aware, cancellable),
//!    [`scheduler::ThreadPoolExecutor`] (future-returning submit surface
//!    on top of it), and [`scheduler::WorkStealingScheduler`] (per-worker
//!    deques, LIFO own-pops, FIFO steals, random victim selection).
//!
//! # Example
//!
//! ```
//! use taskmill::scheduler::ThreadPoolExecutor;
//!
//! let executor = ThreadPoolExecutor::new(4);
//! let handle = executor.submit(|| 40 + 2).unwrap();
//! assert_eq!(handle.join().unwrap(), 42);
//! ```
//!
//! # Error handling
//!
//! Recoverable conditions (full queue, empty queue, expired deadline)
//! and fatal ones (submit after shutdown, user-code panic) are surfaced
//! through the typed kinds in [`error`]. Worker threads never die from
//! user-code panics; a future-returning submit stores the panic for the
//! joiner.
//!
//! # Logging
//!
//! Diagnostics go through [`tracing_compat`]: with the
//! `tracing-integration` feature the crate logs through `tracing`,
//! without it every log site compiles to nothing. The crate never
//! installs a global subscriber.

pub mod cancel;
pub mod config;
pub mod error;
pub mod pool;
pub mod queue;
pub mod scheduler;
pub mod tracing_compat;
pub mod types;
pub mod util;

pub use cancel::CancellationToken;
pub use error::{Error, ErrorKind};
pub use pool::{MemoryPool, PoolBox};
pub use queue::{MpmcChannel, MpmcQueue};
pub use scheduler::{PriorityScheduler, ThreadPoolExecutor, WorkStealingScheduler};
pub use types::{Priority, TaskId, TaskState};
