//! Lock-free MPMC FIFOs built on pooled nodes.
//!
//! Two variants share the Michael–Scott algorithm:
//!
//! - [`MpmcQueue`] — bounded queue with strictly non-blocking
//!   `try_enqueue`/`try_dequeue`.
//! - [`MpmcChannel`] — adds a two-phase commit bit (link first, publish
//!   second) and deadline-bounded `try_send`/`try_receive`.
//!
//! Nodes come from a private [`MemoryPool`](crate::pool::MemoryPool),
//! which keeps node addresses stable while CAS races resolve and makes
//! enqueue/dequeue allocation-free after warm-up.

pub mod channel;
pub mod mpmc;

pub use channel::MpmcChannel;
pub use mpmc::MpmcQueue;
