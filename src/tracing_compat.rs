//! Tracing compatibility layer for structured logging.
//!
//! This module provides a unified logging interface that works whether
//! or not the `tracing-integration` feature is enabled:
//!
//! - **With the feature**: re-exports the `tracing` crate's macros.
//! - **Without it**: no-op macros that compile to nothing.
//!
//! The crate never installs a global subscriber; wiring a subscriber is
//! the embedding application's job.
//!
//! ```rust,ignore
//! use taskmill::tracing_compat::{error, trace};
//!
//! trace!(worker = 3, "parking idle worker");
//! error!(task_id = %id, "task panicked");
//! ```

#[cfg(feature = "tracing-integration")]
pub use tracing::{debug, error, info, trace, warn};

#[cfg(not(feature = "tracing-integration"))]
mod noop {
    //! No-op macro implementations when tracing is disabled.

    /// No-op trace-level logging macro.
    #[macro_export]
    macro_rules! trace {
        ($($arg:tt)*) => {};
    }

    /// No-op debug-level logging macro.
    #[macro_export]
    macro_rules! debug {
        ($($arg:tt)*) => {};
    }

    /// No-op info-level logging macro.
    #[macro_export]
    macro_rules! info {
        ($($arg:tt)*) => {};
    }

    /// No-op warn-level logging macro.
    #[macro_export]
    macro_rules! warn {
        ($($arg:tt)*) => {};
    }

    /// No-op error-level logging macro.
    #[macro_export]
    macro_rules! error {
        ($($arg:tt)*) => {};
    }

    pub use crate::{debug, error, info, trace, warn};
}

#[cfg(not(feature = "tracing-integration"))]
pub use noop::*;
