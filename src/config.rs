//! Configuration types for the schedulers and executor.
//!
//! Configuration is programmatic: plain structs with sensible defaults
//! and an explicit [`validate`](SchedulerConfig::validate) step that
//! checks guardrail invariants before a component is built. Components
//! also accept raw counts directly for the common case.

use core::fmt;
use std::time::Duration;

/// Configuration for a [`PriorityScheduler`](crate::scheduler::PriorityScheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads. Zero is accepted: submissions queue
    /// but nothing runs until the scheduler is rebuilt with workers.
    pub worker_threads: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_parallelism(),
        }
    }
}

impl SchedulerConfig {
    /// Validates the configuration for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads > MAX_WORKERS {
            return Err(ConfigError::TooManyWorkers(self.worker_threads));
        }
        Ok(())
    }
}

/// Configuration for a [`ThreadPoolExecutor`](crate::scheduler::ThreadPoolExecutor).
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Number of worker threads.
    pub worker_threads: usize,
    /// Maximum number of pending (not yet dispatched) tasks before
    /// `submit` fails with `QueueFull`.
    pub max_queue: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_parallelism(),
            max_queue: 10_000,
        }
    }
}

impl ExecutorConfig {
    /// Validates the configuration for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads > MAX_WORKERS {
            return Err(ConfigError::TooManyWorkers(self.worker_threads));
        }
        if self.max_queue == 0 {
            return Err(ConfigError::ZeroQueueBound);
        }
        Ok(())
    }
}

/// Configuration for a [`WorkStealingScheduler`](crate::scheduler::WorkStealingScheduler).
#[derive(Debug, Clone)]
pub struct WorkStealingConfig {
    /// Number of workers (and per-worker deques).
    pub worker_threads: usize,
    /// How long an idle worker parks before re-probing for work.
    pub park_timeout: Duration,
}

impl Default for WorkStealingConfig {
    fn default() -> Self {
        Self {
            worker_threads: default_parallelism(),
            park_timeout: Duration::from_millis(100),
        }
    }
}

impl WorkStealingConfig {
    /// Validates the configuration for basic sanity.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_threads == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.worker_threads > MAX_WORKERS {
            return Err(ConfigError::TooManyWorkers(self.worker_threads));
        }
        if self.park_timeout.is_zero() {
            return Err(ConfigError::ZeroParkTimeout);
        }
        Ok(())
    }
}

/// Upper guardrail on worker counts; far above any sane deployment.
const MAX_WORKERS: usize = 4096;

/// Returns the host's available parallelism, falling back to 1.
#[must_use]
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// A configuration value failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// Work stealing requires at least one worker.
    ZeroWorkers,
    /// Worker count exceeds the guardrail limit.
    TooManyWorkers(usize),
    /// Executor queue bound must be non-zero.
    ZeroQueueBound,
    /// Park timeout must be non-zero.
    ZeroParkTimeout,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ZeroWorkers => write!(f, "worker count must be non-zero"),
            Self::TooManyWorkers(n) => {
                write!(f, "worker count {n} exceeds the limit of {MAX_WORKERS}")
            }
            Self::ZeroQueueBound => write!(f, "executor queue bound must be non-zero"),
            Self::ZeroParkTimeout => write!(f, "park timeout must be non-zero"),
        }
    }
}

impl std::error::Error for ConfigError {}
