//! Cooperative cancellation.
//!
//! A [`CancellationToken`] is a single shared boolean: set once, never
//! cleared, observed cooperatively. The schedulers use it to mark
//! pending tasks cancelled; user code running inside a task can poll it
//! to stop early. Cancelling never interrupts a task that is already
//! executing — it only prevents future resumptions.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared, set-once cancellation flag.
///
/// Clones share the same flag. Cancellation is monotone: once
/// [`cancel`](Self::cancel) has been called, [`is_cancelled`](Self::is_cancelled)
/// returns `true` forever.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a new, untripped token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trips the token.
    ///
    /// Idempotent: repeated calls have no further effect.
    #[inline]
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` if the token has been tripped.
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn starts_untripped() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_is_sticky_and_idempotent() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.is_cancelled());
        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let observer = token.clone();
        token.cancel();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn cancellation_is_visible_across_threads() {
        let token = CancellationToken::new();
        let observer = token.clone();
        let barrier = Arc::new(Barrier::new(2));

        let barrier_cloned = Arc::clone(&barrier);
        let canceller = thread::spawn(move || {
            barrier_cloned.wait();
            token.cancel();
        });

        barrier.wait();
        canceller.join().expect("canceller join");
        assert!(observer.is_cancelled());
    }
}
