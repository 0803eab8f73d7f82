//! Bounded lock-free MPMC channel with two-phase publish.
//!
//! Same Michael–Scott core as [`MpmcQueue`](crate::queue::MpmcQueue),
//! with two additions:
//!
//! - **Commit bit**: a producer constructs a node, links it, and only
//!   then stores `committed = true` (release). A consumer that observes
//!   a linked-but-uncommitted node treats it as unavailable instead of
//!   reading a value that is not yet published.
//! - **Deadlines**: [`try_send`](MpmcChannel::try_send) and
//!   [`try_receive`](MpmcChannel::try_receive) take a duration. Zero is
//!   strictly non-blocking; a positive duration yields the CPU between
//!   attempts and gives up when the monotonic deadline passes. No
//!   parking primitive is involved, and an expired deadline never
//!   corrupts state.
//!
//! Node reclamation follows the queue's scheme: only the consumer whose
//! `head` CAS linearized a removal returns the node to the pool.

use crate::error::{RecvTimeoutError, SendTimeoutError};
use crate::pool::MemoryPool;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

/// Default capacity when none is given.
const DEFAULT_CAPACITY: usize = 1024;

/// A channel node. Allocated vacant (the value is written in only
/// after the slot is secured). `committed` distinguishes "link
/// installed" from "value visible": consumers must not take a value
/// before the producer's commit store.
struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: UnsafeCell<MaybeUninit<T>>,
    committed: AtomicBool,
}

impl<T> Node<T> {
    fn vacant() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(MaybeUninit::uninit()),
            committed: AtomicBool::new(false),
        }
    }
}

/// A bounded lock-free MPMC channel with timeout-bounded operations.
///
/// ```
/// use std::time::Duration;
/// use taskmill::queue::MpmcChannel;
///
/// let channel = MpmcChannel::with_capacity(4);
/// channel.try_send("ping", Duration::ZERO).unwrap();
/// assert_eq!(channel.try_receive(Duration::ZERO), Ok("ping"));
/// ```
pub struct MpmcChannel<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    size: AtomicUsize,
    capacity: usize,
    pool: MemoryPool<Node<T>>,
}

// SAFETY: same argument as MpmcQueue — values cross threads exactly
// once, shared pointers only move through acquire/release atomics, and
// the commit bit orders value publication before consumption.
unsafe impl<T: Send> Send for MpmcChannel<T> {}
unsafe impl<T: Send> Sync for MpmcChannel<T> {}

impl<T> MpmcChannel<T> {
    /// Creates a channel with the default capacity of 1024.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a channel holding at most `capacity` values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_pool(capacity, MemoryPool::new())
    }

    /// Builds the channel over a caller-supplied node pool. Tests use
    /// this to inject a pool that fails to grow.
    fn from_pool(capacity: usize, pool: MemoryPool<Node<T>>) -> Self {
        assert!(capacity > 0, "channel capacity must be non-zero");
        let sentinel = pool
            .allocate(Node::vacant())
            .expect("sentinel node allocation failed")
            .as_ptr();
        Self {
            head: AtomicPtr::new(sentinel),
            tail: AtomicPtr::new(sentinel),
            size: AtomicUsize::new(0),
            capacity,
            pool,
        }
    }

    /// Sends a value, retrying until `timeout` expires.
    ///
    /// A zero timeout makes exactly one attempt. Retries yield the CPU
    /// between attempts and are measured against the monotonic clock.
    ///
    /// # Errors
    ///
    /// [`SendTimeoutError::Full`] on a zero-timeout attempt against a
    /// full channel, [`SendTimeoutError::Timeout`] when the deadline
    /// expires first, [`SendTimeoutError::AllocationFailed`] when the
    /// node pool cannot grow (fatal; returned immediately, never
    /// retried against the deadline). The value is handed back in
    /// every case.
    pub fn try_send(&self, value: T, timeout: Duration) -> Result<(), SendTimeoutError<T>> {
        let mut value = match self.try_send_once(value) {
            Ok(()) => return Ok(()),
            Err(SendTimeoutError::Full(value)) => value,
            Err(fatal) => return Err(fatal),
        };
        if timeout.is_zero() {
            return Err(SendTimeoutError::Full(value));
        }

        let deadline = Instant::now() + timeout;
        loop {
            std::thread::yield_now();
            match self.try_send_once(value) {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Full(back)) => value = back,
                Err(fatal) => return Err(fatal),
            }
            if Instant::now() >= deadline {
                return Err(SendTimeoutError::Timeout(value));
            }
        }
    }

    /// Receives a value, retrying until `timeout` expires.
    ///
    /// A zero timeout makes exactly one attempt.
    ///
    /// # Errors
    ///
    /// [`RecvTimeoutError::Empty`] on a zero-timeout attempt against an
    /// empty channel, [`RecvTimeoutError::Timeout`] when the deadline
    /// expires first.
    pub fn try_receive(&self, timeout: Duration) -> Result<T, RecvTimeoutError> {
        if let Some(value) = self.try_receive_once() {
            return Ok(value);
        }
        if timeout.is_zero() {
            return Err(RecvTimeoutError::Empty);
        }

        let deadline = Instant::now() + timeout;
        loop {
            std::thread::yield_now();
            if let Some(value) = self.try_receive_once() {
                return Ok(value);
            }
            if Instant::now() >= deadline {
                return Err(RecvTimeoutError::Timeout);
            }
        }
    }

    /// One admission-gated enqueue attempt; hands the value back when
    /// full or when the node pool cannot grow.
    fn try_send_once(&self, value: T) -> Result<(), SendTimeoutError<T>> {
        if self.size.load(Ordering::Relaxed) >= self.capacity {
            return Err(SendTimeoutError::Full(value));
        }

        // Secure a node before moving the value in, so pool exhaustion
        // hands the value back untouched.
        let node = match self.pool.allocate(Node::vacant()) {
            Ok(node) => node.as_ptr(),
            Err(_) => return Err(SendTimeoutError::AllocationFailed(value)),
        };
        // SAFETY: the node was just allocated and is not yet linked;
        // no other thread can reach it.
        unsafe { (*node).value.get().write(MaybeUninit::new(value)) };

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: tail always points at a pool node that stays
            // dereferenceable for the channel's lifetime.
            let next = unsafe { (*tail).next.load(Ordering::Acquire) };
            if tail != self.tail.load(Ordering::Acquire) {
                continue;
            }
            if next.is_null() {
                // SAFETY: as above; the CAS only installs our fresh node.
                if unsafe {
                    (*tail)
                        .next
                        .compare_exchange(
                            ptr::null_mut(),
                            node,
                            Ordering::Release,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                } {
                    // Phase two: the node is linked, now publish it.
                    // Consumers gate on this flag before touching the value.
                    // SAFETY: node is live; we are the linking producer.
                    unsafe { (*node).committed.store(true, Ordering::Release) };
                    let _ = self.tail.compare_exchange(
                        tail,
                        node,
                        Ordering::Release,
                        Ordering::Relaxed,
                    );
                    self.size.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
            } else {
                let _ =
                    self.tail
                        .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
            }
        }
    }

    /// One dequeue attempt; `None` when empty or the front is not yet
    /// committed.
    fn try_receive_once(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: head always points at a pool node that stays
            // dereferenceable for the channel's lifetime.
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            if head != self.head.load(Ordering::Acquire) {
                continue;
            }
            if next.is_null() {
                return None;
            }
            if head == tail {
                let _ =
                    self.tail
                        .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }
            // SAFETY: next is a live linked node.
            if !unsafe { (*next).committed.load(Ordering::Acquire) } {
                // Linked but not yet published; unavailable for now.
                return None;
            }
            // Speculatively copy the value bytes before the CAS; only
            // the CAS winner interprets them. A loser discards the copy.
            // SAFETY: next is a live pool slot; the commit load above
            // ordered the producer's value write before this copy.
            let value = unsafe { ptr::read((*next).value.get()) };
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: only the CAS winner returns the old sentinel,
                // exactly once.
                unsafe { self.pool.deallocate(NonNull::new_unchecked(head)) };
                self.size.fetch_sub(1, Ordering::Relaxed);
                // SAFETY: the winning CAS is the unique removal; the
                // value is claimed exactly once.
                return Some(unsafe { value.assume_init() });
            }
        }
    }

    /// Approximate number of buffered values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Returns `true` if the channel appears empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The capacity this channel was built with.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for MpmcChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MpmcChannel<T> {
    fn drop(&mut self) {
        let mut node = *self.head.get_mut();
        let mut is_sentinel = true;
        while !node.is_null() {
            // SAFETY: nodes in the chain are live pool slots.
            let next = unsafe { (*node).next.load(Ordering::Relaxed) };
            if !is_sentinel {
                // SAFETY: every non-sentinel linked node still holds an
                // initialized value (committed or not).
                unsafe { (*(*node).value.get()).assume_init_drop() };
            }
            // SAFETY: each chain node is deallocated exactly once here.
            unsafe {
                self.pool.deallocate(NonNull::new_unchecked(node));
            }
            node = next;
            is_sentinel = false;
        }
    }
}

impl<T> std::fmt::Debug for MpmcChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpmcChannel")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn send_receive_round_trip() {
        let channel = MpmcChannel::with_capacity(4);
        channel.try_send(7, Duration::ZERO).expect("send");
        assert_eq!(channel.try_receive(Duration::ZERO), Ok(7));
    }

    #[test]
    fn zero_timeout_receive_on_empty_fails_immediately() {
        let channel = MpmcChannel::<u32>::with_capacity(4);
        let before = Instant::now();
        assert_eq!(
            channel.try_receive(Duration::ZERO),
            Err(RecvTimeoutError::Empty)
        );
        assert!(before.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn positive_timeout_receive_fails_at_deadline() {
        let channel = MpmcChannel::<u32>::with_capacity(4);
        let before = Instant::now();
        assert_eq!(
            channel.try_receive(Duration::from_millis(50)),
            Err(RecvTimeoutError::Timeout)
        );
        assert!(before.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn zero_timeout_send_on_full_fails_with_value() {
        let channel = MpmcChannel::with_capacity(1);
        channel.try_send(1, Duration::ZERO).expect("send");
        match channel.try_send(2, Duration::ZERO) {
            Err(SendTimeoutError::Full(value)) => assert_eq!(value, 2),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn send_surfaces_allocation_failure_without_burning_deadline() {
        // One-slot chunks: the sentinel consumes the only free slot,
        // then growth is sabotaged so the first send must fail.
        let channel = MpmcChannel::from_pool(4, MemoryPool::with_chunk_capacity(1));
        channel.pool.set_chunk_capacity_for_test(usize::MAX / 2);

        let started = Instant::now();
        match channel.try_send(9_u32, Duration::from_secs(10)) {
            Err(SendTimeoutError::AllocationFailed(value)) => assert_eq!(value, 9),
            other => panic!("expected AllocationFailed, got {other:?}"),
        }
        assert!(
            started.elapsed() < Duration::from_secs(1),
            "fatal errors must not be retried against the deadline"
        );
        assert!(channel.is_empty(), "failed send has no side effects");
    }

    #[test]
    fn send_with_timeout_succeeds_when_drained_concurrently() {
        let channel = Arc::new(MpmcChannel::with_capacity(1));
        channel.try_send(0, Duration::ZERO).expect("fill");

        let drainer = {
            let channel = Arc::clone(&channel);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                channel.try_receive(Duration::from_secs(1)).expect("drain")
            })
        };

        channel
            .try_send(1, Duration::from_secs(1))
            .expect("send after drain");
        assert_eq!(drainer.join().expect("drainer join"), 0);
        assert_eq!(channel.try_receive(Duration::ZERO), Ok(1));
    }

    #[test]
    fn receive_with_timeout_sees_concurrent_send() {
        let channel = Arc::new(MpmcChannel::with_capacity(4));
        let barrier = Arc::new(Barrier::new(2));

        let sender = {
            let channel = Arc::clone(&channel);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                thread::sleep(Duration::from_millis(10));
                channel.try_send(42, Duration::ZERO).expect("send");
            })
        };

        barrier.wait();
        assert_eq!(channel.try_receive(Duration::from_secs(1)), Ok(42));
        sender.join().expect("sender join");
    }

    #[test]
    fn capacity_and_len_observers() {
        let channel = MpmcChannel::with_capacity(3);
        assert!(channel.is_empty());
        assert_eq!(channel.capacity(), 3);
        channel.try_send(1, Duration::ZERO).expect("send");
        assert_eq!(channel.len(), 1);
    }

    #[test]
    fn many_producers_many_consumers_exactly_once() {
        let producers = 3;
        let consumers = 3;
        let per_producer = 1_000_usize;
        let total = producers * per_producer;

        let channel = Arc::new(MpmcChannel::with_capacity(64));
        let barrier = Arc::new(Barrier::new(producers + consumers));
        let received = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut handles = Vec::new();
        for p in 0..producers {
            let channel = Arc::clone(&channel);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..per_producer {
                    let value = p * per_producer + i;
                    channel
                        .try_send(value, Duration::from_secs(10))
                        .expect("send within deadline");
                }
                Vec::new()
            }));
        }
        for _ in 0..consumers {
            let channel = Arc::clone(&channel);
            let barrier = Arc::clone(&barrier);
            let received = Arc::clone(&received);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let mut seen = Vec::new();
                while received.load(Ordering::SeqCst) < total {
                    match channel.try_receive(Duration::from_millis(1)) {
                        Ok(value) => {
                            received.fetch_add(1, Ordering::SeqCst);
                            seen.push(value);
                        }
                        Err(_) => thread::yield_now(),
                    }
                }
                seen
            }));
        }

        let mut observed = vec![0_u32; total];
        for handle in handles {
            for value in handle.join().expect("thread join") {
                observed[value] += 1;
            }
        }
        assert!(
            observed.iter().all(|&count| count == 1),
            "every sent value received exactly once"
        );
    }

    #[test]
    fn drop_releases_buffered_values() {
        let payload = Arc::new(());
        {
            let channel = MpmcChannel::with_capacity(8);
            for _ in 0..4 {
                channel
                    .try_send(Arc::clone(&payload), Duration::ZERO)
                    .expect("send");
            }
        }
        assert_eq!(Arc::strong_count(&payload), 1, "drop frees buffered values");
    }
}
