//! Bounded lock-free MPMC queue.
//!
//! A Michael–Scott queue with a permanently linked sentinel: `head`
//! always points at a dummy whose successor carries the oldest value,
//! so enqueue (touching `tail`) and dequeue (touching `head`) never
//! alias on a non-empty queue.
//!
//! # Memory ordering
//!
//! Link and swing CASes are release on success; `head`, `tail`, and
//! `next` loads are acquire, so a consumer that observes a linked node
//! also observes the value written into it. The size counter is
//! relaxed: it is an approximation bounded by `[0, capacity]` except
//! transiently during CAS races, and only gates admission.
//!
//! # Node reclamation
//!
//! A removed node is returned to the pool only by the consumer whose
//! `head` CAS linearized the removal, so no two reclaimers ever free
//! the same node. Pool chunks are type-stable and never unmapped while
//! the queue lives; a lagging thread that still holds a pointer to a
//! recycled node reads initialized `Node` memory and then fails its
//! `head` re-check. The classic residual hazard — the head pointer
//! value itself recycling between a reader's load and its CAS — is the
//! documented trade-off of this scheme; swapping in epoch-based
//! reclamation would close it without changing the contract.

use crate::error::EnqueueError;
use crate::pool::MemoryPool;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

/// Default capacity when none is given.
const DEFAULT_CAPACITY: usize = 1024;

/// A queue node. Allocated vacant (the value is written in only after
/// the slot is secured); the sentinel's value slot stays vacant, every
/// other linked node holds an initialized value until a dequeuer moves
/// it out.
struct Node<T> {
    next: AtomicPtr<Node<T>>,
    value: UnsafeCell<MaybeUninit<T>>,
}

impl<T> Node<T> {
    fn vacant() -> Self {
        Self {
            next: AtomicPtr::new(ptr::null_mut()),
            value: UnsafeCell::new(MaybeUninit::uninit()),
        }
    }
}

/// A bounded lock-free multi-producer multi-consumer FIFO.
///
/// Every successfully enqueued value is dequeued exactly once; values
/// from one producer are dequeued in that producer's enqueue order.
///
/// ```
/// use taskmill::queue::MpmcQueue;
///
/// let queue = MpmcQueue::with_capacity(8);
/// queue.try_enqueue(1).unwrap();
/// queue.try_enqueue(2).unwrap();
/// assert_eq!(queue.try_dequeue(), Some(1));
/// assert_eq!(queue.try_dequeue(), Some(2));
/// assert_eq!(queue.try_dequeue(), None);
/// ```
pub struct MpmcQueue<T> {
    head: AtomicPtr<Node<T>>,
    tail: AtomicPtr<Node<T>>,
    size: AtomicUsize,
    capacity: usize,
    pool: MemoryPool<Node<T>>,
}

// SAFETY: values cross threads exactly once (enqueue moves in, the
// winning dequeuer moves out); all shared pointers are managed through
// atomics with acquire/release ordering.
unsafe impl<T: Send> Send for MpmcQueue<T> {}
unsafe impl<T: Send> Sync for MpmcQueue<T> {}

impl<T> MpmcQueue<T> {
    /// Creates a queue with the default capacity of 1024.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Creates a queue holding at most `capacity` values.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self::from_pool(capacity, MemoryPool::new())
    }

    /// Builds the queue over a caller-supplied node pool. Tests use
    /// this to inject a pool that fails to grow.
    fn from_pool(capacity: usize, pool: MemoryPool<Node<T>>) -> Self {
        assert!(capacity > 0, "queue capacity must be non-zero");
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

    /// Attempts to enqueue a value without blocking.
    ///
    /// # Errors
    ///
    /// [`EnqueueError::Full`] when the queue is at capacity,
    /// [`EnqueueError::AllocationFailed`] when the node pool cannot
    /// grow. The value is handed back either way and the attempt has
    /// no side effects.
    pub fn try_enqueue(&self, value: T) -> Result<(), EnqueueError<T>> {
        if self.size.load(Ordering::Relaxed) >= self.capacity {
            return Err(EnqueueError::Full(value));
        }

        // Secure a node before moving the value in, so pool exhaustion
        // hands the value back untouched.
        let node = match self.pool.allocate(Node::vacant()) {
            Ok(node) => node.as_ptr(),
            Err(_) => return Err(EnqueueError::AllocationFailed(value)),
        };
        // SAFETY: the node was just allocated and is not yet linked;
        // no other thread can reach it.
        unsafe { (*node).value.get().write(MaybeUninit::new(value)) };

        loop {
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: tail always points at a pool node that stays
            // dereferenceable for the queue's lifetime.
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
                    // Swing tail; losing this CAS is benign, another
                    // thread has already helped.
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
                // Tail is lagging; help it forward.
                let _ =
                    self.tail
                        .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
            }
        }
    }

    /// Attempts to dequeue the oldest value without blocking.
    ///
    /// Returns `None` when the queue is empty.
    pub fn try_dequeue(&self) -> Option<T> {
        loop {
            let head = self.head.load(Ordering::Acquire);
            let tail = self.tail.load(Ordering::Acquire);
            // SAFETY: head always points at a pool node that stays
            // dereferenceable for the queue's lifetime.
            let next = unsafe { (*head).next.load(Ordering::Acquire) };
            if head != self.head.load(Ordering::Acquire) {
                continue;
            }
            if next.is_null() {
                return None;
            }
            if head == tail {
                // Tail is lagging behind a linked node; help it forward.
                let _ =
                    self.tail
                        .compare_exchange(tail, next, Ordering::Release, Ordering::Relaxed);
                continue;
            }
            // Speculatively copy the value bytes before the CAS; they
            // are only interpreted once the CAS proves this thread won
            // the removal. A loser discards the copy uninterpreted.
            // SAFETY: next is a live pool slot; the copy is raw bytes
            // into a MaybeUninit, claimed below only by the CAS winner.
            let value = unsafe { ptr::read((*next).value.get()) };
            if self
                .head
                .compare_exchange(head, next, Ordering::AcqRel, Ordering::Relaxed)
                .is_ok()
            {
                // SAFETY: the old sentinel is unreachable from head now;
                // only the CAS winner returns it, exactly once.
                unsafe { self.pool.deallocate(NonNull::new_unchecked(head)) };
                self.size.fetch_sub(1, Ordering::Relaxed);
                // SAFETY: the winning CAS is the unique removal of this
                // node; the value was published by the enqueuing release
                // CAS and is claimed exactly once.
                return Some(unsafe { value.assume_init() });
            }
        }
    }

    /// Approximate number of queued values.
    ///
    /// Bounded by `[0, capacity]` except transiently during races.
    #[must_use]
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Returns `true` if the queue appears empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The capacity this queue was built with.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<T> Default for MpmcQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for MpmcQueue<T> {
    fn drop(&mut self) {
        // Exclusive access: walk the chain, dropping the values still
        // queued and returning every node (sentinel included).
        let mut node = *self.head.get_mut();
        let mut is_sentinel = true;
        while !node.is_null() {
            // SAFETY: nodes in the chain are live pool slots.
            let next = unsafe { (*node).next.load(Ordering::Relaxed) };
            if !is_sentinel {
                // SAFETY: every non-sentinel linked node holds an
                // initialized value that no consumer claimed.
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

impl<T> std::fmt::Debug for MpmcQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MpmcQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn fifo_order_single_thread() {
        let queue = MpmcQueue::with_capacity(16);
        for i in 0..10 {
            queue.try_enqueue(i).expect("enqueue");
        }
        for i in 0..10 {
            assert_eq!(queue.try_dequeue(), Some(i));
        }
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn enqueue_then_dequeue_round_trips() {
        let queue = MpmcQueue::with_capacity(4);
        queue.try_enqueue(String::from("payload")).expect("enqueue");
        assert_eq!(queue.try_dequeue().as_deref(), Some("payload"));
    }

    #[test]
    fn capacity_boundary() {
        let queue = MpmcQueue::with_capacity(4);
        for i in 0..3 {
            queue.try_enqueue(i).expect("below capacity");
        }
        // capacity - 1 -> success
        queue.try_enqueue(3).expect("at capacity - 1");
        // at capacity -> failure, value handed back, no side effects
        match queue.try_enqueue(99) {
            Err(EnqueueError::Full(value)) => assert_eq!(value, 99),
            other => panic!("expected Full, got {other:?}"),
        }
        assert_eq!(queue.len(), 4);

        assert_eq!(queue.try_dequeue(), Some(0));
        queue.try_enqueue(4).expect("space freed");
    }

    #[test]
    fn enqueue_surfaces_allocation_failure_with_value() {
        // One-slot chunks: the sentinel consumes the only free slot,
        // then growth is sabotaged so the first enqueue must fail.
        let queue = MpmcQueue::from_pool(4, MemoryPool::with_chunk_capacity(1));
        queue.pool.set_chunk_capacity_for_test(usize::MAX / 2);

        match queue.try_enqueue(7_u32) {
            Err(EnqueueError::AllocationFailed(value)) => assert_eq!(value, 7),
            other => panic!("expected AllocationFailed, got {other:?}"),
        }
        assert!(queue.is_empty(), "failed enqueue has no side effects");
        assert_eq!(queue.try_dequeue(), None);
    }

    #[test]
    fn dequeue_empty_is_none_and_repeatable() {
        let queue = MpmcQueue::<u32>::with_capacity(2);
        for _ in 0..5 {
            assert_eq!(queue.try_dequeue(), None);
        }
    }

    #[test]
    fn len_tracks_operations() {
        let queue = MpmcQueue::with_capacity(8);
        assert!(queue.is_empty());
        queue.try_enqueue(1).expect("enqueue");
        queue.try_enqueue(2).expect("enqueue");
        assert_eq!(queue.len(), 2);
        let _ = queue.try_dequeue();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.capacity(), 8);
    }

    #[test]
    fn drop_releases_queued_values() {
        struct CountsDrops(Arc<AtomicUsize>);
        impl Drop for CountsDrops {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        {
            let queue = MpmcQueue::with_capacity(8);
            for _ in 0..5 {
                queue
                    .try_enqueue(CountsDrops(Arc::clone(&drops)))
                    .expect("enqueue");
            }
            let dequeued = queue.try_dequeue().expect("dequeue");
            drop(dequeued);
            assert_eq!(drops.load(Ordering::SeqCst), 1);
        }
        assert_eq!(drops.load(Ordering::SeqCst), 5, "drop frees the rest");
    }

    #[test]
    fn concurrent_producers_consumers_exactly_once() {
        let producers = 4;
        let consumers = 4;
        let per_producer = 2_000_usize;
        let total = producers * per_producer;

        let queue = Arc::new(MpmcQueue::with_capacity(total));
        let barrier = Arc::new(Barrier::new(producers + consumers));
        let dequeued = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for p in 0..producers {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..per_producer {
                    let tagged = p * per_producer + i;
                    let mut value = tagged;
                    loop {
                        match queue.try_enqueue(value) {
                            Ok(()) => break,
                            Err(back) => {
                                value = back.into_inner();
                                thread::yield_now();
                            }
                        }
                    }
                }
                Vec::new()
            }));
        }
        for _ in 0..consumers {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            let dequeued = Arc::clone(&dequeued);
            handles.push(thread::spawn(move || {
                barrier.wait();
                let mut seen = Vec::new();
                while dequeued.load(Ordering::SeqCst) < total {
                    if let Some(value) = queue.try_dequeue() {
                        dequeued.fetch_add(1, Ordering::SeqCst);
                        seen.push(value);
                    } else {
                        thread::yield_now();
                    }
                }
                seen
            }));
        }

        let mut counts: HashMap<usize, usize> = HashMap::new();
        for handle in handles {
            for value in handle.join().expect("thread join") {
                *counts.entry(value).or_default() += 1;
            }
        }

        assert_eq!(counts.len(), total, "every value observed");
        for (value, count) in counts {
            assert_eq!(count, 1, "value {value} observed {count} times");
        }
    }

    #[test]
    fn per_producer_fifo_holds_under_concurrency() {
        let producers = 3;
        let per_producer = 1_500_usize;
        let total = producers * per_producer;

        let queue = Arc::new(MpmcQueue::with_capacity(total));
        let barrier = Arc::new(Barrier::new(producers + 1));

        let mut handles = Vec::new();
        for p in 0..producers {
            let queue = Arc::clone(&queue);
            let barrier = Arc::clone(&barrier);
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..per_producer {
                    let mut value = (p, i);
                    loop {
                        match queue.try_enqueue(value) {
                            Ok(()) => break,
                            Err(back) => {
                                value = back.into_inner();
                                thread::yield_now();
                            }
                        }
                    }
                }
            }));
        }

        barrier.wait();
        let mut last_seen = vec![None::<usize>; producers];
        let mut received = 0;
        while received < total {
            if let Some((p, i)) = queue.try_dequeue() {
                if let Some(prev) = last_seen[p] {
                    assert!(i > prev, "producer {p} order violated: {i} after {prev}");
                }
                last_seen[p] = Some(i);
                received += 1;
            } else {
                thread::yield_now();
            }
        }

        for handle in handles {
            handle.join().expect("producer join");
        }
    }
}
