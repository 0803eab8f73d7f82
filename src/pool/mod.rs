//! Typed slab allocator with a free list.
//!
//! [`MemoryPool`] hands out slots for values of a single type `T` from
//! a growable list of fixed-size chunks. A singly linked intrusive free
//! list threads through unused slots, so allocation and deallocation
//! are O(1) pops and pushes under one mutex.
//!
//! Two properties matter to the lock-free queues built on top:
//!
//! - **Stable addresses**: chunks are boxed slices that never move and
//!   are never freed while the pool lives, so a pointer obtained from
//!   [`allocate`](MemoryPool::allocate) stays dereferenceable until the
//!   pool is dropped — even after the slot has been recycled.
//! - **Typed slots**: a chunk only ever holds slots of one shape; slots
//!   are never aliased across node types.
//!
//! The pool is not lock-free. It sits on the allocation-cold path of
//! the queues it serves; the queues' hot paths touch only atomics.

use crate::error::{Error, ErrorKind};
use parking_lot::Mutex;
use std::mem::{size_of, ManuallyDrop};
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

/// Default per-chunk budget in bytes, matching a 64 KiB slab.
const CHUNK_BYTES: usize = 64 * 1024;

/// A slot either holds a live `T` or a link in the free list.
///
/// Both interpretations start at offset zero, so a slot pointer casts
/// directly to a value pointer. Slot size and alignment are the max of
/// `T`'s and a pointer's, mirroring the "block holds at least a value
/// or a link" layout of classic pooled allocators.
union Slot<T> {
    value: ManuallyDrop<T>,
    next: *mut Slot<T>,
}

struct PoolInner<T> {
    /// Owned chunks. Boxed slices never move, which is what keeps slot
    /// addresses stable across pool growth.
    chunks: Vec<Box<[Slot<T>]>>,
    /// Head of the intrusive free list, or null when empty.
    free_head: *mut Slot<T>,
    /// Number of slots currently on the free list.
    free_len: usize,
    /// Slots carved out of each new chunk.
    slots_per_chunk: usize,
}

/// A typed slab allocator with O(1) amortized allocate/deallocate and
/// stable slot addresses.
///
/// ```
/// use taskmill::pool::MemoryPool;
///
/// let pool = MemoryPool::new();
/// let value = pool.allocate_boxed(7_u64).unwrap();
/// assert_eq!(*value, 7);
/// // Dropping the handle returns the slot to the pool.
/// ```
pub struct MemoryPool<T> {
    inner: Mutex<PoolInner<T>>,
}

// SAFETY: the free list and chunk list are only touched under the
// mutex; values of T are moved in at allocate and out at deallocate,
// so sharing the pool across threads is sound whenever T itself can be
// sent between them.
unsafe impl<T: Send> Send for MemoryPool<T> {}
unsafe impl<T: Send> Sync for MemoryPool<T> {}

impl<T> MemoryPool<T> {
    /// Creates a pool whose chunks are sized from a 64 KiB budget.
    #[must_use]
    pub fn new() -> Self {
        Self::with_chunk_capacity((CHUNK_BYTES / size_of::<Slot<T>>()).max(1))
    }

    /// Creates a pool carving `slots_per_chunk` slots out of each chunk.
    ///
    /// # Panics
    ///
    /// Panics if `slots_per_chunk` is zero.
    #[must_use]
    pub fn with_chunk_capacity(slots_per_chunk: usize) -> Self {
        assert!(slots_per_chunk > 0, "chunk capacity must be non-zero");
        Self {
            inner: Mutex::new(PoolInner {
                chunks: Vec::new(),
                free_head: ptr::null_mut(),
                free_len: 0,
                slots_per_chunk,
            }),
        }
    }

    /// Allocates a slot and constructs `value` in place.
    ///
    /// Grows by one chunk when the free list is empty. The returned
    /// pointer stays valid (and its address stable) until passed back
    /// to [`deallocate`](Self::deallocate) and recycled, and remains
    /// dereferenceable for the pool's whole lifetime.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::AllocationFailed`] if the OS refuses the chunk
    /// allocation. No other failure mode exists.
    pub fn allocate(&self, value: T) -> Result<NonNull<T>, Error> {
        let slot = {
            let mut inner = self.inner.lock();
            if inner.free_head.is_null() {
                inner.grow()?;
            }
            let slot = inner.free_head;
            // SAFETY: a non-null free_head always points at a slot in a
            // live chunk whose `next` interpretation was the last write.
            inner.free_head = unsafe { (*slot).next };
            inner.free_len -= 1;
            slot
        };

        let value_ptr = slot.cast::<T>();
        // SAFETY: the slot was just popped off the free list, so no one
        // else holds it; the union's value field lives at offset zero.
        unsafe { ptr::write(value_ptr, value) };
        // SAFETY: slot pointers come from live boxed chunks, never null.
        Ok(unsafe { NonNull::new_unchecked(value_ptr) })
    }

    /// Drops the value in place and returns its slot to the free list.
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by [`allocate`](Self::allocate) on
    /// this pool and must not have been deallocated since. The caller
    /// must not touch the value through any pointer afterwards.
    pub unsafe fn deallocate(&self, ptr: NonNull<T>) {
        // SAFETY: per the contract, ptr holds a live T owned by the caller.
        unsafe { ptr::drop_in_place(ptr.as_ptr()) };
        let slot = ptr.as_ptr().cast::<Slot<T>>();

        let mut inner = self.inner.lock();
        // SAFETY: the value was dropped above; repurposing the slot
        // memory as a free-list link is the union's other interpretation.
        unsafe { (*slot).next = inner.free_head };
        inner.free_head = slot;
        inner.free_len += 1;
    }

    /// Allocates a slot wrapped in an RAII handle that returns it on drop.
    ///
    /// # Errors
    ///
    /// [`ErrorKind::AllocationFailed`] if the OS refuses the chunk
    /// allocation.
    pub fn allocate_boxed(&self, value: T) -> Result<PoolBox<'_, T>, Error> {
        Ok(PoolBox {
            ptr: self.allocate(value)?,
            pool: self,
        })
    }

    /// Total bytes currently held in chunks. Informational.
    #[must_use]
    pub fn allocated_size(&self) -> usize {
        let inner = self.inner.lock();
        inner.chunks.len() * inner.slots_per_chunk * size_of::<Slot<T>>()
    }

    /// Number of slots currently on the free list. Informational.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        self.inner.lock().free_len
    }

    /// Rewrites the chunk size used for future growth. Setting an
    /// impossibly large size makes the next growth fail, which is how
    /// tests inject allocation failure.
    #[cfg(test)]
    pub(crate) fn set_chunk_capacity_for_test(&self, slots_per_chunk: usize) {
        self.inner.lock().slots_per_chunk = slots_per_chunk;
    }
}

impl<T> PoolInner<T> {
    /// Allocates one more chunk and threads its slots onto the free list.
    fn grow(&mut self) -> Result<(), Error> {
        let mut slots = Vec::new();
        if slots.try_reserve_exact(self.slots_per_chunk).is_err() {
            return Err(Error::with_detail(
                ErrorKind::AllocationFailed,
                format!("pool chunk of {} slots", self.slots_per_chunk),
            ));
        }
        for _ in 0..self.slots_per_chunk {
            slots.push(Slot {
                next: ptr::null_mut(),
            });
        }
        let mut chunk = slots.into_boxed_slice();

        // Thread the new slots front to back, with the last one picking
        // up whatever was on the free list (always null here, since we
        // only grow when the list is empty).
        let base = chunk.as_mut_ptr();
        for i in 0..self.slots_per_chunk - 1 {
            // SAFETY: i and i + 1 are in bounds of the chunk.
            unsafe { (*base.add(i)).next = base.add(i + 1) };
        }
        // SAFETY: the last index is in bounds.
        unsafe { (*base.add(self.slots_per_chunk - 1)).next = self.free_head };

        self.free_head = base;
        self.free_len += self.slots_per_chunk;
        self.chunks.push(chunk);
        Ok(())
    }
}

impl<T> Default for MemoryPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for MemoryPool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("MemoryPool")
            .field("chunks", &inner.chunks.len())
            .field("slots_per_chunk", &inner.slots_per_chunk)
            .field("free_len", &inner.free_len)
            .finish_non_exhaustive()
    }
}

/// RAII handle to a pooled value.
///
/// Dereferences to `T`; dropping the handle drops the value and
/// returns its slot to the pool.
pub struct PoolBox<'a, T> {
    ptr: NonNull<T>,
    pool: &'a MemoryPool<T>,
}

// SAFETY: a PoolBox is an owning handle to a T plus a reference to its
// pool; both are safe to move or share across threads when T allows it.
unsafe impl<T: Send> Send for PoolBox<'_, T> {}
unsafe impl<T: Sync> Sync for PoolBox<'_, T> {}

impl<T> Deref for PoolBox<'_, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        // SAFETY: the handle exclusively owns a live, initialized slot.
        unsafe { self.ptr.as_ref() }
    }
}

impl<T> DerefMut for PoolBox<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, plus &mut self guarantees exclusivity.
        unsafe { self.ptr.as_mut() }
    }
}

impl<T> Drop for PoolBox<'_, T> {
    fn drop(&mut self) {
        // SAFETY: the pointer came from this pool's allocate and the
        // handle is the sole owner.
        unsafe { self.pool.deallocate(self.ptr) };
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for PoolBox<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("PoolBox").field(&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn allocate_constructs_in_place() {
        let pool = MemoryPool::new();
        let ptr = pool.allocate(123_u64).expect("allocate");
        // SAFETY: freshly allocated, exclusively owned by the test.
        unsafe {
            assert_eq!(*ptr.as_ptr(), 123);
            pool.deallocate(ptr);
        }
    }

    #[test]
    fn balanced_alloc_dealloc_is_net_zero_on_free_list() {
        let pool = MemoryPool::with_chunk_capacity(8);
        // Warm up one chunk.
        let warm = pool.allocate(0_u32).expect("allocate");
        // SAFETY: warm is live and owned here.
        unsafe { pool.deallocate(warm) };

        let baseline = pool.free_slots();
        let size_baseline = pool.allocated_size();
        for round in 0..32_u32 {
            let ptr = pool.allocate(round).expect("allocate");
            // SAFETY: ptr is live and owned here.
            unsafe { pool.deallocate(ptr) };
            assert_eq!(pool.free_slots(), baseline);
        }
        assert_eq!(pool.allocated_size(), size_baseline, "no growth after warm-up");
    }

    #[test]
    fn live_allocations_never_alias() {
        let pool = MemoryPool::with_chunk_capacity(4);
        let mut ptrs = Vec::new();
        for i in 0..64_u32 {
            ptrs.push(pool.allocate(i).expect("allocate"));
        }

        let unique: HashSet<usize> = ptrs.iter().map(|p| p.as_ptr() as usize).collect();
        assert_eq!(unique.len(), ptrs.len(), "two live slots share an address");

        for (i, ptr) in ptrs.iter().enumerate() {
            // SAFETY: all pointers are live and distinct.
            unsafe { assert_eq!(*ptr.as_ptr(), i as u32) };
        }
        for ptr in ptrs {
            // SAFETY: each pointer is deallocated exactly once.
            unsafe { pool.deallocate(ptr) };
        }
    }

    #[test]
    fn addresses_survive_pool_growth() {
        let pool = MemoryPool::with_chunk_capacity(2);
        let first = pool.allocate(1_u64).expect("allocate");
        let first_addr = first.as_ptr() as usize;

        // Force several chunk growths.
        let mut rest = Vec::new();
        for i in 0..32_u64 {
            rest.push(pool.allocate(i).expect("allocate"));
        }

        assert_eq!(first.as_ptr() as usize, first_addr);
        // SAFETY: first is still live and exclusively owned.
        unsafe { assert_eq!(*first.as_ptr(), 1) };

        for ptr in rest {
            // SAFETY: each pointer is deallocated exactly once.
            unsafe { pool.deallocate(ptr) };
        }
        // SAFETY: deallocated exactly once.
        unsafe { pool.deallocate(first) };
    }

    #[test]
    fn deallocate_runs_destructors() {
        struct CountsDrops(Arc<AtomicUsize>);
        impl Drop for CountsDrops {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let drops = Arc::new(AtomicUsize::new(0));
        let pool = MemoryPool::new();
        let ptr = pool
            .allocate(CountsDrops(Arc::clone(&drops)))
            .expect("allocate");
        assert_eq!(drops.load(Ordering::SeqCst), 0);
        // SAFETY: ptr is live and owned here.
        unsafe { pool.deallocate(ptr) };
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn impossible_chunk_growth_surfaces_allocation_failed() {
        let pool = MemoryPool::<u64>::with_chunk_capacity(4);
        pool.set_chunk_capacity_for_test(usize::MAX / 2);

        let err = pool.allocate(1).expect_err("growth must fail");
        assert_eq!(err.kind(), ErrorKind::AllocationFailed);
        // The failed growth left no partial state behind.
        assert_eq!(pool.free_slots(), 0);
        assert_eq!(pool.allocated_size(), 0);
    }

    #[test]
    fn pool_box_returns_slot_on_drop() {
        let pool = MemoryPool::with_chunk_capacity(4);
        {
            let mut boxed = pool.allocate_boxed(5_i32).expect("allocate");
            *boxed += 1;
            assert_eq!(*boxed, 6);
        }
        assert_eq!(pool.free_slots(), 4, "slot returned on handle drop");
    }

    #[test]
    fn allocated_size_reports_chunk_growth() {
        let pool = MemoryPool::<u64>::with_chunk_capacity(4);
        assert_eq!(pool.allocated_size(), 0);
        let ptr = pool.allocate(0).expect("allocate");
        let after_one_chunk = pool.allocated_size();
        assert!(after_one_chunk > 0);
        // SAFETY: deallocated exactly once.
        unsafe { pool.deallocate(ptr) };
        assert_eq!(pool.allocated_size(), after_one_chunk);
    }

    #[test]
    fn concurrent_alloc_dealloc_keeps_slots_distinct() {
        let pool = Arc::new(MemoryPool::<usize>::with_chunk_capacity(16));
        let threads = 4;
        let per_thread = 256;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let pool = Arc::clone(&pool);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for i in 0..per_thread {
                        let tag = t * per_thread + i;
                        let ptr = pool.allocate(tag).expect("allocate");
                        // SAFETY: freshly allocated, owned by this thread.
                        unsafe {
                            assert_eq!(*ptr.as_ptr(), tag, "slot handed to two threads");
                            pool.deallocate(ptr);
                        }
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().expect("worker join");
        }
    }
}
