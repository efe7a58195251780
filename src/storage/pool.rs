//! # Object Pool
//!
//! A bounded pool of reusable allocations. Stores draw their raw blocks
//! from a pool instead of hitting the global allocator on every block
//! turnover, which keeps block churn cheap and makes memory consumption a
//! configuration knob instead of an emergent property.
//!
//! ## Limits
//!
//! ```text
//! size_limit   - maximum number of live objects (handed out + queued)
//! reuse_limit  - maximum number of released objects kept for reuse
//! ```
//!
//! `reuse_limit` may exceed `size_limit`; the queue then simply never
//! reaches it. A `reuse_limit` of 0 disables recycling entirely.
//!
//! ## Concurrency
//!
//! All bookkeeping sits behind one parking_lot mutex. Critical sections are
//! short (queue push/pop and counter updates); the underlying allocation
//! for fresh objects happens inside the lock, which is acceptable because
//! fresh allocations are rare once a pool is warm.
//!
//! ## Ownership
//!
//! The pool owns queued objects and frees them on drop. Objects currently
//! handed out are the caller's responsibility; anything not released back
//! by the time the pool drops is leaked, as with the callers of any raw
//! allocator.

use std::collections::VecDeque;
use std::fmt;
use std::ptr::NonNull;

use parking_lot::Mutex;

use super::block::{BlockAlloc, RawBlock};

/// Allocation strategy plugged into an [`ObjectPool`].
pub trait PoolAlloc<T> {
    /// Allocates a fresh object, or `None` if the system is out of memory.
    fn allocate(&self) -> Option<NonNull<T>>;

    /// Prepares a previously released object to be handed out again.
    fn reuse(&self, obj: NonNull<T>);

    /// Frees an object previously returned by `allocate`.
    fn deallocate(&self, obj: NonNull<T>);
}

/// Errors surfaced by [`ObjectPool::acquire`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// The pool is at `size_limit` with nothing queued for reuse. Not
    /// transient at this layer: the enclosing transaction must abort.
    Exhausted { limit: u64 },
    /// The underlying allocator failed to produce memory.
    AllocFailed,
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Exhausted { limit } => {
                write!(f, "object pool has no object to hand out (size limit {limit})")
            }
            PoolError::AllocFailed => write!(f, "allocator failed to produce memory"),
        }
    }
}

impl std::error::Error for PoolError {}

struct PoolInner<T> {
    reuse_queue: VecDeque<NonNull<T>>,
    size_limit: u64,
    reuse_limit: u64,
    // Live objects: handed out plus queued for reuse.
    current_size: u64,
}

/// Bounded pool of `T` allocations managed by an `A` allocator.
pub struct ObjectPool<T, A: PoolAlloc<T>> {
    alloc: A,
    inner: Mutex<PoolInner<T>>,
}

// SAFETY: the queued NonNulls are owned by the pool and only touched under
// the mutex; T itself crosses threads, hence the Send + Sync bounds.
unsafe impl<T: Send + Sync, A: PoolAlloc<T> + Send> Send for ObjectPool<T, A> {}
unsafe impl<T: Send + Sync, A: PoolAlloc<T> + Sync> Sync for ObjectPool<T, A> {}

impl<T, A: PoolAlloc<T>> ObjectPool<T, A> {
    pub fn new(alloc: A, size_limit: u64, reuse_limit: u64) -> Self {
        Self {
            alloc,
            inner: Mutex::new(PoolInner {
                reuse_queue: VecDeque::new(),
                size_limit,
                reuse_limit,
                current_size: 0,
            }),
        }
    }

    /// Hands out an object, recycling a released one when available.
    pub fn acquire(&self) -> Result<NonNull<T>, PoolError> {
        let mut inner = self.inner.lock();
        if let Some(obj) = inner.reuse_queue.pop_front() {
            self.alloc.reuse(obj);
            return Ok(obj);
        }
        if inner.current_size >= inner.size_limit {
            return Err(PoolError::Exhausted {
                limit: inner.size_limit,
            });
        }
        match self.alloc.allocate() {
            Some(obj) => {
                inner.current_size += 1;
                debug_assert!(inner.current_size <= inner.size_limit);
                Ok(obj)
            }
            None => Err(PoolError::AllocFailed),
        }
    }

    /// Returns an object to the pool. It is queued for reuse while the
    /// queue is under `reuse_limit`, otherwise freed immediately. The
    /// object must not be accessed after this call.
    pub fn release(&self, obj: NonNull<T>) {
        let mut inner = self.inner.lock();
        if inner.reuse_queue.len() as u64 >= inner.reuse_limit {
            self.alloc.deallocate(obj);
            inner.current_size -= 1;
        } else {
            inner.reuse_queue.push_back(obj);
        }
    }

    /// Raises or lowers the size limit. Fails if the pool already holds
    /// more live objects than the requested limit.
    pub fn set_size_limit(&self, new_limit: u64) -> bool {
        let mut inner = self.inner.lock();
        if new_limit >= inner.current_size {
            inner.size_limit = new_limit;
            true
        } else {
            false
        }
    }

    /// Changes the reuse limit, freeing any surplus queued objects
    /// immediately. Always succeeds.
    pub fn set_reuse_limit(&self, new_limit: u64) {
        let mut inner = self.inner.lock();
        inner.reuse_limit = new_limit;
        while inner.reuse_queue.len() as u64 > new_limit {
            // Queue is non-empty inside the loop condition.
            if let Some(obj) = inner.reuse_queue.pop_front() {
                self.alloc.deallocate(obj);
                inner.current_size -= 1;
            }
        }
    }

    pub fn size_limit(&self) -> u64 {
        self.inner.lock().size_limit
    }

    /// Live objects: handed out plus queued.
    pub fn current_size(&self) -> u64 {
        self.inner.lock().current_size
    }

    /// Objects currently queued for reuse.
    pub fn queued(&self) -> usize {
        self.inner.lock().reuse_queue.len()
    }
}

impl<T, A: PoolAlloc<T>> Drop for ObjectPool<T, A> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        while let Some(obj) = inner.reuse_queue.pop_front() {
            self.alloc.deallocate(obj);
        }
    }
}

/// Pool of 1 MiB raw blocks, the form every store consumes.
pub type BlockPool = ObjectPool<RawBlock, BlockAlloc>;

impl ObjectPool<RawBlock, BlockAlloc> {
    pub fn with_limits(size_limit: u64, reuse_limit: u64) -> Self {
        ObjectPool::new(BlockAlloc, size_limit, reuse_limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct U32Alloc;

    impl PoolAlloc<u32> for U32Alloc {
        fn allocate(&self) -> Option<NonNull<u32>> {
            NonNull::new(Box::into_raw(Box::new(0u32)))
        }

        fn reuse(&self, _obj: NonNull<u32>) {}

        fn deallocate(&self, obj: NonNull<u32>) {
            // SAFETY: obj came from Box::into_raw in allocate.
            unsafe { drop(Box::from_raw(obj.as_ptr())) };
        }
    }

    #[test]
    fn released_object_is_handed_out_again() {
        let pool = ObjectPool::new(U32Alloc, 1, 1);
        let first = pool.acquire().unwrap();
        pool.release(first);
        for _ in 0..10 {
            let again = pool.acquire().unwrap();
            assert_eq!(again, first);
            pool.release(again);
        }
    }

    #[test]
    fn acquire_past_size_limit_is_exhausted() {
        let pool = ObjectPool::new(U32Alloc, 1, 1);
        let only = pool.acquire().unwrap();
        assert_eq!(pool.acquire(), Err(PoolError::Exhausted { limit: 1 }));
        pool.release(only);
        assert!(pool.acquire().is_ok());
    }

    #[test]
    fn limits_shrink_and_trim_the_queue() {
        let size_limit = 10u64;
        let pool = ObjectPool::new(U32Alloc, size_limit, size_limit);

        let handed: Vec<_> = (0..size_limit).map(|_| pool.acquire().unwrap()).collect();
        for obj in &handed {
            pool.release(*obj);
        }
        assert_eq!(pool.queued() as u64, size_limit);

        pool.set_reuse_limit(size_limit / 2);
        assert_eq!(pool.queued() as u64, size_limit / 2);
        assert!(pool.set_size_limit(size_limit / 2));

        // The survivors all come from the original allocation set.
        let mut out = Vec::new();
        for _ in 0..size_limit / 2 {
            let obj = pool.acquire().unwrap();
            assert!(handed.contains(&obj));
            out.push(obj);
        }
        assert!(matches!(pool.acquire(), Err(PoolError::Exhausted { .. })));
        for obj in out {
            pool.release(obj);
        }
    }

    #[test]
    fn set_size_limit_below_live_count_fails() {
        let pool = ObjectPool::new(U32Alloc, 4, 4);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(!pool.set_size_limit(1));
        assert!(pool.set_size_limit(2));
        pool.release(a);
        pool.release(b);
    }

    #[test]
    fn zero_reuse_limit_never_recycles() {
        let pool = ObjectPool::new(U32Alloc, 2, 0);
        let obj = pool.acquire().unwrap();
        pool.release(obj);
        assert_eq!(pool.queued(), 0);
        assert_eq!(pool.current_size(), 0);
    }

    #[test]
    fn block_pool_hands_out_aligned_blocks() {
        let pool = BlockPool::with_limits(1, 1);
        let block = pool.acquire().unwrap();
        // SAFETY: block is live until released.
        assert_eq!(unsafe { block.as_ref() }.base() % super::super::block::BLOCK_SIZE, 0);
        pool.release(block);
    }
}
