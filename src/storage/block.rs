//! # Raw Block
//!
//! Fixed-size 1 MiB memory blocks that stores carve into record slots. A
//! block is allocated at 1 MiB alignment so the low 20 bits of its address
//! are zero, which is what lets [`Slot`](super::Slot) pack a block pointer
//! and a slot index into one machine word.
//!
//! ## Layout
//!
//! ```text
//! Offset  Size          Field
//! ------  ------------  -------------------------------------------
//! 0       4             insert word (atomic u32)
//! 4..     per store     slot bitmap + record cells, laid out by the
//!                       owning store for its record type
//! ```
//!
//! ## Insert Word
//!
//! ```text
//! Bit 31:     busy flag - one allocator is working inside this block
//! Bits 0-30:  insert head - next never-used slot index
//! ```
//!
//! The insert head only grows during a block's lifetime; slot recycling is
//! a compaction concern, not an insert-path one. The busy flag serializes
//! allocators within a single block while leaving other blocks available,
//! and both transitions are expected-value CAS so a lost race is reported
//! to the caller instead of silently retried.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU32, Ordering};

use super::pool::PoolAlloc;

/// Size (and alignment) of every raw block.
pub const BLOCK_SIZE: usize = 1 << 20;

/// Bytes reserved at the front of a block for the insert word.
pub const INSERT_WORD_SIZE: usize = std::mem::size_of::<AtomicU32>();

const BUSY_BIT: u32 = 1 << 31;
const HEAD_MASK: u32 = BUSY_BIT - 1;

/// A 1 MiB block-size-aligned chunk of slot storage.
///
/// Blocks are always created through [`BlockAlloc`]; the struct is never
/// constructed by value (it would not fit on the stack anyway).
#[repr(C, align(1048576))]
pub struct RawBlock {
    insert_word: AtomicU32,
    content: UnsafeCell<[u8; BLOCK_SIZE - INSERT_WORD_SIZE]>,
}

// SAFETY: content is only written through raw pointers by the slot owner
// (serialized by the busy flag, the slot bitmap and the per-record latch);
// the insert word is atomic.
unsafe impl Send for RawBlock {}
unsafe impl Sync for RawBlock {}

impl RawBlock {
    /// The block's base address. Low `log2(BLOCK_SIZE)` bits are zero.
    pub fn base(&self) -> usize {
        self as *const RawBlock as usize
    }

    /// Current insert head (busy flag masked off).
    pub fn insert_head(&self) -> u32 {
        self.insert_word.load(Ordering::Acquire) & HEAD_MASK
    }

    /// Marks the block busy. Fails if another allocator already holds it.
    pub fn set_busy(&self) -> bool {
        let idle = self.insert_word.load(Ordering::Relaxed) & HEAD_MASK;
        self.insert_word
            .compare_exchange(idle, idle | BUSY_BIT, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Clears the busy flag. Fails if the block is not busy.
    pub fn clear_busy(&self) -> bool {
        let val = self.insert_word.load(Ordering::Relaxed);
        if val & BUSY_BIT == 0 {
            return false;
        }
        self.insert_word
            .compare_exchange(val, val & HEAD_MASK, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    /// Advances the insert head by one, preserving the busy flag. Must only
    /// be called by the allocator that holds the busy flag.
    pub fn bump_insert_head(&self) -> u32 {
        self.insert_word.fetch_add(1, Ordering::AcqRel) & HEAD_MASK
    }

    /// Raw pointer to the byte at `offset` from the block base.
    ///
    /// # Safety
    ///
    /// `offset` must lie in `[INSERT_WORD_SIZE, BLOCK_SIZE)` and the caller
    /// must have exclusive or properly synchronized access to the bytes it
    /// touches through the returned pointer.
    pub unsafe fn byte_at(&self, offset: usize) -> *mut u8 {
        debug_assert!((INSERT_WORD_SIZE..BLOCK_SIZE).contains(&offset));
        (self.content.get() as *mut u8).add(offset - INSERT_WORD_SIZE)
    }
}

/// Aligned allocator for raw blocks.
///
/// `alloc_zeroed` with the block's own layout gives the 1 MiB alignment the
/// slot representation depends on; recycled blocks are re-zeroed so a store
/// picking one up observes the same state as a fresh allocation.
pub struct BlockAlloc;

impl PoolAlloc<RawBlock> for BlockAlloc {
    fn allocate(&self) -> Option<NonNull<RawBlock>> {
        let layout = Layout::new::<RawBlock>();
        // SAFETY: layout has non-zero size; a zeroed RawBlock is valid
        // (zero insert word, zero content).
        let ptr = unsafe { alloc_zeroed(layout) };
        NonNull::new(ptr as *mut RawBlock)
    }

    fn reuse(&self, block: NonNull<RawBlock>) {
        // SAFETY: the block sits on the pool's free queue, so no thread
        // holds references into it.
        unsafe { std::ptr::write_bytes(block.as_ptr() as *mut u8, 0, BLOCK_SIZE) };
    }

    fn deallocate(&self, block: NonNull<RawBlock>) {
        // SAFETY: block came from allocate() with the same layout.
        unsafe { dealloc(block.as_ptr() as *mut u8, Layout::new::<RawBlock>()) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestBlock(NonNull<RawBlock>);

    impl TestBlock {
        fn new() -> Self {
            Self(BlockAlloc.allocate().unwrap())
        }

        fn get(&self) -> &RawBlock {
            // SAFETY: allocation is live until drop.
            unsafe { self.0.as_ref() }
        }
    }

    impl Drop for TestBlock {
        fn drop(&mut self) {
            BlockAlloc.deallocate(self.0);
        }
    }

    #[test]
    fn raw_block_is_exactly_one_mebibyte() {
        assert_eq!(std::mem::size_of::<RawBlock>(), BLOCK_SIZE);
        assert_eq!(std::mem::align_of::<RawBlock>(), BLOCK_SIZE);
    }

    #[test]
    fn allocated_block_is_aligned_and_zeroed() {
        let block = TestBlock::new();
        assert_eq!(block.get().base() % BLOCK_SIZE, 0);
        assert_eq!(block.get().insert_head(), 0);
        // SAFETY: freshly allocated block, no other accessors.
        let bytes = unsafe {
            std::slice::from_raw_parts(block.get().byte_at(INSERT_WORD_SIZE), 64)
        };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn set_busy_when_idle_succeeds() {
        let block = TestBlock::new();
        assert!(block.get().set_busy());
    }

    #[test]
    fn set_busy_when_already_busy_fails() {
        let block = TestBlock::new();
        assert!(block.get().set_busy());
        assert!(!block.get().set_busy());
    }

    #[test]
    fn clear_busy_when_busy_succeeds() {
        let block = TestBlock::new();
        assert!(block.get().set_busy());
        assert!(block.get().clear_busy());
        assert!(block.get().set_busy());
    }

    #[test]
    fn clear_busy_when_idle_fails() {
        let block = TestBlock::new();
        assert!(!block.get().clear_busy());
    }

    #[test]
    fn bump_preserves_busy_flag_and_grows_head() {
        let block = TestBlock::new();
        assert!(block.get().set_busy());
        assert_eq!(block.get().bump_insert_head(), 0);
        assert_eq!(block.get().bump_insert_head(), 1);
        assert_eq!(block.get().insert_head(), 2);
        assert!(block.get().clear_busy());
        assert_eq!(block.get().insert_head(), 2);
    }

    #[test]
    fn reuse_resets_block_state() {
        let alloc = BlockAlloc;
        let ptr = alloc.allocate().unwrap();
        // SAFETY: allocation is live.
        let block = unsafe { ptr.as_ref() };
        assert!(block.set_busy());
        block.bump_insert_head();
        alloc.reuse(ptr);
        assert_eq!(block.insert_head(), 0);
        assert!(block.set_busy());
        alloc.deallocate(ptr);
    }
}
