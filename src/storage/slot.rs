//! # Slot
//!
//! A compact handle naming one record cell inside a raw block. Because
//! blocks are allocated at 1 MiB alignment, a block's base address has its
//! low 20 bits clear, so the handle packs base and slot index into a single
//! machine word:
//!
//! ```text
//! bits 20..  block base address
//! bits 0..20 slot index within the block
//! ```
//!
//! Slots are plain values. They borrow nothing and own nothing; the index
//! in the low bits is a record-cell ordinal, not a byte offset, and only
//! the store that issued a slot knows the geometry to turn it back into an
//! address.

use std::fmt;

use super::block::{RawBlock, BLOCK_SIZE};

const INDEX_MASK: usize = BLOCK_SIZE - 1;

/// Packed (block, slot index) handle for a record's storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(usize);

impl Slot {
    /// The all-zero slot: refers to nothing.
    pub const UNINITIALIZED: Slot = Slot(0);

    pub fn new(block: &RawBlock, index: u32) -> Self {
        let base = block.base();
        debug_assert_eq!(base & INDEX_MASK, 0, "block base must be 1 MiB aligned");
        debug_assert!((index as usize) < BLOCK_SIZE, "index must fit the low bits");
        Slot(base | index as usize)
    }

    /// The block this slot points into.
    pub fn block(self) -> *const RawBlock {
        (self.0 & !INDEX_MASK) as *const RawBlock
    }

    /// The record-cell ordinal within the block.
    pub fn index(self) -> u32 {
        (self.0 & INDEX_MASK) as u32
    }

    pub fn is_uninitialized(self) -> bool {
        self.0 == 0
    }
}

impl Default for Slot {
    fn default() -> Self {
        Slot::UNINITIALIZED
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slot")
            .field("block", &self.block())
            .field("index", &self.index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::pool::BlockPool;

    #[test]
    fn uninitialized_is_zero_and_default() {
        assert!(Slot::UNINITIALIZED.is_uninitialized());
        assert!(Slot::default().is_uninitialized());
        assert_eq!(Slot::UNINITIALIZED.index(), 0);
    }

    #[test]
    fn round_trips_block_and_index() {
        let pool = BlockPool::with_limits(1, 1);
        let block = pool.acquire().unwrap();
        // SAFETY: block is live until released.
        let block_ref = unsafe { block.as_ref() };

        let slot = Slot::new(block_ref, 37);
        assert_eq!(slot.block(), block.as_ptr() as *const _);
        assert_eq!(slot.index(), 37);
        assert!(!slot.is_uninitialized());

        let other = Slot::new(block_ref, 38);
        assert_ne!(slot, other);
        assert_eq!(other.index() - slot.index(), 1);

        pool.release(block);
    }
}
