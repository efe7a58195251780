//! # Typed Store
//!
//! A store carves raw blocks into fixed-size cells for one record type and
//! hands out [`Slot`] handles. It owns the per-type block list, draws
//! blocks from a shared [`BlockPool`], and computes the in-block layout
//! from the record's size and alignment at compile time.
//!
//! ## In-Block Layout (per record type)
//!
//! ```text
//! Offset            Size               Field
//! ----------------  -----------------  --------------------------------
//! 0                 4                  insert word (busy | insert head)
//! 8                 BITMAP_BYTES       slot bitmap (atomic u64 words)
//! DATA_OFFSET       SLOTS * RECORD     record cells
//! ```
//!
//! `DATA_OFFSET` is rounded up to the record's alignment; since blocks are
//! 1 MiB-aligned, cell addresses end up properly aligned too.
//!
//! ## Insert Protocol
//!
//! 1. Scan forward from the insertion head for a non-busy block and mark
//!    it busy.
//! 2. Claim the slot at the block's insert head: flip its bitmap bit
//!    0 -> 1 (a redundant check under the busy flag) and advance the head.
//! 3. If the block is full, clear busy, advance the insertion-head cursor
//!    past it, and move on - appending a fresh pool block at the tail once
//!    the scan runs off the end of the list.
//! 4. Copy the caller's record into the claimed cell, leaving the cell
//!    latched by the inserting transaction.
//!
//! The insertion-head cursor has its own latch, separate from the block
//! list's, so concurrent inserts mostly contend on per-block busy flags
//! rather than one store-wide lock. Lock order is insertion-head before
//! blocks, and the busy flag is never held across a blocks-latch
//! acquisition.
//!
//! ## Ownership
//!
//! The store exclusively owns its blocks and releases every one of them
//! back to the pool on drop. Slots are opaque value handles; resolving one
//! back to a record is only meaningful on the store that issued it.

use std::marker::PhantomData;
use std::mem;
use std::ptr::NonNull;
use std::sync::Arc;

use eyre::{ensure, Result};
use parking_lot::Mutex;

use super::block::{RawBlock, BLOCK_SIZE};
use super::pool::BlockPool;
use super::slot::Slot;
use crate::container::ConcurrentBitmap;
use crate::mvcc::record::{DeltaReader, MvccRecord};
use crate::mvcc::transaction::TransactionContext;

// First byte of the slot bitmap: the insert word padded to word alignment.
const BITMAP_OFFSET: usize = 8;

const fn align_up(n: usize, align: usize) -> usize {
    (n + align - 1) & !(align - 1)
}

/// A fixed-size record type a store can lay out in block cells.
///
/// # Safety
///
/// Implementors guarantee that the all-zero bit pattern is a valid,
/// unlatched record, because cells are reinterpreted directly from zeroed
/// block memory before `install_into` populates them.
pub unsafe trait Record: Sized {
    /// Copies this record into `cell`, leaving the cell latched by `ctx`.
    /// Returns false if the cell's latch cannot be acquired.
    fn install_into(&self, cell: &Self, ctx: &TransactionContext) -> bool;
}

/// Slot allocator and cell resolver for records of type `R`.
pub struct Store<R: Record> {
    pool: Arc<BlockPool>,
    blocks: Mutex<Vec<NonNull<RawBlock>>>,
    // Index of the first block believed to have free slots.
    insertion_head: Mutex<usize>,
    _record: PhantomData<fn() -> R>,
}

// SAFETY: the block list is mutex-guarded and block contents are governed
// by the busy/bitmap/latch protocol; R crosses threads inside the cells.
unsafe impl<R: Record + Send + Sync> Send for Store<R> {}
unsafe impl<R: Record + Send + Sync> Sync for Store<R> {}

impl<R: Record> Store<R> {
    pub const RECORD_SIZE: usize = mem::size_of::<R>();

    // Slot count ignoring the bitmap's own footprint; used to size the
    // bitmap region, so it only ever overestimates.
    const MAX_SLOTS: usize = (BLOCK_SIZE - BITMAP_OFFSET) * 8 / (Self::RECORD_SIZE * 8 + 1);

    const BITMAP_BYTES: usize = ConcurrentBitmap::bytes_for(Self::MAX_SLOTS);

    const DATA_OFFSET: usize =
        align_up(BITMAP_OFFSET + Self::BITMAP_BYTES, mem::align_of::<R>());

    /// Record cells per block for this record type.
    pub const SLOTS_PER_BLOCK: usize = (BLOCK_SIZE - Self::DATA_OFFSET) / Self::RECORD_SIZE;

    /// Creates a store with one block pre-acquired from `pool`.
    pub fn new(pool: Arc<BlockPool>) -> Result<Self> {
        debug_assert!(Self::SLOTS_PER_BLOCK > 0, "record type too large for a block");
        let first = pool.acquire()?;
        Ok(Self {
            pool,
            blocks: Mutex::new(vec![first]),
            insertion_head: Mutex::new(0),
            _record: PhantomData,
        })
    }

    /// Reserves a slot and copies `record` into it. The new cell is left
    /// latched by `ctx`; the latch is released by the transaction's
    /// deferred commit/abort actions.
    ///
    /// Fails with the pool's exhaustion error when every block is full
    /// and the pool cannot supply another.
    pub fn insert(&self, ctx: &TransactionContext, record: &R) -> Result<Slot> {
        let slot = self.reserve_slot()?;
        // SAFETY: the slot was just reserved from this store.
        let cell = unsafe { self.record_at(slot) };
        ensure!(
            record.install_into(cell, ctx),
            "freshly reserved cell was already latched"
        );
        Ok(slot)
    }

    /// Resolves a slot to its record cell.
    ///
    /// # Safety
    ///
    /// `slot` must have been returned by `insert` on this store, which is
    /// what guarantees the block is live and the cell initialized.
    pub unsafe fn record_at(&self, slot: Slot) -> &R {
        debug_assert!(!slot.is_uninitialized());
        debug_assert!((slot.index() as usize) < Self::SLOTS_PER_BLOCK);
        let block = &*slot.block();
        let addr =
            block.byte_at(Self::DATA_OFFSET + slot.index() as usize * Self::RECORD_SIZE);
        &*(addr as *const R)
    }

    fn reserve_slot(&self) -> Result<Slot> {
        let mut i = *self.insertion_head.lock();
        let mut skipped_busy = false;
        loop {
            let block = { self.blocks.lock().get(i).copied() };
            let Some(block) = block else {
                if skipped_busy {
                    // A busy block may free up; rescan before growing.
                    i = *self.insertion_head.lock();
                    skipped_busy = false;
                    continue;
                }
                self.append_block(i)?;
                continue;
            };
            // SAFETY: blocks stay live until the store drops.
            let block = unsafe { block.as_ref() };
            if !block.set_busy() {
                skipped_busy = true;
                i += 1;
                continue;
            }
            let allocated = self.allocate_in(block);
            block.clear_busy();
            match allocated {
                Some(slot) => return Ok(slot),
                None => {
                    self.advance_head_past(i);
                    i += 1;
                }
            }
        }
    }

    /// Claims the slot at the block's insert head. Caller holds the busy
    /// flag. Returns `None` when the block is full.
    fn allocate_in(&self, block: &RawBlock) -> Option<Slot> {
        let head = block.insert_head();
        if head as usize >= Self::SLOTS_PER_BLOCK {
            return None;
        }
        // SAFETY: the bitmap region lies inside the block and is 8-byte
        // aligned by construction of BITMAP_OFFSET.
        let bitmap = unsafe {
            ConcurrentBitmap::from_raw(block.byte_at(BITMAP_OFFSET), Self::SLOTS_PER_BLOCK)
        };
        // The busy flag makes us the only allocator in this block, so the
        // head bit must still be clear; the flip is a redundant check.
        let claimed = bitmap.flip(head as usize, false);
        debug_assert!(claimed, "insert-head bit already set under busy flag");
        if !claimed {
            return None;
        }
        let slot = Slot::new(block, head);
        block.bump_insert_head();
        Some(slot)
    }

    fn advance_head_past(&self, i: usize) {
        let mut head = self.insertion_head.lock();
        if *head == i {
            *head = i + 1;
        }
    }

    fn append_block(&self, expected_len: usize) -> Result<()> {
        let mut blocks = self.blocks.lock();
        // Someone else may have appended while we scanned.
        if blocks.len() > expected_len {
            return Ok(());
        }
        let block = self.pool.acquire()?;
        blocks.push(block);
        Ok(())
    }

    /// Number of blocks currently owned by the store.
    pub fn block_count(&self) -> usize {
        self.blocks.lock().len()
    }
}

impl<T, D> Store<MvccRecord<T, D>>
where
    MvccRecord<T, D>: Record,
    T: Copy,
{
    /// Materializes the tuple state at `slot` visible to `ctx`. See
    /// [`MvccRecord::read_record`] for the MVTO walk.
    ///
    /// `slot` must have been issued by this store; passing a foreign slot
    /// is a logic error caught only in debug builds.
    pub fn read(
        &self,
        slot: Slot,
        ctx: &TransactionContext,
        reader: DeltaReader<T, D>,
    ) -> Option<T> {
        if slot.is_uninitialized() {
            return None;
        }
        debug_assert!(self.contains(slot));
        // SAFETY: per the documented contract, slot came from this store.
        unsafe { self.record_at(slot) }.read_record(ctx, reader)
    }
}

impl<R: Record> Store<R> {
    #[allow(dead_code)]
    fn contains(&self, slot: Slot) -> bool {
        (slot.index() as usize) < Self::SLOTS_PER_BLOCK
            && self
                .blocks
                .lock()
                .iter()
                .any(|b| b.as_ptr() as *const RawBlock == slot.block())
    }
}

impl<R: Record> Drop for Store<R> {
    fn drop(&mut self) {
        let blocks = self.blocks.get_mut();
        for block in blocks.drain(..) {
            self.pool.release(block);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::record::DeltaRecord;
    use crate::mvcc::transaction::TransactionManager;
    use crate::storage::pool::PoolError;

    // Cells of ~64 KiB so a block holds 16 slots and block turnover is
    // cheap to exercise.
    type BigRecord = MvccRecord<[u8; 65488], u8>;
    type SmallRecord = MvccRecord<u64, u8>;

    #[test]
    fn layout_fits_inside_a_block() {
        assert!(Store::<SmallRecord>::SLOTS_PER_BLOCK > 10_000);
        assert!(
            Store::<SmallRecord>::DATA_OFFSET
                + Store::<SmallRecord>::SLOTS_PER_BLOCK * Store::<SmallRecord>::RECORD_SIZE
                <= BLOCK_SIZE
        );
        assert!(
            Store::<SmallRecord>::BITMAP_BYTES * 8 >= Store::<SmallRecord>::SLOTS_PER_BLOCK
        );
        assert_eq!(Store::<BigRecord>::SLOTS_PER_BLOCK, 16);
    }

    #[test]
    fn inserts_hand_out_consecutive_slots_in_one_block() {
        let pool = Arc::new(BlockPool::with_limits(10, 1));
        let store = Store::<SmallRecord>::new(pool).unwrap();

        let manager = TransactionManager::new();
        let ctx = manager.begin_transaction();
        let record = SmallRecord::new_latched(&ctx, 5);

        let a = store.insert(&ctx, &record).unwrap();
        let b = store.insert(&ctx, &record).unwrap();
        let c = store.insert(&ctx, &record).unwrap();

        assert_eq!(a.block(), b.block());
        assert_eq!(b.block(), c.block());
        assert_eq!(b.index() - a.index(), 1);
        assert_eq!(c.index() - b.index(), 1);
    }

    #[test]
    fn inserted_record_is_latched_and_holds_the_payload() {
        let pool = Arc::new(BlockPool::with_limits(1, 1));
        let store = Store::<SmallRecord>::new(pool).unwrap();

        let manager = TransactionManager::new();
        let _ctx1 = manager.begin_transaction();
        let ctx = manager.begin_transaction();
        let record = SmallRecord::new_latched(&ctx, 123_456);
        let slot = store.insert(&ctx, &record).unwrap();

        // SAFETY: slot issued by this store above.
        let cell = unsafe { store.record_at(slot) };
        assert!(cell.is_latched_by(&ctx));
        assert_eq!(cell.begin_timestamp(), ctx.ts());
        assert_eq!(cell.data(), 123_456);
        assert!(cell.next().is_none());
    }

    #[test]
    fn different_stores_hand_out_different_slots() {
        let pool1 = Arc::new(BlockPool::with_limits(1, 1));
        let pool2 = Arc::new(BlockPool::with_limits(1, 1));
        let store1 = Store::<SmallRecord>::new(pool1).unwrap();
        let store2 = Store::<SmallRecord>::new(pool2).unwrap();

        let manager = TransactionManager::new();
        let ctx = manager.begin_transaction();
        let record = SmallRecord::new_latched(&ctx, 0);

        let a = store1.insert(&ctx, &record).unwrap();
        let b = store2.insert(&ctx, &record).unwrap();
        assert_ne!(a, b);
        assert_ne!(a.block(), b.block());
    }

    #[test]
    fn full_block_spills_into_a_fresh_pool_block() {
        let pool = Arc::new(BlockPool::with_limits(2, 1));
        let store = Store::<BigRecord>::new(pool).unwrap();

        let manager = TransactionManager::new();
        let ctx = manager.begin_transaction();
        let record = BigRecord::new_latched(&ctx, [0u8; 65488]);

        let mut slots = Vec::new();
        for _ in 0..Store::<BigRecord>::SLOTS_PER_BLOCK {
            slots.push(store.insert(&ctx, &record).unwrap());
        }
        assert_eq!(store.block_count(), 1);
        assert!(slots.windows(2).all(|w| w[0].block() == w[1].block()));

        let spilled = store.insert(&ctx, &record).unwrap();
        assert_eq!(store.block_count(), 2);
        assert_ne!(spilled.block(), slots[0].block());
        assert_eq!(spilled.index(), 0);
    }

    #[test]
    fn pool_exhaustion_surfaces_as_a_distinct_error() {
        let pool = Arc::new(BlockPool::with_limits(1, 1));
        let store = Store::<BigRecord>::new(pool).unwrap();

        let manager = TransactionManager::new();
        let ctx = manager.begin_transaction();
        let record = BigRecord::new_latched(&ctx, [0u8; 65488]);

        for _ in 0..Store::<BigRecord>::SLOTS_PER_BLOCK {
            store.insert(&ctx, &record).unwrap();
        }
        let err = store.insert(&ctx, &record).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PoolError>(),
            Some(PoolError::Exhausted { limit: 1 })
        ));
    }

    #[test]
    fn read_resolves_the_inserted_tuple() {
        let pool = Arc::new(BlockPool::with_limits(1, 1));
        let store = Store::<SmallRecord>::new(pool).unwrap();

        let manager = TransactionManager::new();
        let ctx = manager.begin_transaction();
        let record = SmallRecord::new_latched(&ctx, 77);
        let slot = store.insert(&ctx, &record).unwrap();

        fn overlay(tuple: &mut u64, delta: &u8) {
            *tuple = u64::from(*delta);
        }
        assert_eq!(store.read(slot, &ctx, overlay), Some(77));
        assert_eq!(store.read(Slot::UNINITIALIZED, &ctx, overlay), None);
    }

    #[test]
    fn store_read_walks_the_delta_chain() {
        let pool = Arc::new(BlockPool::with_limits(1, 1));
        let delta_pool = Arc::new(BlockPool::with_limits(1, 1));
        let store = Store::<SmallRecord>::new(pool).unwrap();
        let delta_store = Store::<DeltaRecord<u8>>::new(delta_pool).unwrap();

        let manager = TransactionManager::new();
        let ctx = manager.begin_transaction();

        let head = SmallRecord::new_latched(&ctx, 5);
        let head_slot = store.insert(&ctx, &head).unwrap();
        // SAFETY: slots issued by the stores above.
        let head_cell = unsafe { store.record_at(head_slot) };
        head_cell.install(&ctx);

        let delta = DeltaRecord::<u8>::new_latched(&ctx, 9);
        let delta_slot = delta_store.insert(&ctx, &delta).unwrap();
        let delta_cell = unsafe { delta_store.record_at(delta_slot) };

        assert!(head_cell.install_next_version(delta_cell, &ctx));
        delta_cell.commit(&ctx, crate::mvcc::transaction::INFINITY);
        head_cell.commit(&ctx, ctx.ts());

        fn overlay(tuple: &mut u64, delta: &u8) {
            *tuple = u64::from(*delta);
        }
        let ctx2 = manager.begin_transaction();
        assert_eq!(store.read(head_slot, &ctx2, overlay), Some(9));
    }
}
