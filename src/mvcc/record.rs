//! # MVCC Record
//!
//! The version cell at the core of the engine. Every logical row is a
//! singly-linked chain: a *head* record holding a full tuple, followed by
//! zero or more *delta* records each holding a diff over the accumulated
//! state. Chains are ordered oldest-to-newest and only ever grow at the
//! tail.
//!
//! ## Cell Layout
//!
//! ```text
//! +-----------+-----------+-----------+-----------+--------+---------+
//! | txn_id    | read_ts   | begin_ts  | end_ts    | next   | data    |
//! | (atomic)  | (atomic)  | (atomic)  | (atomic)  | (ptr)  | (inline)|
//! +-----------+-----------+-----------+-----------+--------+---------+
//! ```
//!
//! `txn_id` doubles as the record latch: `NOT_LATCHED` (0) means free,
//! otherwise it holds the owning transaction's timestamp. Every field
//! other than `txn_id` may be written only by the latch holder; readers
//! load them without the latch, which is why they are atomics.
//!
//! ## MVTO Visibility
//!
//! A version is *visible* to a transaction at timestamp `ts` when
//!
//! ```text
//! txn_id ∈ {NOT_LATCHED, ts}  AND  ts >= begin_ts
//! ```
//!
//! and *readable* when `read_ts <= ts`. A read stamps its timestamp into
//! `read_ts` (monotonic max) on every version it observes; a later writer
//! below that timestamp would invert the serialization order and must be
//! refused.
//!
//! ## Chain Splicing
//!
//! `install_next_version` latches the attachment point, installs the new
//! delta (its `end_ts` becomes the writer's timestamp until commit
//! finalizes it), then publishes `end_ts` and `next`. Latch release is
//! deferred: the writer registers commit/abort actions on its context and
//! the chain stays latched until the transaction concludes.
//!
//! ## The `no_next` Sentinel
//!
//! End-of-chain is the null pointer. It never participates in version
//! semantics and its fields are unreadable by construction.

use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, AtomicU64, Ordering};

use zerocopy::FromZeros;

use super::transaction::{Timestamp, TransactionContext, INFINITY, NONE_READ, NOT_LATCHED};
use crate::storage::store::Record;

/// Applies one delta on top of an accumulating tuple during a chain read.
pub type DeltaReader<T, D> = fn(&mut T, &D);

/// A delta cell: same shape as a head cell, with the diff as payload.
pub type DeltaRecord<D> = MvccRecord<D, D>;

/// One version cell: MVCC header plus inline payload plus chain pointer.
#[repr(C)]
pub struct MvccRecord<T, D> {
    // Latch word. NOT_LATCHED means free, otherwise the holder's timestamp.
    txn_id: AtomicU64,
    // Largest timestamp of any transaction that has read this version.
    read_ts: AtomicU64,
    begin_ts: AtomicU64,
    end_ts: AtomicU64,
    next: AtomicPtr<DeltaRecord<D>>,
    data: UnsafeCell<T>,
}

// SAFETY: all header fields are atomics; `data` is written only by the
// latch holder and read only for versions the MVTO rules prove quiescent.
unsafe impl<T: Send + Sync, D: Send + Sync> Send for MvccRecord<T, D> {}
unsafe impl<T: Send + Sync, D: Send + Sync> Sync for MvccRecord<T, D> {}

impl<T, D> MvccRecord<T, D> {
    /// Constructs a version latched by `ctx`: `begin_ts = ctx.ts()`,
    /// `end_ts = INFINITY`, never read, end of chain.
    pub fn new_latched(ctx: &TransactionContext, data: T) -> Self {
        Self {
            txn_id: AtomicU64::new(ctx.ts()),
            read_ts: AtomicU64::new(NONE_READ),
            begin_ts: AtomicU64::new(ctx.ts()),
            end_ts: AtomicU64::new(INFINITY),
            next: AtomicPtr::new(ptr::null_mut()),
            data: UnsafeCell::new(data),
        }
    }

    pub fn begin_timestamp(&self) -> Timestamp {
        self.begin_ts.load(Ordering::Acquire)
    }

    pub fn end_timestamp(&self) -> Timestamp {
        self.end_ts.load(Ordering::Acquire)
    }

    pub fn read_timestamp(&self) -> Timestamp {
        self.read_ts.load(Ordering::Acquire)
    }

    /// Timestamp of the latch holder, or `NOT_LATCHED`.
    pub fn latch_owner(&self) -> Timestamp {
        self.txn_id.load(Ordering::Acquire)
    }

    pub fn is_latched_by(&self, ctx: &TransactionContext) -> bool {
        self.latch_owner() == ctx.ts()
    }

    /// Acquires the record latch for `ctx`. Idempotent for the holder;
    /// fails if another transaction holds it.
    pub fn latch_for_write(&self, ctx: &TransactionContext) -> bool {
        if self.is_latched_by(ctx) {
            return true;
        }
        self.txn_id
            .compare_exchange(NOT_LATCHED, ctx.ts(), Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the latch. Fails if `ctx` is not the holder.
    pub fn release_latch(&self, ctx: &TransactionContext) -> bool {
        self.txn_id
            .compare_exchange(ctx.ts(), NOT_LATCHED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// True when this version may be observed by `ctx` under MVTO.
    pub fn is_visible(&self, ctx: &TransactionContext) -> bool {
        let owner = self.latch_owner();
        (owner == NOT_LATCHED || owner == ctx.ts()) && ctx.ts() >= self.begin_timestamp()
    }

    /// True when reading this version at `ctx` would not invert the order
    /// of an already-performed later read.
    pub fn can_read(&self, ctx: &TransactionContext) -> bool {
        self.read_timestamp() <= ctx.ts()
    }

    /// Records that `ctx` observed this version.
    pub fn stamp_read(&self, ctx: &TransactionContext) {
        self.read_ts.fetch_max(ctx.ts(), Ordering::AcqRel);
    }

    /// Marks a latched version installed: `end_ts` becomes `ctx.ts()`,
    /// to be finalized at commit. Fails if `ctx` does not hold the latch.
    pub fn install(&self, ctx: &TransactionContext) -> bool {
        if !self.is_latched_by(ctx) {
            return false;
        }
        self.end_ts.store(ctx.ts(), Ordering::Release);
        true
    }

    /// Finalizes `end_ts` and releases the latch. The two uses: a
    /// superseded version commits to `ctx.ts()`, the new chain tail
    /// commits to `INFINITY`. Fails if `ctx` does not hold the latch.
    pub fn commit(&self, ctx: &TransactionContext, end_ts: Timestamp) -> bool {
        self.commit_owned(ctx.ts(), end_ts)
    }

    /// Timestamp-keyed variant of [`commit`] for deferred actions, which
    /// outlive any borrow of their transaction context.
    ///
    /// Returns false without touching the record when `owner` no longer
    /// holds the latch. That case is routine: a transaction that puts and
    /// then updates the same row registers two finalizers for the head,
    /// and whichever runs second finds the latch already released.
    ///
    /// [`commit`]: MvccRecord::commit
    pub(crate) fn commit_owned(&self, owner: Timestamp, end_ts: Timestamp) -> bool {
        if self.latch_owner() != owner {
            return false;
        }
        self.end_ts.store(end_ts, Ordering::Release);
        self.txn_id
            .compare_exchange(owner, NOT_LATCHED, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
    }

    /// Raw chain pointer; null is end-of-chain.
    pub fn next_ptr(&self) -> *mut DeltaRecord<D> {
        self.next.load(Ordering::Acquire)
    }

    /// The first delta in the chain, if any.
    pub fn next(&self) -> Option<&DeltaRecord<D>> {
        // SAFETY: a non-null next always points at a delta cell in the
        // delta store, which outlives every chain that references it.
        unsafe { self.next_ptr().as_ref() }
    }

    /// Overwrites the chain pointer. Must only be called by the latch
    /// holder (the abort path restoring a snapshot).
    pub fn set_next(&self, next: *mut DeltaRecord<D>) {
        self.next.store(next, Ordering::Release);
    }

    /// Splices `delta` onto this version: latch this cell, install the
    /// delta, publish `end_ts = ctx.ts()` and `next = delta`. Both cells
    /// stay latched; release happens through the transaction's deferred
    /// actions. Fails without side effects if another transaction holds
    /// this cell's latch, and with this cell still latched if `delta` was
    /// not latched by `ctx`.
    pub fn install_next_version(&self, delta: &DeltaRecord<D>, ctx: &TransactionContext) -> bool {
        if !self.latch_for_write(ctx) {
            return false;
        }
        if !delta.install(ctx) {
            return false;
        }
        self.end_ts.store(ctx.ts(), Ordering::Release);
        self.next
            .store(delta as *const DeltaRecord<D> as *mut _, Ordering::Release);
        true
    }

    /// Iterates the delta chain from the first delta to the end.
    pub fn deltas(&self) -> DeltaIter<'_, D> {
        DeltaIter {
            cur: self.next_ptr(),
            _chain: PhantomData,
        }
    }

    /// Walks the chain looking for the delta a new version may be
    /// attached to. Every traversed delta must be visible and readable by
    /// `ctx`; one that is not makes the whole chain unsafe to append to.
    pub fn find_last_delta(&self, ctx: &TransactionContext) -> TailSearch<'_, D> {
        let mut cur = match self.next() {
            None => return TailSearch::Empty,
            Some(delta) => delta,
        };
        loop {
            if !cur.is_visible(ctx) || !cur.can_read(ctx) {
                return TailSearch::Conflict;
            }
            match cur.next() {
                Some(next) => cur = next,
                None => return TailSearch::Tail(cur),
            }
        }
    }
}

impl<T: Copy, D> MvccRecord<T, D> {
    /// Materializes the tuple state visible to `ctx`: start from the head
    /// payload, overlay each visible and readable delta in chain order,
    /// stop at the first one that is not. Every observed version is
    /// stamped with `ctx`'s read timestamp. Returns `None` when the head
    /// itself is not visible or not readable.
    pub fn read_record(&self, ctx: &TransactionContext, reader: DeltaReader<T, D>) -> Option<T> {
        if !self.is_visible(ctx) || !self.can_read(ctx) {
            return None;
        }
        // SAFETY: the head is visible to ctx, so its payload is either
        // committed (quiescent) or owned by ctx itself.
        let mut result = unsafe { *self.data.get() };
        self.stamp_read(ctx);

        for delta in self.deltas() {
            if !delta.is_visible(ctx) || !delta.can_read(ctx) {
                break;
            }
            // SAFETY: same argument as the head payload above.
            reader(&mut result, unsafe { &*delta.data.get() });
            delta.stamp_read(ctx);
        }
        Some(result)
    }

    /// Copy of the payload. Callers must hold the latch or otherwise know
    /// the version is quiescent; prefer [`read_record`] for MVTO reads.
    ///
    /// [`read_record`]: MvccRecord::read_record
    pub fn data(&self) -> T {
        // SAFETY: see doc contract.
        unsafe { *self.data.get() }
    }

    /// Overwrites the payload. Must only be called by the latch holder.
    pub fn set_data(&self, value: T) {
        // SAFETY: latch holder has exclusive write access to the payload.
        unsafe { *self.data.get() = value };
    }
}

impl<T, D> std::fmt::Debug for MvccRecord<T, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Header only; the payload type is opaque here.
        f.debug_struct("MvccRecord")
            .field("txn_id", &self.latch_owner())
            .field("read_ts", &self.read_timestamp())
            .field("begin_ts", &self.begin_timestamp())
            .field("end_ts", &self.end_timestamp())
            .field("next", &self.next_ptr())
            .finish()
    }
}

/// Outcome of [`MvccRecord::find_last_delta`].
#[derive(Debug)]
pub enum TailSearch<'a, D> {
    /// The chain has no deltas; attach after the head.
    Empty,
    /// The last delta, every delta before it visible and readable.
    Tail(&'a DeltaRecord<D>),
    /// A traversed delta was invisible or unreadable; appending would
    /// race another writer or invert a committed read.
    Conflict,
}

/// Forward iterator over a delta chain.
pub struct DeltaIter<'a, D> {
    cur: *mut DeltaRecord<D>,
    _chain: PhantomData<&'a DeltaRecord<D>>,
}

impl<'a, D> Iterator for DeltaIter<'a, D> {
    type Item = &'a DeltaRecord<D>;

    fn next(&mut self) -> Option<&'a DeltaRecord<D>> {
        // SAFETY: non-null chain pointers always refer to live delta
        // cells; see MvccRecord::next.
        let delta = unsafe { self.cur.as_ref()? };
        self.cur = delta.next_ptr();
        Some(delta)
    }
}

// SAFETY: a zeroed cell is a valid record - zeroed atomics are
// NOT_LATCHED / NONE_READ / begin 0 / end 0, the chain pointer is null,
// and `T: FromZeros` guarantees the zeroed payload is valid. install_into
// first latches the (necessarily unlatched) cell, so the copy is exclusive.
unsafe impl<T, D> Record for MvccRecord<T, D>
where
    T: FromZeros + Copy + Send + Sync,
    D: Send + Sync,
{
    fn install_into(&self, cell: &Self, ctx: &TransactionContext) -> bool {
        if !cell.latch_for_write(ctx) {
            return false;
        }
        cell.read_ts
            .store(self.read_ts.load(Ordering::Relaxed), Ordering::Relaxed);
        cell.begin_ts
            .store(self.begin_ts.load(Ordering::Relaxed), Ordering::Release);
        cell.end_ts
            .store(self.end_ts.load(Ordering::Relaxed), Ordering::Release);
        // SAFETY: cell is latched by ctx, nobody else writes the payload.
        unsafe { *cell.data.get() = *self.data.get() };
        cell.next
            .store(self.next.load(Ordering::Relaxed), Ordering::Release);
        true
    }
}
