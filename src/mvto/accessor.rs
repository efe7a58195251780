//! # MVTO Accessor
//!
//! The transactional surface over a pair of typed stores: one holding head
//! records (full tuples), one holding delta records (diffs). The accessor
//! sequences slot allocation, version-chain splicing and deferred
//! commit/abort bookkeeping so that callers only ever see three
//! operations:
//!
//! ```text
//! put(ctx, tuple)          -> Slot     insert a new row
//! update(ctx, slot, diff)  -> bool     append a delta to the row's chain
//! get(ctx, slot, reader)   -> Option   materialize the visible state
//! ```
//!
//! ## Deferred Finalization
//!
//! Nothing is unlatched inline. `put` and `update` leave every touched
//! cell latched by the calling transaction and register actions on the
//! context:
//!
//! - commit: the superseded version's `end_ts` is finalized to the
//!   writer's timestamp and the new tail's to `INFINITY`, releasing the
//!   latches;
//! - abort: the attachment point's `end_ts` and `next` snapshot (taken
//!   just before the splice) is written back and the latch released,
//!   leaving the chain bit-identical to its pre-mutation state. The
//!   orphaned delta cell stays latched, which keeps it invisible to every
//!   reader; reclaiming it is a garbage-collection concern.
//!
//! ## Conflict Surface
//!
//! `update` returns `Ok(false)` - retry with a fresh transaction - when
//! the record latch is held by another writer, when the chain walk finds
//! an unreadable delta, or when the attachment point has already been
//! read at a higher timestamp (the MVTO write-read rule). Capacity
//! exhaustion is not a conflict: it surfaces as an error carrying the
//! pool's exhaustion variant, and the enclosing transaction must abort.

use std::sync::Arc;

use eyre::Result;
use zerocopy::FromZeros;

use crate::mvcc::record::{DeltaReader, DeltaRecord, MvccRecord, TailSearch};
use crate::mvcc::transaction::{Timestamp, TransactionContext, INFINITY};
use crate::storage::{Slot, Store};

/// Raw cell pointer that deferred actions smuggle across the `Send`
/// boundary of the action list.
struct CellPtr<R>(*const R);

// SAFETY: cells are shared-mutable via atomics and the payload latch
// protocol; latch ownership travels with the transaction context that
// carries the closure, not with any particular thread.
unsafe impl<R: Sync> Send for CellPtr<R> {}

impl<R> CellPtr<R> {
    fn new(cell: &R) -> Self {
        Self(cell as *const R)
    }

    /// # Safety
    ///
    /// The cell's block must still be live, which holds as long as the
    /// owning store exists.
    unsafe fn get(&self) -> &R {
        &*self.0
    }
}

/// `next` pointer snapshot restored by abort actions.
struct ChainSnapshot<D> {
    next: *mut DeltaRecord<D>,
    end_ts: Timestamp,
}

// SAFETY: the pointer is data, not a borrow; see CellPtr.
unsafe impl<D> Send for ChainSnapshot<D> {}

/// Transactional insert/update/read over one head store and one delta
/// store.
pub struct Accessor<T, D>
where
    T: FromZeros + Copy + Send + Sync + 'static,
    D: FromZeros + Copy + Send + Sync + 'static,
{
    head_store: Arc<Store<MvccRecord<T, D>>>,
    delta_store: Arc<Store<DeltaRecord<D>>>,
}

impl<T, D> Accessor<T, D>
where
    T: FromZeros + Copy + Send + Sync + 'static,
    D: FromZeros + Copy + Send + Sync + 'static,
{
    pub fn new(
        head_store: Arc<Store<MvccRecord<T, D>>>,
        delta_store: Arc<Store<DeltaRecord<D>>>,
    ) -> Self {
        Self {
            head_store,
            delta_store,
        }
    }

    /// Inserts `tuple` as a new row. The returned slot addresses a head
    /// cell latched by `ctx` until the transaction concludes; commit
    /// closes the head version at `ctx.ts()`, abort restores the
    /// pre-install state and releases the latch.
    pub fn put(&self, ctx: &mut TransactionContext, tuple: T) -> Result<Slot> {
        let record = MvccRecord::new_latched(ctx, tuple);
        let slot = self.head_store.insert(ctx, &record)?;
        // SAFETY: slot was just issued by head_store.
        let cell = unsafe { self.head_store.record_at(slot) };

        // Snapshot before install so abort restores what a failed put
        // would have left behind.
        let snapshot = ChainSnapshot {
            next: cell.next_ptr(),
            end_ts: cell.end_timestamp(),
        };
        if !cell.install(ctx) {
            return Ok(Slot::UNINITIALIZED);
        }

        let ts = ctx.ts();
        let head = CellPtr::new(cell);
        ctx.register_commit_action(move || {
            // SAFETY: head cells outlive the transaction; see CellPtr.
            unsafe { head.get() }.commit_owned(ts, ts);
        });
        let head = CellPtr::new(cell);
        ctx.register_abort_action(move || {
            // SAFETY: as above.
            let snapshot = snapshot;
            let cell = unsafe { head.get() };
            cell.set_next(snapshot.next);
            cell.commit_owned(ts, snapshot.end_ts);
        });
        Ok(slot)
    }

    /// Appends `delta` to the chain rooted at `slot`. Returns `Ok(false)`
    /// on any write conflict, leaving the chain untouched; the caller is
    /// expected to abort the transaction. `slot` must have been returned
    /// by `put` on this accessor.
    pub fn update(&self, ctx: &mut TransactionContext, slot: Slot, delta: D) -> Result<bool> {
        if slot.is_uninitialized() {
            return Ok(false);
        }
        // SAFETY: documented contract - slot came from put.
        let head = unsafe { self.head_store.record_at(slot) };

        let record = DeltaRecord::new_latched(ctx, delta);
        let delta_slot = self.delta_store.insert(ctx, &record)?;
        // SAFETY: slot was just issued by delta_store.
        let delta_cell = unsafe { self.delta_store.record_at(delta_slot) };

        let attached = match head.find_last_delta(ctx) {
            TailSearch::Empty => Self::splice_after(head, delta_cell, ctx),
            TailSearch::Tail(tail) => Self::splice_after(tail, delta_cell, ctx),
            TailSearch::Conflict => false,
        };
        Ok(attached)
    }

    /// Materializes the tuple state at `slot` visible to `ctx`.
    pub fn get(
        &self,
        ctx: &TransactionContext,
        slot: Slot,
        reader: DeltaReader<T, D>,
    ) -> Option<T> {
        self.head_store.read(slot, ctx, reader)
    }

    /// Splices `delta` after the attachment point `att` (the head or the
    /// current chain tail), registering the deferred finalizers.
    fn splice_after<X: Send + Sync + 'static>(
        att: &MvccRecord<X, D>,
        delta_cell: &DeltaRecord<D>,
        ctx: &mut TransactionContext,
    ) -> bool {
        // MVTO write-read rule: a version already read at a higher
        // timestamp cannot be superseded below that timestamp.
        if att.read_timestamp() > ctx.ts() {
            return false;
        }
        let snapshot = ChainSnapshot {
            next: att.next_ptr(),
            end_ts: att.end_timestamp(),
        };
        if !att.install_next_version(delta_cell, ctx) {
            return false;
        }

        let ts = ctx.ts();
        let delta = CellPtr::new(delta_cell);
        ctx.register_commit_action(move || {
            // SAFETY: delta cells outlive the transaction; see CellPtr.
            unsafe { delta.get() }.commit_owned(ts, INFINITY);
        });
        let attachment = CellPtr::new(att);
        ctx.register_commit_action(move || {
            // SAFETY: as above.
            unsafe { attachment.get() }.commit_owned(ts, ts);
        });
        let attachment = CellPtr::new(att);
        ctx.register_abort_action(move || {
            // SAFETY: as above.
            let snapshot = snapshot;
            let att = unsafe { attachment.get() };
            att.set_next(snapshot.next);
            att.commit_owned(ts, snapshot.end_ts);
        });
        true
    }
}
