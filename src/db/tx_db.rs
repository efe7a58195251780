//! # Transaction Database
//!
//! Stores per-transaction metadata rows, indexed by txid, with a second
//! index from block hash to the txids that block carries. The block-hash
//! index deliberately maps to txids rather than slots: when a transaction
//! eventually migrates out of the hot set only the txid index needs
//! repointing.
//!
//! Confirmation state travels through (position, candidate) deltas; the
//! immutable transaction fields are written once at store time.

use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::mvcc::record::{DeltaRecord, MvccRecord};
use crate::mvcc::transaction::TransactionContext;
use crate::mvto::Accessor;
use crate::storage::{BlockPool, Slot, Store};
use crate::tuples::{Hash256, TxDelta, TxTuple, POSITION_UNSET};

/// Head record type for transaction rows.
pub type TxRecord = MvccRecord<TxTuple, TxDelta>;

/// Delta record type for confirmation updates.
pub type TxDeltaRecord = DeltaRecord<TxDelta>;

/// Transaction-metadata storage with txid and block-hash lookups.
pub struct TransactionDatabase {
    tx_pool: Arc<BlockPool>,
    delta_pool: Arc<BlockPool>,
    accessor: Accessor<TxTuple, TxDelta>,

    hash_index: RwLock<HashMap<Hash256, Slot>>,
    block_txs_index: RwLock<HashMap<Hash256, Vec<Hash256>>>,
}

impl TransactionDatabase {
    /// Creates the database with its two pools sized by the given
    /// (size, reuse) limit pairs.
    pub fn new(
        tx_size_limit: u64,
        tx_reuse_limit: u64,
        delta_size_limit: u64,
        delta_reuse_limit: u64,
    ) -> Result<Self> {
        let tx_pool = Arc::new(BlockPool::with_limits(tx_size_limit, tx_reuse_limit));
        let delta_pool = Arc::new(BlockPool::with_limits(delta_size_limit, delta_reuse_limit));
        let tx_store = Arc::new(Store::<TxRecord>::new(Arc::clone(&tx_pool))?);
        let delta_store = Arc::new(Store::<TxDeltaRecord>::new(Arc::clone(&delta_pool))?);
        Ok(Self {
            tx_pool,
            delta_pool,
            accessor: Accessor::new(tx_store, delta_store),
            hash_index: RwLock::new(HashMap::new()),
            block_txs_index: RwLock::new(HashMap::new()),
        })
    }

    /// Pool feeding the head store, for runtime limit tuning.
    pub fn tx_pool(&self) -> &BlockPool {
        &self.tx_pool
    }

    /// Pool feeding the delta store, for runtime limit tuning.
    pub fn delta_pool(&self) -> &BlockPool {
        &self.delta_pool
    }

    /// Stores one transaction row and indexes it by txid. Aborts `ctx`
    /// and returns false on failure.
    pub fn store(&self, ctx: &mut TransactionContext, txid: Hash256, tuple: TxTuple) -> bool {
        let slot = match self.accessor.put(ctx, tuple) {
            Ok(slot) if !slot.is_uninitialized() => slot,
            _ => {
                ctx.abort();
                return false;
            }
        };
        self.hash_index.write().insert(txid, slot);
        true
    }

    /// Stores the transactions of one block and records the block-hash to
    /// txid association. Aborts `ctx` and returns false if any row fails;
    /// rows already stored are rolled back by the abort actions.
    pub fn store_block(
        &self,
        ctx: &mut TransactionContext,
        block_hash: Hash256,
        txs: &[(Hash256, TxTuple)],
    ) -> bool {
        for (txid, tuple) in txs {
            if !self.store(ctx, *txid, *tuple) {
                return false;
            }
        }
        self.block_txs_index
            .write()
            .insert(block_hash, txs.iter().map(|(txid, _)| *txid).collect());
        true
    }

    /// Fetches the version of a row visible to `ctx`, by txid. Aborts
    /// `ctx` when the txid is unknown.
    pub fn get(&self, ctx: &mut TransactionContext, txid: &Hash256) -> Option<TxTuple> {
        let slot = match self.hash_index.read().get(txid) {
            Some(slot) => *slot,
            None => {
                ctx.abort();
                return None;
            }
        };
        self.accessor.get(ctx, slot, TxTuple::read_from_delta)
    }

    /// Txids associated with a block hash, in block order.
    pub fn block_txids(&self, block_hash: &Hash256) -> Option<Vec<Hash256>> {
        self.block_txs_index.read().get(block_hash).cloned()
    }

    /// Marks a transaction's outputs spent by a candidate block. Aborts
    /// `ctx` and returns false on failure.
    pub fn candidate(&self, ctx: &mut TransactionContext, txid: &Hash256) -> bool {
        self.apply_delta(ctx, txid, |tuple| TxDelta {
            position: tuple.position,
            candidate: 1,
        })
    }

    /// Unmarks outputs formerly spent by a candidate block. Aborts `ctx`
    /// and returns false on failure.
    pub fn uncandidate(&self, ctx: &mut TransactionContext, txid: &Hash256) -> bool {
        self.apply_delta(ctx, txid, |tuple| TxDelta {
            position: tuple.position,
            candidate: 0,
        })
    }

    /// Confirms a transaction at `position` within its block. Aborts
    /// `ctx` and returns false on failure.
    pub fn confirm(&self, ctx: &mut TransactionContext, txid: &Hash256, position: u16) -> bool {
        self.apply_delta(ctx, txid, |tuple| TxDelta {
            position,
            candidate: tuple.candidate,
        })
    }

    /// Demotes a transaction back to the pool. Aborts `ctx` and returns
    /// false on failure.
    pub fn unconfirm(&self, ctx: &mut TransactionContext, txid: &Hash256) -> bool {
        self.apply_delta(ctx, txid, |_| TxDelta {
            position: POSITION_UNSET,
            candidate: 0,
        })
    }

    /// Confirms every transaction of a block in index order.
    pub fn confirm_block(&self, ctx: &mut TransactionContext, block_hash: &Hash256) -> bool {
        let Some(txids) = self.block_txids(block_hash) else {
            ctx.abort();
            return false;
        };
        for (position, txid) in txids.iter().enumerate() {
            if !self.confirm(ctx, txid, position as u16) {
                return false;
            }
        }
        true
    }

    /// Demotes every transaction of a block back to the pool.
    pub fn unconfirm_block(&self, ctx: &mut TransactionContext, block_hash: &Hash256) -> bool {
        let Some(txids) = self.block_txids(block_hash) else {
            ctx.abort();
            return false;
        };
        for txid in &txids {
            if !self.unconfirm(ctx, txid) {
                return false;
            }
        }
        true
    }

    fn apply_delta(
        &self,
        ctx: &mut TransactionContext,
        txid: &Hash256,
        make_delta: impl FnOnce(&TxTuple) -> TxDelta,
    ) -> bool {
        let slot = match self.hash_index.read().get(txid) {
            Some(slot) => *slot,
            None => {
                ctx.abort();
                return false;
            }
        };
        let Some(read) = self.accessor.get(ctx, slot, TxTuple::read_from_delta) else {
            ctx.abort();
            return false;
        };
        match self.accessor.update(ctx, slot, make_delta(&read)) {
            Ok(true) => true,
            _ => {
                ctx.abort();
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mvcc::transaction::TransactionManager;

    fn db() -> TransactionDatabase {
        TransactionDatabase::new(1, 1, 1, 1).unwrap()
    }

    fn txid(n: u8) -> Hash256 {
        [n; 32]
    }

    fn tuple() -> TxTuple {
        TxTuple {
            height: 0,
            locktime: 0,
            version: 2,
            position: POSITION_UNSET,
            ..TxTuple::default()
        }
    }

    #[test]
    fn store_then_get_by_txid() {
        let db = db();
        let manager = TransactionManager::new();
        let mut ctx = manager.begin_transaction();
        assert!(db.store(&mut ctx, txid(1), tuple()));
        manager.commit_transaction(&mut ctx);

        let mut reader = manager.begin_transaction();
        let got = db.get(&mut reader, &txid(1)).unwrap();
        assert_eq!(got.version, 2);
        assert_eq!(got.position, POSITION_UNSET);
    }

    #[test]
    fn unknown_txid_aborts_the_context() {
        let db = db();
        let manager = TransactionManager::new();
        let mut ctx = manager.begin_transaction();
        assert_eq!(db.get(&mut ctx, &txid(9)), None);
        assert!(ctx.is_aborted());
    }

    #[test]
    fn confirm_block_positions_transactions_in_order() {
        let db = db();
        let manager = TransactionManager::new();
        let block = [0xAB; 32];

        let mut ctx = manager.begin_transaction();
        let txs = vec![(txid(1), tuple()), (txid(2), tuple()), (txid(3), tuple())];
        assert!(db.store_block(&mut ctx, block, &txs));
        manager.commit_transaction(&mut ctx);

        let mut ctx = manager.begin_transaction();
        assert!(db.confirm_block(&mut ctx, &block));
        manager.commit_transaction(&mut ctx);

        let mut reader = manager.begin_transaction();
        for (want, id) in [(0u16, txid(1)), (1, txid(2)), (2, txid(3))] {
            let got = db.get(&mut reader, &id).unwrap();
            assert_eq!(got.position, want);
        }
        assert_eq!(db.block_txids(&block).unwrap().len(), 3);
    }

    #[test]
    fn unconfirm_block_returns_transactions_to_the_pool() {
        let db = db();
        let manager = TransactionManager::new();
        let block = [0xCD; 32];

        let mut ctx = manager.begin_transaction();
        assert!(db.store_block(&mut ctx, block, &[(txid(4), tuple()), (txid(5), tuple())]));
        manager.commit_transaction(&mut ctx);

        let mut ctx = manager.begin_transaction();
        assert!(db.confirm_block(&mut ctx, &block));
        manager.commit_transaction(&mut ctx);

        let mut ctx = manager.begin_transaction();
        assert!(db.unconfirm_block(&mut ctx, &block));
        manager.commit_transaction(&mut ctx);

        let mut reader = manager.begin_transaction();
        let got = db.get(&mut reader, &txid(4)).unwrap();
        assert_eq!(got.position, POSITION_UNSET);
    }

    #[test]
    fn candidate_flag_sets_without_moving_position() {
        let db = db();
        let manager = TransactionManager::new();

        let mut ctx = manager.begin_transaction();
        assert!(db.store(&mut ctx, txid(6), tuple()));
        manager.commit_transaction(&mut ctx);

        let mut ctx = manager.begin_transaction();
        assert!(db.candidate(&mut ctx, &txid(6)));
        manager.commit_transaction(&mut ctx);

        let mut reader = manager.begin_transaction();
        let got = db.get(&mut reader, &txid(6)).unwrap();
        assert_eq!(got.candidate, 1);
        assert_eq!(got.position, POSITION_UNSET);
    }

    #[test]
    fn uncandidate_clears_the_flag_and_keeps_position() {
        let db = db();
        let manager = TransactionManager::new();
        let block = [0xEF; 32];

        // Confirm at a position first so uncandidate provably leaves the
        // position alone.
        let mut ctx = manager.begin_transaction();
        assert!(db.store_block(&mut ctx, block, &[(txid(7), tuple())]));
        manager.commit_transaction(&mut ctx);

        let mut ctx = manager.begin_transaction();
        assert!(db.confirm_block(&mut ctx, &block));
        manager.commit_transaction(&mut ctx);

        let mut ctx = manager.begin_transaction();
        assert!(db.candidate(&mut ctx, &txid(7)));
        manager.commit_transaction(&mut ctx);

        let mut ctx = manager.begin_transaction();
        assert!(db.uncandidate(&mut ctx, &txid(7)));
        manager.commit_transaction(&mut ctx);

        let mut reader = manager.begin_transaction();
        let got = db.get(&mut reader, &txid(7)).unwrap();
        assert_eq!(got.candidate, 0);
        assert_eq!(got.position, 0);
    }

    #[test]
    fn uncandidate_on_an_unknown_txid_aborts() {
        let db = db();
        let manager = TransactionManager::new();
        let mut ctx = manager.begin_transaction();
        assert!(!db.uncandidate(&mut ctx, &txid(8)));
        assert!(ctx.is_aborted());
    }
}
