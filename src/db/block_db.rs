//! # Block Database
//!
//! Stores block headers, each as an MVCC version chain, and indexes them
//! three ways:
//!
//! ```text
//! hash      -> slot   every stored header
//! height    -> slot   candidate branch
//! height    -> slot   confirmed branch
//! ```
//!
//! A header is first stored (hash-indexed only), later promoted into the
//! candidate index, and from there confirmed or demoted back to the pool.
//! Promotion and demotion never move a block between the candidate and
//! confirmed indexes in one step, so each transition touches exactly one
//! height index.
//!
//! State changes go through the version chain as one-byte deltas; the
//! header data itself is immutable once stored.

use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;
use parking_lot::RwLock;

use crate::mvcc::record::{DeltaRecord, MvccRecord};
use crate::mvcc::transaction::TransactionContext;
use crate::mvto::Accessor;
use crate::storage::{BlockPool, Slot, Store};
use crate::tuples::state;
use crate::tuples::{BlockDelta, BlockTuple, Hash256};

/// Head record type for block headers.
pub type BlockRecord = MvccRecord<BlockTuple, BlockDelta>;

/// Delta record type for block-state updates.
pub type BlockDeltaRecord = DeltaRecord<BlockDelta>;

/// Block-header storage with hash and height lookups.
pub struct BlockDatabase {
    block_pool: Arc<BlockPool>,
    delta_pool: Arc<BlockPool>,
    accessor: Accessor<BlockTuple, BlockDelta>,

    candidate_index: RwLock<HashMap<u64, Slot>>,
    confirmed_index: RwLock<HashMap<u64, Slot>>,
    hash_index: RwLock<HashMap<Hash256, Slot>>,
}

impl BlockDatabase {
    /// Creates the database with its two pools sized by the given
    /// (size, reuse) limit pairs.
    pub fn new(
        block_size_limit: u64,
        block_reuse_limit: u64,
        delta_size_limit: u64,
        delta_reuse_limit: u64,
    ) -> Result<Self> {
        let block_pool = Arc::new(BlockPool::with_limits(block_size_limit, block_reuse_limit));
        let delta_pool = Arc::new(BlockPool::with_limits(delta_size_limit, delta_reuse_limit));
        let block_store = Arc::new(Store::<BlockRecord>::new(Arc::clone(&block_pool))?);
        let delta_store = Arc::new(Store::<BlockDeltaRecord>::new(Arc::clone(&delta_pool))?);
        Ok(Self {
            block_pool,
            delta_pool,
            accessor: Accessor::new(block_store, delta_store),
            candidate_index: RwLock::new(HashMap::new()),
            confirmed_index: RwLock::new(HashMap::new()),
            hash_index: RwLock::new(HashMap::new()),
        })
    }

    /// Pool feeding the head store, for runtime limit tuning.
    pub fn block_pool(&self) -> &BlockPool {
        &self.block_pool
    }

    /// Pool feeding the delta store, for runtime limit tuning.
    pub fn delta_pool(&self) -> &BlockPool {
        &self.delta_pool
    }

    /// Stores a header and indexes it by hash. The row becomes visible to
    /// other transactions once `ctx` commits. Aborts `ctx` and returns
    /// false on failure.
    pub fn store(&self, ctx: &mut TransactionContext, hash: Hash256, tuple: BlockTuple) -> bool {
        let slot = match self.accessor.put(ctx, tuple) {
            Ok(slot) if !slot.is_uninitialized() => slot,
            _ => {
                ctx.abort();
                return false;
            }
        };
        self.hash_index.write().insert(hash, slot);
        true
    }

    /// Fetches the version of a header visible to `ctx`, by hash. Aborts
    /// `ctx` when the hash is unknown.
    pub fn get_by_hash(&self, ctx: &mut TransactionContext, hash: &Hash256) -> Option<BlockTuple> {
        let slot = match self.hash_index.read().get(hash) {
            Some(slot) => *slot,
            None => {
                ctx.abort();
                return None;
            }
        };
        self.accessor.get(ctx, slot, BlockTuple::read_from_delta)
    }

    /// Fetches the version of a header visible to `ctx`, by height in the
    /// candidate or confirmed branch. Aborts `ctx` when the height is not
    /// indexed.
    pub fn get_by_height(
        &self,
        ctx: &mut TransactionContext,
        height: u64,
        candidate: bool,
    ) -> Option<BlockTuple> {
        let index = if candidate {
            &self.candidate_index
        } else {
            &self.confirmed_index
        };
        let slot = match index.read().get(&height) {
            Some(slot) => *slot,
            None => {
                ctx.abort();
                return None;
            }
        };
        self.accessor.get(ctx, slot, BlockTuple::read_from_delta)
    }

    /// Height of the highest candidate or confirmed block. Aborts `ctx`
    /// when the branch is empty.
    pub fn top(&self, ctx: &mut TransactionContext, candidate: bool) -> Option<u64> {
        let index = if candidate {
            &self.candidate_index
        } else {
            &self.confirmed_index
        };
        let top = index.read().keys().max().copied();
        if top.is_none() {
            ctx.abort();
        }
        top
    }

    /// Error carried by a failed block (stored in its checksum field), if
    /// any.
    pub fn error_code(&self, tuple: &BlockTuple) -> Option<u32> {
        state::is_failed(tuple.state).then_some(tuple.checksum)
    }

    /// Promotes a header's validation state to valid or failed. Aborts
    /// `ctx` and returns false on an unknown hash or a write conflict.
    pub fn validate(&self, ctx: &mut TransactionContext, hash: &Hash256, valid: bool) -> bool {
        let slot = match self.hash_index.read().get(hash) {
            Some(slot) => *slot,
            None => {
                ctx.abort();
                return false;
            }
        };
        let Some(read) = self.accessor.get(ctx, slot, BlockTuple::read_from_delta) else {
            ctx.abort();
            return false;
        };

        let delta = BlockDelta {
            state: state::update_validation_state(read.state, valid),
        };
        match self.accessor.update(ctx, slot, delta) {
            Ok(true) => true,
            _ => {
                ctx.abort();
                false
            }
        }
    }

    /// Promotes a pooled or candidate block to candidate or confirmed
    /// respectively, inserting it into the branch index at `height`.
    pub fn promote(
        &self,
        ctx: &mut TransactionContext,
        hash: &Hash256,
        height: u64,
        candidate: bool,
    ) -> bool {
        self.transition(ctx, hash, height, candidate, true)
    }

    /// Demotes a candidate or confirmed block back to pooled, erasing it
    /// from the branch index.
    pub fn demote(
        &self,
        ctx: &mut TransactionContext,
        hash: &Hash256,
        height: u64,
        candidate: bool,
    ) -> bool {
        self.transition(ctx, hash, height, candidate, false)
    }

    fn transition(
        &self,
        ctx: &mut TransactionContext,
        hash: &Hash256,
        height: u64,
        candidate: bool,
        positive: bool,
    ) -> bool {
        let slot = match self.hash_index.read().get(hash) {
            Some(slot) => *slot,
            None => {
                ctx.abort();
                return false;
            }
        };
        let Some(read) = self.accessor.get(ctx, slot, BlockTuple::read_from_delta) else {
            ctx.abort();
            return false;
        };

        let delta = BlockDelta {
            state: state::update_confirmation_state(read.state, positive, candidate),
        };
        if !matches!(self.accessor.update(ctx, slot, delta), Ok(true)) {
            ctx.abort();
            return false;
        }

        let index = if candidate {
            &self.candidate_index
        } else {
            &self.confirmed_index
        };
        if positive {
            index.write().insert(height, slot);
        } else {
            index.write().remove(&height);
        }
        true
    }
}
