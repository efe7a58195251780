//! # Transaction Context and Manager
//!
//! Transactions are identified by a 64-bit timestamp drawn from a single
//! monotonically increasing clock. The timestamp doubles as the value a
//! transaction CASes into a record's latch word, so timestamp allocation
//! and latch identity are the same namespace.
//!
//! ## Reserved Timestamps
//!
//! ```text
//! 0          NOT_LATCHED / NONE_READ - latch free, version never read
//! u64::MAX   INFINITY - open-ended end timestamp
//! 1          first timestamp ever issued
//! ```
//!
//! ## Lifecycle
//!
//! ```text
//! begin_transaction() ──> Active ──> commit() ──> Committed
//!                           │
//!                           └──────> abort()  ──> Aborted
//! ```
//!
//! Once a context leaves `Active` it never returns, exactly one of the two
//! action lists runs, and each list runs at most once.
//!
//! ## Deferred Actions
//!
//! Mutators do not undo or finalize anything inline. Every mutation
//! registers a commit action and/or an abort action at the moment it
//! completes, capturing by value the record addresses and timestamps it
//! observed. Concluding the transaction fires exactly one list in LIFO
//! order, which releases latches and finalizes (or restores) timestamps in
//! the reverse of mutation order.
//!
//! ## Manager Concurrency
//!
//! The clock is an atomic; the active-transaction set sits behind a
//! parking_lot mutex held only for set operations. `is_active` checks the
//! context's local state first and only takes the latch for membership.

use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashSet;
use parking_lot::Mutex;
use smallvec::SmallVec;

/// Transaction timestamp; also the value stored in record latch words.
pub type Timestamp = u64;

/// Latch word value meaning "no transaction holds this record".
pub const NOT_LATCHED: Timestamp = 0;

/// Open-ended end timestamp: the version is still current.
pub const INFINITY: Timestamp = Timestamp::MAX;

/// Read timestamp of a version nobody has read yet.
pub const NONE_READ: Timestamp = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxnState {
    #[default]
    Active,
    Committed,
    Aborted,
}

type EndAction = Box<dyn FnOnce() + Send>;

/// Per-transaction state: timestamp, lifecycle state, and the deferred
/// commit/abort action lists.
///
/// Most transactions register a handful of actions, so the lists are
/// `SmallVec`s that spill to the heap only for large transactions.
pub struct TransactionContext {
    ts: Timestamp,
    state: TxnState,
    commit_actions: SmallVec<[EndAction; 4]>,
    abort_actions: SmallVec<[EndAction; 4]>,
}

impl TransactionContext {
    pub(crate) fn new(ts: Timestamp) -> Self {
        Self {
            ts,
            state: TxnState::Active,
            commit_actions: SmallVec::new(),
            abort_actions: SmallVec::new(),
        }
    }

    pub fn ts(&self) -> Timestamp {
        self.ts
    }

    pub fn state(&self) -> TxnState {
        self.state
    }

    pub fn is_committed(&self) -> bool {
        self.state == TxnState::Committed
    }

    pub fn is_aborted(&self) -> bool {
        self.state == TxnState::Aborted
    }

    /// Appends an action to run on commit. Actions run in LIFO order.
    pub fn register_commit_action(&mut self, action: impl FnOnce() + Send + 'static) {
        debug_assert_eq!(self.state, TxnState::Active);
        self.commit_actions.push(Box::new(action));
    }

    /// Appends an action to run on abort. Actions run in LIFO order.
    pub fn register_abort_action(&mut self, action: impl FnOnce() + Send + 'static) {
        debug_assert_eq!(self.state, TxnState::Active);
        self.abort_actions.push(Box::new(action));
    }

    /// Transitions to `Committed` and fires the commit actions, most
    /// recently registered first. Returns false (and does nothing) if the
    /// transaction already concluded.
    pub fn commit(&mut self) -> bool {
        if self.state != TxnState::Active {
            debug_assert!(false, "commit on a concluded transaction");
            return false;
        }
        self.state = TxnState::Committed;
        while let Some(action) = self.commit_actions.pop() {
            action();
        }
        self.abort_actions.clear();
        true
    }

    /// Transitions to `Aborted` and fires the abort actions, most recently
    /// registered first. Returns false (and does nothing) if the
    /// transaction already concluded.
    pub fn abort(&mut self) -> bool {
        if self.state != TxnState::Active {
            debug_assert!(false, "abort on a concluded transaction");
            return false;
        }
        self.state = TxnState::Aborted;
        while let Some(action) = self.abort_actions.pop() {
            action();
        }
        self.commit_actions.clear();
        true
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("ts", &self.ts)
            .field("state", &self.state)
            .field("commit_actions", &self.commit_actions.len())
            .field("abort_actions", &self.abort_actions.len())
            .finish()
    }
}

/// Issues timestamps and tracks the set of active transactions.
pub struct TransactionManager {
    clock: AtomicU64,
    active: Mutex<HashSet<Timestamp>>,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self {
            clock: AtomicU64::new(0),
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Starts a transaction with a fresh timestamp. The first transaction
    /// ever started observes timestamp 1.
    pub fn begin_transaction(&self) -> TransactionContext {
        let mut active = self.active.lock();
        let ts = self.clock.fetch_add(1, Ordering::SeqCst) + 1;
        active.insert(ts);
        TransactionContext::new(ts)
    }

    /// Commits the context, firing its commit actions. Membership in the
    /// active set is unaffected; call
    /// [`remove_transaction`](TransactionManager::remove_transaction)
    /// afterwards.
    pub fn commit_transaction(&self, ctx: &mut TransactionContext) -> bool {
        ctx.commit()
    }

    /// Erases a concluded transaction from the active set. Calling this on
    /// a still-active context is a programmer error: debug builds assert,
    /// release builds return false without touching the set.
    pub fn remove_transaction(&self, ctx: &TransactionContext) -> bool {
        debug_assert_ne!(ctx.state(), TxnState::Active);
        if ctx.state() == TxnState::Active {
            return false;
        }
        self.active.lock().remove(&ctx.ts())
    }

    pub fn is_active(&self, ctx: &TransactionContext) -> bool {
        // Local state can be checked without the latch.
        if ctx.state() != TxnState::Active {
            return false;
        }
        self.active.lock().contains(&ctx.ts())
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
