//! # Multi-Version Concurrency Control (MVTO)
//!
//! This module implements Multi-Version Timestamp Ordering for the hot
//! store. Every logical row is a version chain - a head record plus a tail
//! of deltas - and every transaction carries a timestamp that totally
//! orders it against all others.
//!
//! ## Version Chain Model
//!
//! ```text
//!   head store                     delta store
//! +------------------+          +---------------+      +---------------+
//! | MvccRecord       |   next   | DeltaRecord   | next | DeltaRecord   |
//! | begin: 1  end: 2 ├─────────>| begin: 2      ├─────>| begin: 3      |
//! | [full tuple]     |          | end: 3        |      | end: INF      |
//! +------------------+          | [state diff]  |      | [state diff]  |
//!                               +---------------+      +---------------+
//! ```
//!
//! Chains grow oldest-to-newest: a reader starts from the head tuple and
//! overlays each visible delta in order, so old snapshots pay nothing and
//! fresh reads pay one short walk.
//!
//! ## Protocol Summary
//!
//! - A transaction at timestamp `ts` sees versions with
//!   `txn_id ∈ {0, ts}` and `begin_ts <= ts`.
//! - Writers claim a version by CASing `ts` into its latch word; the
//!   second writer's CAS fails and its transaction aborts.
//! - Reads stamp `read_ts = max(read_ts, ts)` on every observed version;
//!   a writer may not supersede a version below its recorded read.
//! - Commit and abort are deferred action lists on the transaction
//!   context, run in LIFO order, releasing latches and finalizing or
//!   restoring timestamps.

pub mod record;
pub mod transaction;

pub use record::{DeltaReader, DeltaRecord, MvccRecord, TailSearch};
pub use transaction::{
    Timestamp, TransactionContext, TransactionManager, TxnState, INFINITY, NONE_READ,
    NOT_LATCHED,
};
