//! # chaindb - In-Memory MVCC Store for a Blockchain Hot Set
//!
//! chaindb keeps a blockchain node's hot working set - block headers and
//! transaction metadata - in memory as multi-version rows governed by
//! MVTO (Multi-Version Timestamp Ordering). It prioritizes:
//!
//! - **Lock-free hot paths**: record latches, slot claims and block
//!   status are single CAS words; blocking happens only on short
//!   spin-latched bookkeeping.
//! - **Cheap updates**: a row update appends a small delta to a version
//!   chain instead of rewriting the tuple.
//! - **Bounded memory**: every byte of row storage comes from 1 MiB
//!   blocks drawn from pools with explicit size and reuse limits.
//!
//! ## Quick Start
//!
//! ```
//! use chaindb::db::BlockDatabase;
//! use chaindb::mvcc::TransactionManager;
//! use chaindb::tuples::BlockTuple;
//!
//! # fn main() -> eyre::Result<()> {
//! let db = BlockDatabase::new(16, 4, 16, 4)?;
//! let manager = TransactionManager::new();
//!
//! let mut ctx = manager.begin_transaction();
//! let hash = [7u8; 32];
//! let header = BlockTuple { height: 1010, ..Default::default() };
//! assert!(db.store(&mut ctx, hash, header));
//! manager.commit_transaction(&mut ctx);
//!
//! let mut reader = manager.begin_transaction();
//! assert_eq!(db.get_by_hash(&mut reader, &hash).unwrap().height, 1010);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │   Database Façades (BlockDatabase, TxDb)    │
//! ├─────────────────────────────────────────────┤
//! │   Indexes (hash → slot, height → slot)      │
//! ├─────────────────────────────────────────────┤
//! │   MVTO Accessor (put / update / get)        │
//! ├──────────────────────┬──────────────────────┤
//! │   MVCC Version Chains│  Transaction Manager │
//! ├──────────────────────┴──────────────────────┤
//! │   Typed Stores (slot allocation, layout)    │
//! ├─────────────────────────────────────────────┤
//! │   Block Pool + 1 MiB Aligned Raw Blocks     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`container`]: the concurrent slot bitmap
//! - [`storage`]: raw blocks, the block pool, slots and typed stores
//! - [`mvcc`]: version records, MVTO visibility, transaction management
//! - [`mvto`]: the transactional accessor over a head/delta store pair
//! - [`tuples`]: block-header and transaction tuple layouts
//! - [`db`]: the block and transaction database façades
//!
//! ## What chaindb Is Not
//!
//! No durability, no recovery, no cross-process sharing, no garbage
//! collection of superseded versions. Those belong to snapshot and
//! compaction machinery layered on top; the core exposes version chains
//! and pool limits as the hooks that machinery needs.

pub mod container;
pub mod db;
pub mod mvcc;
pub mod mvto;
pub mod storage;
pub mod tuples;

pub use db::{BlockDatabase, TransactionDatabase};
pub use mvcc::{TransactionContext, TransactionManager};
pub use mvto::Accessor;
pub use storage::{BlockPool, Slot, Store};
