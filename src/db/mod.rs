//! # Database Façades
//!
//! Domain-level wrappers over the MVTO core. Each façade owns its block
//! pools, a head store, a delta store, an accessor, and the external
//! indexes mapping domain keys (hash, height) to slots. Operations
//! compose accessor calls with index maintenance under one transaction
//! context, and abort that context on any failure so a caller can simply
//! retry with a fresh transaction.
//!
//! Indexes are opaque key -> slot maps; they borrow slots without
//! extending any lifetime and are rebuilt from scratch on process start
//! (nothing here persists).

mod block_db;
mod tx_db;

pub use block_db::BlockDatabase;
pub use tx_db::TransactionDatabase;
