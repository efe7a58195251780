//! # Tuple Layouts
//!
//! Fixed-size value types stored inline in MVCC cells: the block-header
//! tuple and the transaction tuple, each paired with the small delta type
//! its version chain carries. Tuples are plain `#[repr(C)]` data - they
//! are copied into block memory byte-for-byte, so changing their size or
//! field order is an ABI change for every block already allocated.

pub mod block_tuple;
pub mod state;
pub mod tx_tuple;

pub use block_tuple::{BlockDelta, BlockTuple};
pub use tx_tuple::{TxDelta, TxTuple, POSITION_UNSET};

/// A 256-bit hash (block hash, merkle root, txid).
pub type Hash256 = [u8; 32];
