//! # Transaction Tuple
//!
//! In-memory layout for one transaction's fixed-size metadata. Inputs and
//! outputs are variable-length and live elsewhere; this row carries the
//! part the confirmation machinery mutates, so the delta type is the
//! (position, candidate) pair that changes when a transaction moves
//! between the pool and a confirmed block.

use zerocopy::FromZeros;

/// Position of a transaction not currently part of a block.
pub const POSITION_UNSET: u16 = u16::MAX;

/// Fixed-size transaction row stored in head records.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromZeros)]
pub struct TxTuple {
    pub height: u32,
    pub median_time_past: u32,
    pub locktime: u32,
    pub version: u32,
    /// Index within its confirming block, or [`POSITION_UNSET`].
    pub position: u16,
    /// Non-zero while outputs are marked spent by a candidate block.
    pub candidate: u8,
    pub witness_flag: u8,
}

impl TxTuple {
    /// Overlays one delta onto the accumulating tuple during a chain
    /// read.
    pub fn read_from_delta(tuple: &mut TxTuple, delta: &TxDelta) {
        tuple.position = delta.position;
        tuple.candidate = delta.candidate;
    }

    /// Captures the delta-visible part of the tuple.
    pub fn write_to_delta(tuple: &TxTuple, delta: &mut TxDelta) {
        delta.position = tuple.position;
        delta.candidate = tuple.candidate;
    }
}

/// Diff over [`TxTuple`]: confirmation position and candidate flag.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromZeros)]
pub struct TxDelta {
    pub position: u16,
    pub candidate: u8,
}

impl Default for TxDelta {
    fn default() -> Self {
        Self {
            position: POSITION_UNSET,
            candidate: 0,
        }
    }
}
