//! # Block Header Tuple
//!
//! In-memory layout for one block header plus the node's bookkeeping for
//! it. The mutable part of a block's lifecycle is its state byte
//! (pooled -> candidate/confirmed, unvalidated -> valid/failed), so the
//! delta type carries just that byte and an update is a one-byte diff
//! rather than a second 100-byte copy of the header.

use zerocopy::FromZeros;

use super::Hash256;

/// Full block-header row stored in head records.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromZeros)]
pub struct BlockTuple {
    // Header data.
    pub previous_block_hash: Hash256,
    pub merkle_root: Hash256,
    pub version: u32,
    pub timestamp: u32,
    pub bits: u32,
    pub nonce: u32,

    // Node-side block data.
    pub height: u64,
    pub median_time_past: u32,
    /// Checksum of the block, or the error code once the block failed
    /// validation.
    pub checksum: u32,
    pub state: u8,
}

impl BlockTuple {
    /// Overlays one delta onto the accumulating tuple during a chain
    /// read.
    pub fn read_from_delta(tuple: &mut BlockTuple, delta: &BlockDelta) {
        tuple.state = delta.state;
    }

    /// Captures the delta-visible part of the tuple.
    pub fn write_to_delta(tuple: &BlockTuple, delta: &mut BlockDelta) {
        delta.state = tuple.state;
    }
}

/// Diff over [`BlockTuple`]: the state byte.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromZeros)]
pub struct BlockDelta {
    pub state: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_overlays_only_the_state() {
        let mut tuple = BlockTuple {
            height: 1010,
            state: 5,
            ..BlockTuple::default()
        };
        let delta = BlockDelta { state: 10 };
        BlockTuple::read_from_delta(&mut tuple, &delta);
        assert_eq!(tuple.state, 10);
        assert_eq!(tuple.height, 1010);
    }

    #[test]
    fn write_then_read_round_trips_the_state() {
        let tuple = BlockTuple {
            state: 7,
            ..BlockTuple::default()
        };
        let mut delta = BlockDelta::default();
        BlockTuple::write_to_delta(&tuple, &mut delta);

        let mut other = BlockTuple::default();
        BlockTuple::read_from_delta(&mut other, &delta);
        assert_eq!(other.state, 7);
    }
}
