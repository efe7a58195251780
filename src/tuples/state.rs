//! # Block State Bits
//!
//! A block's lifecycle packs into one byte: a validation half (valid or
//! failed, mutually exclusive) and a confirmation half (candidate or
//! confirmed). The two halves evolve independently - a header can be
//! promoted to candidate before validation finishes - so the transition
//! functions each preserve the other half.
//!
//! ```text
//! Bit 0: FAILED      validation half
//! Bit 1: VALID       validation half
//! Bit 2: CANDIDATE   confirmation half
//! Bit 3: CONFIRMED   confirmation half
//! ```
//!
//! A zero byte is a pooled, unvalidated block.

/// No validation or confirmation state: a pooled block.
pub const MISSING: u8 = 0;
pub const FAILED: u8 = 1 << 0;
pub const VALID: u8 = 1 << 1;
pub const CANDIDATE: u8 = 1 << 2;
pub const CONFIRMED: u8 = 1 << 3;

/// Mask of the validation half.
pub const VALIDATIONS: u8 = FAILED | VALID;

/// Mask of the confirmation half.
pub const CONFIRMATIONS: u8 = CANDIDATE | CONFIRMED;

pub fn is_failed(state: u8) -> bool {
    state & FAILED != 0
}

pub fn is_valid(state: u8) -> bool {
    state & VALID != 0
}

pub fn is_candidate(state: u8) -> bool {
    state & CANDIDATE != 0
}

pub fn is_confirmed(state: u8) -> bool {
    state & CONFIRMED != 0
}

/// Merges a validation outcome into `original`, preserving the
/// confirmation half. May only validate or invalidate an unvalidated
/// block.
pub fn update_validation_state(original: u8, positive: bool) -> u8 {
    debug_assert!(!is_failed(original) && !is_valid(original));

    let confirmation_state = original & CONFIRMATIONS;
    let validation_state = if positive { VALID } else { FAILED };
    confirmation_state | validation_state
}

/// Merges a confirmation transition into `original`, preserving the
/// validation half.
///
/// `positive` promotes (to candidate or confirmed per `candidate`),
/// `!positive` demotes straight back to pooled.
pub fn update_confirmation_state(original: u8, positive: bool, candidate: bool) -> u8 {
    // May only confirm a valid block.
    debug_assert!(!positive || candidate || is_valid(original));
    // May only unconfirm a confirmed block.
    debug_assert!(positive || candidate || is_confirmed(original));
    // May only candidate an unfailed block.
    debug_assert!(!positive || !candidate || !is_failed(original));
    // May only uncandidate a candidate header.
    debug_assert!(positive || !candidate || is_candidate(original));

    let validation_state = original & VALIDATIONS;
    let positive_state = if candidate { CANDIDATE } else { CONFIRMED };
    let confirmation_state = if positive { positive_state } else { MISSING };
    confirmation_state | validation_state
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a_zero_state_is_pooled_and_unvalidated() {
        assert!(!is_failed(MISSING));
        assert!(!is_valid(MISSING));
        assert!(!is_candidate(MISSING));
        assert!(!is_confirmed(MISSING));
    }

    #[test]
    fn validation_preserves_confirmation_bits() {
        let candidate_block = CANDIDATE;
        let validated = update_validation_state(candidate_block, true);
        assert!(is_valid(validated));
        assert!(is_candidate(validated));

        let failed = update_validation_state(CANDIDATE, false);
        assert!(is_failed(failed));
        assert!(is_candidate(failed));
    }

    #[test]
    fn promotion_preserves_validation_bits() {
        let valid_block = VALID;
        let candidate = update_confirmation_state(valid_block, true, true);
        assert!(is_candidate(candidate));
        assert!(is_valid(candidate));

        let confirmed = update_confirmation_state(valid_block, true, false);
        assert!(is_confirmed(confirmed));
        assert!(!is_candidate(confirmed));
    }

    #[test]
    fn demotion_returns_to_pooled() {
        let candidate = update_confirmation_state(VALID, true, true);
        let demoted = update_confirmation_state(candidate, false, true);
        assert!(!is_candidate(demoted));
        assert!(!is_confirmed(demoted));
        assert!(is_valid(demoted));
    }
}
