//! Fair Draws
//!
//! `roll = u32_be(sha256("{server}:{client}:{nonce}")[0..4]) % 1_000_001`
//!
//! The roll is then mapped onto a case's item ranges. Anyone holding the
//! revealed server seed, the client seed and the nonce can recompute it.

use crate::catalog::case::{CaseEntry, CaseItem};
use crate::core::hash::sha256;

use super::FairnessError;

/// Rolls are reduced modulo this value.
pub const ROLL_MODULUS: u32 = 1_000_001;

/// Largest possible roll.
pub const ROLL_MAX: u32 = ROLL_MODULUS - 1;

/// Nonce space reserved per round.
pub const NONCE_STRIDE: u64 = 1_000;

/// Tie re-rolls allowed per seat in the final round.
pub const MAX_REROLLS: u32 = 32;

/// Derive a roll in `[0, ROLL_MAX]`.
pub fn fair_rand(server_seed: &str, client_seed: &str, nonce: u64) -> u32 {
    let digest = sha256(format!("{server_seed}:{client_seed}:{nonce}").as_bytes());
    let value = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    value % ROLL_MODULUS
}

/// Result of one draw.
#[derive(Debug, Clone, Copy)]
pub struct Draw<'a> {
    /// Raw roll.
    pub roll: u32,
    /// Nonce the roll used.
    pub nonce: u64,
    /// Item the roll landed on.
    pub item: &'a CaseItem,
}

/// Map a roll onto the case's items.
pub fn item_for_roll(case: &CaseEntry, roll: u32) -> Result<&CaseItem, FairnessError> {
    if case.items.is_empty() {
        return Err(FairnessError::EmptyCase { case_id: case.id });
    }
    case.items
        .iter()
        .find(|item| item.covers(roll))
        .ok_or(FairnessError::UncoveredRoll { case_id: case.id, roll })
}

/// Draw one item from `case`.
pub fn pick_item<'a>(
    case: &'a CaseEntry,
    server_seed: &str,
    client_seed: &str,
    nonce: u64,
) -> Result<Draw<'a>, FairnessError> {
    let roll = fair_rand(server_seed, client_seed, nonce);
    let item = item_for_roll(case, roll)?;
    Ok(Draw { roll, nonce, item })
}

/// Nonces for one round: `round * NONCE_STRIDE + 1`, `+ 2`, ...
///
/// Each round owns a disjoint block, so no two draws in a battle share a
/// nonce even when ties force re-rolls.
#[derive(Debug, Clone)]
pub struct NonceSequence {
    base: u64,
    offset: u64,
}

impl NonceSequence {
    /// Sequence for a zero-based round.
    pub fn for_round(round: usize) -> Self {
        Self {
            base: round as u64 * NONCE_STRIDE,
            offset: 0,
        }
    }

    /// Nonces handed out so far.
    pub fn issued(&self) -> u64 {
        self.offset
    }
}

impl Iterator for NonceSequence {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.offset + 1 >= NONCE_STRIDE {
            return None;
        }
        self.offset += 1;
        Some(self.base + self.offset)
    }
}

// =============================================================================
// TESTS
// =============================================================================
