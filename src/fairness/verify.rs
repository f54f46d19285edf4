//! Verification API
//!
//! Verify a battle by deterministic replay once its server seed is public.

use crate::battle::model::Battle;

use super::draw::pick_item;
use super::seed::verify_commitment;
use super::FairnessError;

/// Outcome of a successful replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    /// Rounds checked.
    pub rounds: usize,
    /// Individual draws checked.
    pub draws: usize,
}

/// Recompute every recorded draw from the revealed seeds.
///
/// Fails on the first draw that does not reproduce, or if the seed does
/// not match the published commitment.
pub fn replay_battle(battle: &Battle) -> Result<ReplayReport, FairnessError> {
    if battle.fair.server_seed.is_empty() {
        return Err(FairnessError::SeedNotRevealed);
    }
    verify_commitment(&battle.fair.server_seed, &battle.fair.server_seed_hash)?;

    let mut draws = 0;
    for (&round, steps) in &battle.summary.steps {
        let case = battle
            .cases
            .get(round)
            .ok_or(FairnessError::UnknownRound { round })?;

        for step in steps {
            let client_seed = battle
                .fair
                .client_seeds
                .get(&step.seat)
                .ok_or_else(|| FairnessError::MissingClientSeed { seat: step.seat.to_string() })?;

            let draw = pick_item(case, &battle.fair.server_seed, client_seed, step.nonce)?;
            if draw.item.id != step.item_id || draw.roll != step.roll {
                return Err(FairnessError::ReplayMismatch {
                    round,
                    seat: step.seat.to_string(),
                    recorded: step.item_id,
                    replayed: draw.item.id,
                });
            }
            draws += 1;
        }
    }

    Ok(ReplayReport { rounds: battle.summary.steps.len(), draws })
}
