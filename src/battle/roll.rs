//! Round Drawing
//!
//! One background driver per battle walks the rounds in order, then hands
//! over to resolution and archival. The pure step [`roll_round`] is
//! idempotent per round, so a resumed driver never double-counts.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, error, instrument, warn};

use crate::catalog::case::CaseEntry;
use crate::core::money::Money;
use crate::error::BattleError;
use crate::fairness::draw::{pick_item, Draw, NonceSequence, MAX_REROLLS};
use crate::fairness::FairnessError;

use super::lifecycle::BattleService;
use super::model::{Battle, BattleId, BattleOption, BattleStatus, StepResult};
use super::topology::SeatId;

fn next_draw<'a>(
    case: &'a CaseEntry,
    server_seed: &str,
    client_seed: &str,
    nonces: &mut NonceSequence,
    round: usize,
) -> Result<Draw<'a>, FairnessError> {
    let nonce = nonces.next().ok_or(FairnessError::NoncesExhausted { round })?;
    pick_item(case, server_seed, client_seed, nonce)
}

/// Fill in each step's share of the round total.
fn assign_percentages(battle: &mut Battle, round: usize) {
    if let Some(steps) = battle.summary.steps.get_mut(&round) {
        let total: Money = steps.iter().map(|s| s.price).sum();
        for step in steps.iter_mut() {
            step.percentage = step.price.percent_of(total);
        }
    }
}

/// Seat shares of the pot, or `None` when nothing was won.
pub fn jackpot_weights(prizes: &BTreeMap<SeatId, Money>) -> Option<BTreeMap<SeatId, f64>> {
    let total: Money = prizes.values().sum();
    if !total.is_positive() {
        return None;
    }
    Some(
        prizes
            .iter()
            .map(|(seat, prize)| (*seat, prize.cents() as f64 / total.cents() as f64))
            .collect(),
    )
}

/// Draw `round` for every occupied seat.
///
/// `round == round_count()` closes rolling instead. Returns `false` when
/// the round was already drawn.
pub fn roll_round(battle: &mut Battle, round: usize, now: DateTime<Utc>) -> Result<bool, BattleError> {
    let rounds = battle.round_count();
    if round > rounds {
        return Err(BattleError::Internal(format!("round {round} past the last of {rounds}")));
    }
    if round < rounds && battle.summary.has_round(round) {
        return Ok(false);
    }
    if round > 0 {
        assign_percentages(battle, round - 1);
    }

    if round == rounds {
        battle.set_status(BattleStatus::Rolling, "rolled");
        if battle.has_option(BattleOption::Jackpot) {
            battle.summary.jackpot_weights = jackpot_weights(&battle.summary.prizes);
        }
        battle.log(now, "rolled", 0);
        return Ok(true);
    }

    let final_round = round + 1 == rounds;
    let mut nonces = NonceSequence::for_round(round);
    let mut steps = Vec::new();
    let mut previous: Option<Money> = None;
    let mut leader: Option<(SeatId, Money)> = None;
    {
        let case = &battle.cases[round];
        let server_seed = &battle.fair.server_seed;

        for seat in battle.occupied_seats() {
            let client_seed = battle
                .fair
                .client_seeds
                .get(&seat)
                .ok_or_else(|| FairnessError::MissingClientSeed { seat: seat.to_string() })?;

            let mut draw = next_draw(case, server_seed, client_seed, &mut nonces, round)?;
            if final_round {
                let mut rerolls = 0;
                while previous == Some(draw.item.price) && rerolls < MAX_REROLLS {
                    draw = next_draw(case, server_seed, client_seed, &mut nonces, round)?;
                    rerolls += 1;
                }
            }

            let price = draw.item.price;
            if leader.map_or(true, |(_, best)| price > best) {
                leader = Some((seat, price));
            }
            previous = Some(price);
            steps.push(StepResult {
                seat,
                item_id: draw.item.id,
                price,
                roll: draw.roll,
                nonce: draw.nonce,
                percentage: 0.0,
            });
        }
    }

    let team_count = battle.teams.len();
    let team_of = |seat: SeatId| -> Result<Option<usize>, BattleError> {
        match battle.slots.get(&seat).map(|slot| slot.team) {
            Some(team) if team >= team_count => Err(BattleError::Internal(format!(
                "battle {} seat {} is on team {} of {}",
                battle.id, seat, team, team_count
            ))),
            team => Ok(team),
        }
    };
    let step_teams = steps.iter().map(|step| team_of(step.seat)).collect::<Result<Vec<_>, _>>()?;
    let leader_team = leader.map(|(seat, _)| team_of(seat)).transpose()?.flatten();

    for (step, team) in steps.iter().zip(step_teams) {
        *battle.summary.prizes.entry(step.seat).or_default() += step.price;
        if let Some(team) = team.and_then(|team| battle.teams.get_mut(team)) {
            team.prize += step.price;
        }
    }
    if let Some(team) = leader_team.and_then(|team| battle.teams.get_mut(team)) {
        team.round_wins += 1;
    }

    battle.summary.steps.insert(round, steps);
    battle.status = format!("Roll {}", round + 1);
    battle.log(now, format!("roll {}", round + 1), 0);
    Ok(true)
}

impl BattleService {
    /// Start the background driver for a battle.
    pub(crate) fn spawn_driver(self: &Arc<Self>, id: BattleId) {
        let service = Arc::clone(self);
        self.tasks.spawn(format!("battle-{id}"), async move { service.drive(id).await });
    }

    /// Advance a battle through every remaining phase.
    #[instrument(skip(self))]
    async fn drive(self: Arc<Self>, id: BattleId) -> Result<(), BattleError> {
        loop {
            let Some(battle) = self.store.get(id).await else {
                warn!("Battle {} left the live index; driver stopping", id);
                return Ok(());
            };

            let phase = battle.status_code;
            let outcome = match phase {
                BattleStatus::Rolling => match self.roll_rounds(&battle).await {
                    Ok(()) => self.resolve(id, battle.round_count()).await,
                    Err(e) => Err(e),
                },
                BattleStatus::Resolving => self.pay_winners(id).await,
                BattleStatus::Rewarding => match self.finish(id).await {
                    Ok(()) => return Ok(()),
                    Err(e) => Err(e),
                },
                _ => return Ok(()),
            };

            if let Err(e) = outcome {
                error!("Battle {} halted in phase {:?}: {}", id, phase, e);
                return Err(e);
            }
        }
    }

    /// Draw every round not yet recorded, pacing between rounds.
    async fn roll_rounds(self: &Arc<Self>, battle: &Battle) -> Result<(), BattleError> {
        let id = battle.id;
        let rounds = battle.round_count();
        let pace = if battle.has_option(BattleOption::FastSpin) {
            self.config.fast_round_delay
        } else {
            self.config.round_delay
        };

        for round in 0..=rounds {
            if round < rounds {
                if battle.summary.has_round(round) {
                    continue;
                }
                self.clock.sleep(pace).await;
            }

            let now = self.clock.now();
            match self.store.update(id, |b| roll_round(b, round, now)).await {
                Ok((true, _)) => debug!("Battle {} round {} of {} drawn", id, round + 1, rounds),
                Ok((false, _)) => debug!("Battle {} round {} already drawn", id, round + 1),
                Err(e) => {
                    error!("Battle {} failed drawing round {}: {}", id, round + 1, e);
                    return Err(e);
                }
            }
            self.notify_index().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::model::tests::{forming_battle, seat, seat_player};
    use crate::battle::topology::PlayerType;
    use crate::catalog::case::tests::{case_with, item, single_item_case};
    use crate::fairness::verify::replay_battle;
    use std::collections::BTreeSet;

    fn full_battle(player_type: PlayerType, cases: Vec<CaseEntry>) -> Battle {
        let mut battle = forming_battle(player_type);
        battle.cost = cases.iter().map(|c| c.price).sum();
        battle.cases = cases;
        for n in 1..=player_type.seat_count() as u8 {
            seat_player(&mut battle, n, i64::from(n));
        }
        battle.refresh_fill_status();
        battle
    }

    fn roll_all(battle: &mut Battle) {
        for round in 0..=battle.round_count() {
            roll_round(battle, round, Utc::now()).unwrap();
        }
    }

    fn two_item_case(id: i64) -> CaseEntry {
        case_with(id, 300, vec![item(id * 10, 100, 0, 499_999), item(id * 10 + 1, 500, 500_000, 1_000_000)])
    }

    #[test]
    fn test_corrupt_team_index_fails_round() {
        let mut battle = full_battle(PlayerType::OneVsOne, vec![two_item_case(1)]);
        if let Some(slot) = battle.slots.get_mut(&seat(2)) {
            slot.team = 9;
        }

        let result = roll_round(&mut battle, 0, Utc::now());

        assert!(matches!(result, Err(BattleError::Internal(_))));
        assert!(battle.summary.steps.is_empty());
        assert!(battle.teams.iter().all(|t| t.prize == Money::ZERO));
    }

    #[test]
    fn test_round_records_every_seat() {
        let mut battle = full_battle(PlayerType::TwoVsTwo, vec![two_item_case(1)]);
        assert!(roll_round(&mut battle, 0, Utc::now()).unwrap());

        let steps = &battle.summary.steps[&0];
        assert_eq!(steps.len(), 4);
        assert_eq!(battle.status, "Roll 1");
        let team_total: Money = battle.teams.iter().map(|t| t.prize).sum();
        assert_eq!(team_total, battle.summary.pot());
    }

    #[test]
    fn test_round_is_idempotent() {
        let mut battle = full_battle(PlayerType::OneVsOne, vec![two_item_case(1), two_item_case(2)]);
        roll_round(&mut battle, 0, Utc::now()).unwrap();
        let before = battle.clone();

        assert!(!roll_round(&mut battle, 0, Utc::now()).unwrap());
        assert_eq!(battle.summary, before.summary);
        assert_eq!(battle.teams, before.teams);
    }

    #[test]
    fn test_closing_round_marks_rolled() {
        let mut battle = full_battle(PlayerType::OneVsOne, vec![two_item_case(1)]);
        roll_all(&mut battle);

        assert_eq!(battle.status, "rolled");
        assert_eq!(battle.status_code, BattleStatus::Rolling);
        let pct: f64 = battle.summary.steps[&0].iter().map(|s| s.percentage).sum();
        assert!((pct - 100.0).abs() < 0.02);
        assert!(battle.summary.jackpot_weights.is_none());
    }

    #[test]
    fn test_nonces_unique_across_battle() {
        let cases = vec![single_item_case(1, 100, 100), two_item_case(2), single_item_case(3, 100, 100)];
        let mut battle = full_battle(PlayerType::ThreeVsThree, cases);
        roll_all(&mut battle);

        let mut seen = BTreeSet::new();
        for steps in battle.summary.steps.values() {
            for step in steps {
                assert!(seen.insert(step.nonce), "nonce {} reused", step.nonce);
            }
        }
        assert_eq!(seen.len(), 18);
    }

    #[test]
    fn test_final_round_rerolls_ties() {
        // Single-item case: every draw ties, so the second seat re-rolls to the cap.
        let mut battle = full_battle(PlayerType::OneVsOne, vec![single_item_case(1, 250, 250)]);
        roll_round(&mut battle, 0, Utc::now()).unwrap();

        let steps = &battle.summary.steps[&0];
        assert_eq!(steps[0].nonce, 1);
        assert_eq!(steps[1].nonce, 2 + u64::from(MAX_REROLLS));
    }

    #[test]
    fn test_leader_earns_round_win() {
        let mut battle = full_battle(PlayerType::OneVsOne, vec![single_item_case(1, 100, 100), two_item_case(2)]);
        roll_round(&mut battle, 0, Utc::now()).unwrap();
        // Tie on a non-final round: first seat keeps the lead.
        assert_eq!(battle.teams[0].round_wins, 1);
        assert_eq!(battle.teams[1].round_wins, 0);
    }

    #[test]
    fn test_jackpot_weights_recorded() {
        let mut battle = full_battle(PlayerType::OneVsOne, vec![two_item_case(1)]);
        battle.options = vec!["jackpot".into()];
        roll_all(&mut battle);

        let weights = battle.summary.jackpot_weights.clone().unwrap();
        let sum: f64 = weights.values().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_jackpot_weights_skip_empty_pot() {
        let prizes = BTreeMap::from([(seat(1), Money::ZERO), (seat(2), Money::ZERO)]);
        assert!(jackpot_weights(&prizes).is_none());
    }

    #[test]
    fn test_drawn_battle_replays() {
        let mut battle = full_battle(PlayerType::ThreeTeamsOfTwo, vec![two_item_case(1), two_item_case(2)]);
        roll_all(&mut battle);
        let report = replay_battle(&battle).unwrap();
        assert_eq!(report.rounds, 2);
        assert_eq!(report.draws, 12);
    }

    #[test]
    fn test_missing_client_seed_is_fatal() {
        let mut battle = full_battle(PlayerType::OneVsOne, vec![two_item_case(1)]);
        battle.fair.client_seeds.remove(&seat(2));
        let result = roll_round(&mut battle, 0, Utc::now());
        assert!(matches!(result, Err(BattleError::Fairness(FairnessError::MissingClientSeed { .. }))));
    }
}
