//! Winner Resolution
//!
//! Option precedence: `equality`, then `jackpot` (weights inverted under
//! `madness`), then `madness`, then highest team total.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tracing::info;

use crate::core::hash::hash_with_domain;
use crate::core::money::Money;
use crate::error::BattleError;

use super::lifecycle::BattleService;
use super::model::{Battle, BattleId, BattleOption, BattleStatus, Winner};
use super::topology::SeatId;

const JACKPOT_DOMAIN: &[u8] = b"CASE_BATTLE_JACKPOT_V1";

/// Who won, before money is divided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    /// Winning team index.
    pub team: usize,
    /// Seats sharing the pot.
    pub seats: Vec<SeatId>,
    /// Seat picked by the jackpot draw, if one ran.
    pub jackpot_seat: Option<SeatId>,
}

fn team_by<F>(battle: &Battle, better: F) -> usize
where
    F: Fn(Money, Money) -> bool,
{
    let mut best: Option<(usize, Money)> = None;
    for (index, team) in battle.teams.iter().enumerate() {
        if best.map_or(true, |(_, prize)| better(team.prize, prize)) {
            best = Some((index, team.prize));
        }
    }
    best.map_or(0, |(index, _)| index)
}

fn team_seats(battle: &Battle, team: usize) -> Vec<SeatId> {
    battle.teams.get(team).map(|t| t.seats.clone()).unwrap_or_default()
}

/// Pick a key with probability proportional to its weight.
///
/// With `invert`, each weight becomes its reciprocal; zero stays zero.
/// Zero-weight keys are never drawn unless every weight is zero, in which
/// case the first key is returned.
pub fn weighted_pick<R: Rng>(
    weights: &BTreeMap<SeatId, f64>,
    invert: bool,
    rng: &mut R,
) -> Option<SeatId> {
    let adjusted: Vec<(SeatId, f64)> = weights
        .iter()
        .map(|(seat, weight)| {
            let w = if !weight.is_finite() || *weight <= 0.0 {
                0.0
            } else if invert {
                1.0 / weight
            } else {
                *weight
            };
            (*seat, w)
        })
        .collect();

    let first = adjusted.first()?.0;
    let total: f64 = adjusted.iter().map(|(_, w)| w).sum();
    if total <= 0.0 {
        return Some(first);
    }

    let draw = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for (seat, weight) in &adjusted {
        cumulative += weight;
        if *weight > 0.0 && cumulative > draw {
            return Some(*seat);
        }
    }
    // Float rounding left the draw past the last boundary.
    adjusted.iter().rev().find(|(_, w)| *w > 0.0).map(|(seat, _)| *seat)
}

/// Decide the winning team and the seats that share the pot.
pub fn decide_winner<R: Rng>(battle: &Battle, rng: &mut R) -> Resolution {
    let madness = battle.has_option(BattleOption::Madness);

    if battle.has_option(BattleOption::Equality) {
        return Resolution {
            team: team_by(battle, |a, b| a > b),
            seats: battle.occupied_seats(),
            jackpot_seat: None,
        };
    }

    if battle.has_option(BattleOption::Jackpot) {
        let weights = battle.summary.jackpot_weights.clone().unwrap_or_else(|| {
            battle.occupied_seats().into_iter().map(|seat| (seat, 1.0)).collect()
        });
        if let Some(seat) = weighted_pick(&weights, madness, rng) {
            if let Some(slot) = battle.slots.get(&seat) {
                return Resolution {
                    team: slot.team,
                    seats: team_seats(battle, slot.team),
                    jackpot_seat: Some(seat),
                };
            }
        }
    }

    let team = if madness {
        team_by(battle, |a, b| a < b)
    } else {
        team_by(battle, |a, b| a > b)
    };
    Resolution { team, seats: team_seats(battle, team), jackpot_seat: None }
}

/// Divide the pot among the winning seats.
pub fn settle(battle: &Battle, resolution: &Resolution) -> Winner {
    let total = battle.summary.pot();
    let shares = total.split(resolution.seats.len());
    let share = shares.last().copied().unwrap_or(Money::ZERO);
    let payouts = resolution.seats.iter().copied().zip(shares).collect();

    Winner {
        team: resolution.team,
        seats: resolution.seats.clone(),
        total,
        share,
        payouts,
        paid: BTreeSet::new(),
    }
}

/// Draw stream for the jackpot, fixed by the server seed and battle ID so
/// the pick can be audited after the reveal.
pub fn jackpot_rng(battle: &Battle) -> ChaCha20Rng {
    let material = format!("{}:{}", battle.fair.server_seed, battle.id);
    ChaCha20Rng::from_seed(hash_with_domain(JACKPOT_DOMAIN, material.as_bytes()))
}

impl BattleService {
    /// Decide and record the winner, then move to resolving.
    pub(crate) async fn resolve(self: &Arc<Self>, id: BattleId, case_count: usize) -> Result<(), BattleError> {
        let suspense = self
            .config
            .resolve_delay_per_case
            .saturating_mul(u32::try_from(case_count).unwrap_or(u32::MAX));
        self.clock.sleep(suspense).await;

        let now = self.clock.now();
        let (winner, _) = self
            .store
            .update(id, |battle| {
                if battle.summary.winner.is_none() {
                    let resolution = decide_winner(battle, &mut jackpot_rng(battle));
                    battle.summary.jackpot_seat = resolution.jackpot_seat;
                    battle.summary.winner = Some(settle(battle, &resolution));
                }
                battle.set_status(BattleStatus::Resolving, "resolving");
                battle.log(now, "resolve", 0);
                Ok(battle.summary.winner.clone())
            })
            .await?;

        if let Some(winner) = winner {
            info!(
                "Battle {} resolved: team {} takes {} across {} seats",
                id,
                winner.team,
                winner.total,
                winner.seats.len()
            );
        }
        self.notify_index().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::model::tests::{forming_battle, seat, seat_player};
    use crate::battle::topology::PlayerType;

    fn scored(player_type: PlayerType, options: &[&str], prizes: &[(u8, i64)]) -> Battle {
        let mut battle = forming_battle(player_type);
        battle.options = options.iter().map(|o| o.to_string()).collect();
        for n in 1..=player_type.seat_count() as u8 {
            seat_player(&mut battle, n, i64::from(n));
        }
        for (n, cents) in prizes {
            let amount = Money::from_cents(*cents);
            battle.summary.prizes.insert(seat(*n), amount);
            let team = battle.slots[&seat(*n)].team;
            battle.teams[team].prize += amount;
        }
        battle
    }

    fn rng() -> ChaCha20Rng {
        ChaCha20Rng::seed_from_u64(7)
    }

    #[test]
    fn test_highest_total_wins() {
        let battle = scored(PlayerType::OneVsOne, &[], &[(1, 1000), (2, 1500)]);
        let resolution = decide_winner(&battle, &mut rng());
        assert_eq!(resolution.seats, vec![seat(2)]);

        let winner = settle(&battle, &resolution);
        assert_eq!(winner.total, Money::from_units(25));
        assert_eq!(winner.share, Money::from_units(25));
        assert_eq!(winner.payouts[&seat(2)], Money::from_units(25));
    }

    #[test]
    fn test_tie_goes_to_first_team() {
        let battle = scored(PlayerType::OneVsOne, &[], &[(1, 500), (2, 500)]);
        assert_eq!(decide_winner(&battle, &mut rng()).team, 0);
    }

    #[test]
    fn test_no_teams_falls_back_to_first() {
        let mut battle = scored(PlayerType::OneVsOne, &[], &[(1, 100)]);
        battle.teams.clear();
        let resolution = decide_winner(&battle, &mut rng());
        assert_eq!(resolution.team, 0);
        assert!(resolution.seats.is_empty());
    }

    #[test]
    fn test_madness_lowest_wins() {
        let battle = scored(PlayerType::ThreeWay, &["madness"], &[(1, 900), (2, 100), (3, 400)]);
        assert_eq!(decide_winner(&battle, &mut rng()).seats, vec![seat(2)]);
    }

    #[test]
    fn test_equality_splits_across_everyone() {
        let battle = scored(
            PlayerType::TwoVsTwo,
            &["equality", "jackpot"],
            &[(1, 500), (2, 500), (3, 1500), (4, 1500)],
        );
        let resolution = decide_winner(&battle, &mut rng());
        assert_eq!(resolution.team, 1);
        assert_eq!(resolution.seats.len(), 4);
        assert!(resolution.jackpot_seat.is_none());

        let winner = settle(&battle, &resolution);
        assert_eq!(winner.total, Money::from_units(40));
        assert_eq!(winner.share, Money::from_units(10));
        assert!(winner.payouts.values().all(|p| *p == Money::from_units(10)));
    }

    #[test]
    fn test_uneven_split_conserves_pot() {
        let battle = scored(PlayerType::ThreeWay, &["equality"], &[(1, 100), (2, 0), (3, 0)]);
        let winner = settle(&battle, &decide_winner(&battle, &mut rng()));
        let paid: Money = winner.payouts.values().sum();
        assert_eq!(paid, Money::from_cents(100));
        assert_eq!(winner.share, Money::from_cents(33));
    }

    #[test]
    fn test_jackpot_winner_is_drawn_seat_team() {
        let mut battle = scored(PlayerType::TwoVsTwo, &["jackpot"], &[(1, 0), (2, 0), (3, 0), (4, 1000)]);
        battle.summary.jackpot_weights = Some(BTreeMap::from([
            (seat(1), 0.0),
            (seat(2), 0.0),
            (seat(3), 0.0),
            (seat(4), 1.0),
        ]));
        let resolution = decide_winner(&battle, &mut rng());
        assert_eq!(resolution.jackpot_seat, Some(seat(4)));
        assert_eq!(resolution.seats, vec![seat(3), seat(4)]);
    }

    #[test]
    fn test_jackpot_under_madness_favours_low_total() {
        let mut battle = scored(
            PlayerType::TwoVsTwo,
            &["jackpot", "madness"],
            &[(1, 50), (2, 317), (3, 317), (4, 316)],
        );
        battle.summary.jackpot_weights = Some(BTreeMap::from([
            (seat(1), 0.05),
            (seat(2), 0.317),
            (seat(3), 0.317),
            (seat(4), 0.316),
        ]));

        let mut rng = rng();
        let trials = 2_000;
        let mut low_wins = 0;
        for _ in 0..trials {
            let resolution = decide_winner(&battle, &mut rng);
            let drawn = resolution.jackpot_seat.expect("jackpot draw ran");
            let team = battle.slots[&drawn].team;
            assert_eq!(resolution.team, team);
            assert_eq!(resolution.seats, battle.teams[team].seats);
            if drawn == seat(1) {
                low_wins += 1;
                assert_eq!(resolution.team, 0);
                assert_eq!(resolution.seats, vec![seat(1), seat(2)]);
            }
        }
        // 1/0.05 against three seats near 1/0.317: about 68%
        let ratio = low_wins as f64 / trials as f64;
        assert!(ratio > 0.6, "ratio {ratio}");

        battle.options = vec!["jackpot".into()];
        let plain_wins = (0..trials)
            .filter(|_| decide_winner(&battle, &mut rng).jackpot_seat == Some(seat(1)))
            .count();
        assert!((plain_wins as f64 / trials as f64) < 0.1);
    }

    #[test]
    fn test_zero_weight_never_drawn() {
        let weights = BTreeMap::from([(seat(1), 0.0), (seat(2), 10.0)]);
        let mut rng = rng();
        for _ in 0..1_000 {
            assert_eq!(weighted_pick(&weights, false, &mut rng), Some(seat(2)));
        }
    }

    #[test]
    fn test_draw_frequency_tracks_weight() {
        let weights = BTreeMap::from([(seat(1), 0.25), (seat(2), 0.75)]);
        let mut rng = rng();
        let trials = 20_000;
        let hits = (0..trials)
            .filter(|_| weighted_pick(&weights, false, &mut rng) == Some(seat(2)))
            .count();
        let ratio = hits as f64 / trials as f64;
        assert!((ratio - 0.75).abs() < 0.02, "ratio {ratio}");
    }

    #[test]
    fn test_inverted_weights_favour_small_totals() {
        let weights = BTreeMap::from([(seat(1), 0.2), (seat(2), 0.8)]);
        let mut rng = rng();
        let trials = 20_000;
        let hits = (0..trials)
            .filter(|_| weighted_pick(&weights, true, &mut rng) == Some(seat(1)))
            .count();
        // 1/0.2 : 1/0.8 = 5 : 1.25
        let ratio = hits as f64 / trials as f64;
        assert!((ratio - 0.8).abs() < 0.02, "ratio {ratio}");
    }

    #[test]
    fn test_all_zero_weights_fall_back_to_first() {
        let weights = BTreeMap::from([(seat(2), 0.0), (seat(3), 0.0)]);
        assert_eq!(weighted_pick(&weights, false, &mut rng()), Some(seat(2)));
        assert_eq!(weighted_pick(&BTreeMap::new(), false, &mut rng()), None);
    }

    #[test]
    fn test_jackpot_rng_is_reproducible() {
        let battle = scored(PlayerType::OneVsOne, &["jackpot"], &[(1, 100), (2, 300)]);
        let a: u64 = jackpot_rng(&battle).gen();
        let b: u64 = jackpot_rng(&battle).gen();
        assert_eq!(a, b);
    }
}
