//! Battle Aggregate
//!
//! The full state of one battle: seats, teams, round results, winner,
//! fairness bundle and audit log. The same structure is persisted as JSON
//! and mutated in place by the lifecycle controller.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::de;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::catalog::case::{CaseEntry, ItemId};
use crate::core::money::Money;
use crate::fairness::seed::ServerSeed;

use super::topology::{PlayerType, SeatId};

/// Battle identifier assigned by the persistent store.
pub type BattleId = i64;

/// User identifier; 0 means "nobody".
pub type UserId = i64;

// =============================================================================
// STATUS
// =============================================================================

/// Lifecycle state. Persisted as its numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BattleStatus {
    /// Seats still open (0).
    Waiting,
    /// All seats filled, rounds being drawn (1).
    Rolling,
    /// Winner decided, payouts pending (2).
    Resolving,
    /// Winners paid, cooling down (3).
    Rewarding,
    /// Finished (-1).
    Archived,
    /// Canceled by the creator (-2).
    Canceled,
}

impl BattleStatus {
    /// Machine code.
    pub fn code(self) -> i8 {
        match self {
            BattleStatus::Waiting => 0,
            BattleStatus::Rolling => 1,
            BattleStatus::Resolving => 2,
            BattleStatus::Rewarding => 3,
            BattleStatus::Archived => -1,
            BattleStatus::Canceled => -2,
        }
    }

    /// Inverse of [`BattleStatus::code`].
    pub fn from_code(code: i8) -> Option<Self> {
        Some(match code {
            0 => BattleStatus::Waiting,
            1 => BattleStatus::Rolling,
            2 => BattleStatus::Resolving,
            3 => BattleStatus::Rewarding,
            -1 => BattleStatus::Archived,
            -2 => BattleStatus::Canceled,
            _ => return None,
        })
    }

    /// Seats may still change.
    pub fn is_forming(self) -> bool {
        self == BattleStatus::Waiting
    }

    /// Background progression is still owed.
    pub fn is_in_flight(self) -> bool {
        matches!(
            self,
            BattleStatus::Rolling | BattleStatus::Resolving | BattleStatus::Rewarding
        )
    }

    /// The server seed may be shown to clients.
    pub fn reveals_seed(self) -> bool {
        matches!(
            self,
            BattleStatus::Rewarding | BattleStatus::Archived | BattleStatus::Canceled
        )
    }
}

impl Serialize for BattleStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i8(self.code())
    }
}

impl<'de> Deserialize<'de> for BattleStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = i8::deserialize(deserializer)?;
        BattleStatus::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown battle status code {code}")))
    }
}

// =============================================================================
// OPTIONS
// =============================================================================

/// Recognised option modifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleOption {
    /// Joining needs the private key.
    Private,
    /// Winner drawn by prize share.
    Jackpot,
    /// Lowest total wins.
    Madness,
    /// Pot split across every seat.
    Equality,
    /// Shorter round pacing.
    FastSpin,
}

impl BattleOption {
    /// Parse a case-insensitive tag.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "private" => Some(BattleOption::Private),
            "jackpot" => Some(BattleOption::Jackpot),
            "madness" => Some(BattleOption::Madness),
            "equality" => Some(BattleOption::Equality),
            "fast spin" | "fast_spin" | "fastspin" | "fast" => Some(BattleOption::FastSpin),
            _ => None,
        }
    }
}

/// Lowercase, trim and de-duplicate option tags, keeping order.
pub fn normalize_options(raw: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    raw.iter()
        .map(|tag| tag.trim().to_ascii_lowercase())
        .filter(|tag| !tag.is_empty() && seen.insert(tag.clone()))
        .collect()
}

// =============================================================================
// SEATS AND TEAMS
// =============================================================================

/// Who sits in a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlotKind {
    /// Open seat.
    Empty,
    /// Human player.
    Player,
    /// House bot.
    Bot,
}

/// One seat's occupant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    /// Occupant ID (user or bot), 0 when empty.
    pub id: i64,
    /// Occupant display name.
    pub display_name: String,
    /// Client seed bound to this seat.
    pub client_seed: String,
    /// Occupant kind.
    #[serde(rename = "type")]
    pub kind: SlotKind,
    /// Index into [`Battle::teams`].
    pub team: usize,
}

impl Slot {
    /// Open seat on `team`.
    pub fn empty(team: usize) -> Self {
        Self {
            id: 0,
            display_name: String::new(),
            client_seed: String::new(),
            kind: SlotKind::Empty,
            team,
        }
    }

    /// Seat held by a player.
    pub fn player(id: UserId, display_name: String, client_seed: String, team: usize) -> Self {
        Self { id, display_name, client_seed, kind: SlotKind::Player, team }
    }

    /// Seat held by a bot.
    pub fn bot(id: i64, display_name: String, client_seed: String, team: usize) -> Self {
        Self { id, display_name, client_seed, kind: SlotKind::Bot, team }
    }

    /// No occupant.
    pub fn is_empty(&self) -> bool {
        self.kind == SlotKind::Empty
    }

    /// Held by a player.
    pub fn is_player(&self) -> bool {
        self.kind == SlotKind::Player
    }

    /// Held by a bot.
    pub fn is_bot(&self) -> bool {
        self.kind == SlotKind::Bot
    }
}

/// A group of seats sharing a prize total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Team {
    /// Member seats.
    pub seats: Vec<SeatId>,
    /// Sum of member draws.
    pub prize: Money,
    /// Rounds this team led.
    pub round_wins: u32,
}

// =============================================================================
// RESULTS
// =============================================================================

/// One seat's draw in one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    /// Seat that drew.
    pub seat: SeatId,
    /// Item won.
    pub item_id: ItemId,
    /// Item price.
    pub price: Money,
    /// Raw roll.
    pub roll: u32,
    /// Nonce used.
    pub nonce: u64,
    /// Share of the round's total, in percent.
    #[serde(default)]
    pub percentage: f64,
}

/// Resolved winner and payout plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Winner {
    /// Winning team index.
    pub team: usize,
    /// Seats sharing the pot.
    pub seats: Vec<SeatId>,
    /// Whole pot.
    pub total: Money,
    /// Base per-seat share (`total / seats`).
    pub share: Money,
    /// Exact amount per seat; sums to `total`.
    pub payouts: BTreeMap<SeatId, Money>,
    /// Seats already credited.
    #[serde(default)]
    pub paid: BTreeSet<SeatId>,
}

/// Running results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    /// Draws per zero-based round.
    #[serde(default)]
    pub steps: BTreeMap<usize, Vec<StepResult>>,
    /// Running total per seat.
    #[serde(default)]
    pub prizes: BTreeMap<SeatId, Money>,
    /// Seat shares of the pot, for jackpot battles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jackpot_weights: Option<BTreeMap<SeatId, f64>>,
    /// Seat picked by the jackpot draw.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jackpot_seat: Option<SeatId>,
    /// Final outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Winner>,
}

impl Summary {
    /// Has this round been drawn already?
    pub fn has_round(&self, round: usize) -> bool {
        self.steps.get(&round).is_some_and(|steps| !steps.is_empty())
    }

    /// Sum of all seat totals.
    pub fn pot(&self) -> Money {
        self.prizes.values().sum()
    }
}

/// Seeds behind every draw.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FairBundle {
    /// Secret server seed (hex).
    pub server_seed: String,
    /// Published commitment.
    pub server_seed_hash: String,
    /// Client seed per occupied seat.
    #[serde(default)]
    pub client_seeds: BTreeMap<SeatId, String>,
}

impl From<ServerSeed> for FairBundle {
    fn from(seed: ServerSeed) -> Self {
        Self {
            server_seed: seed.seed,
            server_seed_hash: seed.hash,
            client_seeds: BTreeMap::new(),
        }
    }
}

/// Audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleLog {
    /// When.
    pub time: DateTime<Utc>,
    /// What happened.
    pub action: String,
    /// Acting user, 0 for the system.
    pub user_id: UserId,
}

// =============================================================================
// BATTLE
// =============================================================================

/// One battle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battle {
    /// Store-assigned ID (0 before insert).
    pub id: BattleId,
    /// Topology.
    pub player_type: PlayerType,
    /// Normalised option tags.
    #[serde(default)]
    pub options: Vec<String>,
    /// One case snapshot per round.
    pub cases: Vec<CaseEntry>,
    /// Entry cost per seat.
    pub cost: Money,
    /// Seat occupants.
    pub slots: BTreeMap<SeatId, Slot>,
    /// Fixed team layout.
    pub teams: Vec<Team>,
    /// Human-readable status.
    pub status: String,
    /// Machine status.
    pub status_code: BattleStatus,
    /// Results so far.
    #[serde(default)]
    pub summary: Summary,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last mutation.
    pub updated_at: DateTime<Utc>,
    /// Creator.
    pub created_by: UserId,
    /// Provably-fair seeds.
    pub fair: FairBundle,
    /// Append-only audit trail.
    #[serde(default)]
    pub logs: Vec<BattleLog>,
    /// Join key for private battles.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

impl Battle {
    /// New forming battle with every seat open.
    pub fn new(
        player_type: PlayerType,
        options: Vec<String>,
        cases: Vec<CaseEntry>,
        seed: ServerSeed,
        created_by: UserId,
        now: DateTime<Utc>,
    ) -> Self {
        let layout = player_type.team_layout();
        let mut slots = BTreeMap::new();
        for (team, seats) in layout.iter().enumerate() {
            for seat in seats {
                slots.insert(*seat, Slot::empty(team));
            }
        }
        let teams = layout
            .into_iter()
            .map(|seats| Team { seats, prize: Money::ZERO, round_wins: 0 })
            .collect();
        let cost = cases.iter().map(|case| case.price).sum();

        let mut battle = Self {
            id: 0,
            player_type,
            options,
            cases,
            cost,
            slots,
            teams,
            status: String::new(),
            status_code: BattleStatus::Waiting,
            summary: Summary::default(),
            created_at: now,
            updated_at: now,
            created_by,
            fair: seed.into(),
            logs: Vec::new(),
            private_key: None,
        };
        battle.refresh_fill_status();
        battle
    }

    /// Number of rounds.
    pub fn round_count(&self) -> usize {
        self.cases.len()
    }

    /// Is the option tag present?
    pub fn has_option(&self, option: BattleOption) -> bool {
        self.options.iter().any(|tag| BattleOption::parse(tag) == Some(option))
    }

    /// Seat held by this player.
    pub fn seat_of(&self, user_id: UserId) -> Option<SeatId> {
        self.slots
            .iter()
            .find(|(_, slot)| slot.is_player() && slot.id == user_id)
            .map(|(seat, _)| *seat)
    }

    /// Player IDs in seat order.
    pub fn players(&self) -> Vec<UserId> {
        self.slots.values().filter(|s| s.is_player()).map(|s| s.id).collect()
    }

    /// Bot IDs in seat order.
    pub fn bots(&self) -> Vec<i64> {
        self.slots.values().filter(|s| s.is_bot()).map(|s| s.id).collect()
    }

    /// Occupied seats in order.
    pub fn occupied_seats(&self) -> Vec<SeatId> {
        self.slots
            .iter()
            .filter(|(_, slot)| !slot.is_empty())
            .map(|(seat, _)| *seat)
            .collect()
    }

    /// Open seat count.
    pub fn empty_seat_count(&self) -> usize {
        self.slots.values().filter(|s| s.is_empty()).count()
    }

    /// Every seat taken.
    pub fn is_full(&self) -> bool {
        self.empty_seat_count() == 0
    }

    /// Put an occupant in `seat`, binding its client seed.
    pub fn occupy(&mut self, seat: SeatId, slot: Slot) {
        self.fair.client_seeds.insert(seat, slot.client_seed.clone());
        self.slots.insert(seat, slot);
    }

    /// Empty `seat`, returning the previous occupant.
    pub fn vacate(&mut self, seat: SeatId) -> Option<Slot> {
        let slot = self.slots.get_mut(&seat)?;
        let team = slot.team;
        let previous = std::mem::replace(slot, Slot::empty(team));
        self.fair.client_seeds.remove(&seat);
        Some(previous)
    }

    /// Status bookkeeping after seats change.
    ///
    /// A full forming battle moves to [`BattleStatus::Rolling`].
    pub fn refresh_fill_status(&mut self) {
        if !self.status_code.is_forming() {
            return;
        }
        if self.is_full() {
            self.set_status(BattleStatus::Rolling, "Battle is running");
        } else {
            let open = self.empty_seat_count();
            self.status = format!("Waiting for {open} users");
        }
    }

    /// Set both status fields.
    pub fn set_status(&mut self, code: BattleStatus, label: impl Into<String>) {
        self.status_code = code;
        self.status = label.into();
    }

    /// Append an audit entry.
    pub fn log(&mut self, time: DateTime<Utc>, action: impl Into<String>, user_id: UserId) {
        self.logs.push(BattleLog { time, action: action.into(), user_id });
    }
}

// =============================================================================
// CLIENT VIEW
// =============================================================================

/// What clients see of a battle.
///
/// The server seed stays hidden until the battle is over and the private
/// key is never exposed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BattleView {
    /// Battle ID.
    pub id: BattleId,
    /// Topology.
    pub player_type: PlayerType,
    /// Option tags.
    pub options: Vec<String>,
    /// Cases per round.
    pub cases: Vec<CaseEntry>,
    /// Number of rounds.
    pub case_count: usize,
    /// Entry cost.
    pub cost: Money,
    /// Seats.
    pub slots: BTreeMap<SeatId, Slot>,
    /// Teams.
    pub teams: Vec<Team>,
    /// Human status.
    pub status: String,
    /// Machine status.
    pub status_code: BattleStatus,
    /// Results.
    pub summary: Summary,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update.
    pub updated_at: DateTime<Utc>,
    /// Creator.
    pub created_by: UserId,
    /// Published commitment.
    pub server_seed_hash: String,
    /// Revealed seed, once over.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_seed: Option<String>,
    /// Client seed per seat.
    pub client_seeds: BTreeMap<SeatId, String>,
    /// Whether a join key is required.
    pub is_private: bool,
}

impl From<&Battle> for BattleView {
    fn from(battle: &Battle) -> Self {
        Self {
            id: battle.id,
            player_type: battle.player_type,
            options: battle.options.clone(),
            cases: battle.cases.clone(),
            case_count: battle.cases.len(),
            cost: battle.cost,
            slots: battle.slots.clone(),
            teams: battle.teams.clone(),
            status: battle.status.clone(),
            status_code: battle.status_code,
            summary: battle.summary.clone(),
            created_at: battle.created_at,
            updated_at: battle.updated_at,
            created_by: battle.created_by,
            server_seed_hash: battle.fair.server_seed_hash.clone(),
            server_seed: battle
                .status_code
                .reveals_seed()
                .then(|| battle.fair.server_seed.clone()),
            client_seeds: battle.fair.client_seeds.clone(),
            is_private: battle.private_key.is_some(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
