//! Battle Lifecycle Controller
//!
//! Request-path operations: create, join, change seat, add bot, cancel and
//! the read-only queries. Seat changes are checked against the battle's
//! status inside [`BattleStore::update`], serialized with every other
//! mutation. Money moves before seats do, and every failure after a debit
//! is compensated with a refund.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::backend::ledger::{Ledger, LedgerEntry};
use crate::backend::records::{BattleRecords, CatalogRecords};
use crate::catalog::cache::CatalogCache;
use crate::catalog::case::{Bot, CaseEntry, CaseId};
use crate::config::BattleConfig;
use crate::core::clock::Clock;
use crate::core::money::Money;
use crate::error::BattleError;
use crate::fairness::seed::{bot_client_seed, client_seed_for, private_join_key, ServerSeed};
use crate::network::auth::{Identity, IdentityResolver};
use crate::network::feed::{event, LiveFeed, BATTLES_CHANNEL};

use super::model::{normalize_options, Battle, BattleId, BattleOption, BattleStatus, BattleView, Slot, UserId};
use super::store::BattleStore;
use super::tasks::TaskPool;
use super::topology::{PlayerType, SeatId};

/// External services the controller depends on.
pub struct Collaborators {
    /// Battle persistence.
    pub battles: Arc<dyn BattleRecords>,
    /// Case and bot source.
    pub catalog: Arc<dyn CatalogRecords>,
    /// Balance ledger.
    pub ledger: Arc<dyn Ledger>,
    /// Token resolution.
    pub identity: Arc<dyn IdentityResolver>,
    /// Live notifications.
    pub feed: Arc<dyn LiveFeed>,
    /// Time and pacing.
    pub clock: Arc<dyn Clock>,
}

/// `count` rounds of one case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseSelection {
    /// Case ID.
    pub case_id: CaseId,
    /// Rounds of it.
    pub count: u32,
}

/// Create request.
#[derive(Debug, Clone)]
pub struct CreateBattle {
    /// Seat topology.
    pub player_type: PlayerType,
    /// Option tags.
    pub options: Vec<String>,
    /// Cases in roll order.
    pub cases: Vec<CaseSelection>,
}

/// Join request.
#[derive(Debug, Clone)]
pub struct JoinBattle {
    /// Target battle.
    pub battle_id: BattleId,
    /// Requested seat; first open seat when absent.
    pub seat: Option<SeatId>,
    /// Join key for private battles.
    pub private_key: Option<String>,
}

/// Result of a successful create.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedBattle {
    /// The new battle.
    pub battle: BattleView,
    /// Invite key, for private battles only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
}

/// Battle engine entry point.
pub struct BattleService {
    pub(crate) config: BattleConfig,
    pub(crate) store: BattleStore,
    pub(crate) catalog: CatalogCache,
    pub(crate) ledger: Arc<dyn Ledger>,
    identity: Arc<dyn IdentityResolver>,
    pub(crate) feed: Arc<dyn LiveFeed>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) tasks: TaskPool,
}

/// First open seat, or the requested one if it is open.
fn open_seat(battle: &Battle, requested: Option<SeatId>) -> Result<SeatId, BattleError> {
    match requested {
        Some(seat) => {
            let slot = battle.slots.get(&seat).ok_or(BattleError::InvalidSeat(seat))?;
            if !slot.is_empty() {
                return Err(BattleError::SeatOccupied(seat));
            }
            Ok(seat)
        }
        None => battle
            .slots
            .iter()
            .find(|(_, slot)| slot.is_empty())
            .map(|(seat, _)| *seat)
            .ok_or(BattleError::Locked(battle.id)),
    }
}

/// Everything that must hold for `user` to take a seat.
fn check_joinable(
    battle: &Battle,
    user: UserId,
    seat: Option<SeatId>,
    key: Option<&str>,
) -> Result<SeatId, BattleError> {
    if let Some(expected) = battle.private_key.as_deref() {
        if key.map(str::trim) != Some(expected) {
            return Err(BattleError::PrivateKeyMismatch);
        }
    }
    if !battle.status_code.is_forming() {
        return Err(BattleError::Locked(battle.id));
    }
    if battle.seat_of(user).is_some() {
        return Err(BattleError::AlreadyJoined(battle.id));
    }
    open_seat(battle, seat)
}

fn team_of(battle: &Battle, seat: SeatId) -> Result<usize, BattleError> {
    battle
        .slots
        .get(&seat)
        .map(|slot| slot.team)
        .ok_or(BattleError::InvalidSeat(seat))
}

fn require_creator(battle: &Battle, user: UserId) -> Result<(), BattleError> {
    if battle.created_by != user {
        return Err(BattleError::NotCreator);
    }
    Ok(())
}

fn require_forming(battle: &Battle) -> Result<(), BattleError> {
    if !battle.status_code.is_forming() {
        return Err(BattleError::Locked(battle.id));
    }
    Ok(())
}

impl BattleService {
    /// Wire up the controller.
    pub fn new(config: BattleConfig, collab: Collaborators) -> Arc<Self> {
        Arc::new(Self {
            store: BattleStore::new(collab.battles, Arc::clone(&collab.clock)),
            catalog: CatalogCache::new(collab.catalog),
            ledger: collab.ledger,
            identity: collab.identity,
            feed: collab.feed,
            clock: collab.clock,
            tasks: TaskPool::new(),
            config,
        })
    }

    /// Background task pool.
    pub fn tasks(&self) -> &TaskPool {
        &self.tasks
    }

    /// Load live battles and resume any that were mid-flight.
    pub async fn start(self: &Arc<Self>) -> Result<usize, BattleError> {
        let loaded = self.store.load_live().await?;
        for battle in self.store.snapshot().await {
            if battle.id > 0 && battle.status_code.is_in_flight() {
                info!("Resuming battle {} in phase {:?}", battle.id, battle.status_code);
                self.spawn_driver(battle.id);
            }
        }
        Ok(loaded)
    }

    async fn select_cases(&self, selections: &[CaseSelection]) -> Result<Vec<CaseEntry>, BattleError> {
        if selections.is_empty() {
            return Err(BattleError::InvalidFormat("no cases selected".into()));
        }
        let rounds: u64 = selections.iter().map(|s| u64::from(s.count)).sum();
        if rounds > self.config.max_rounds as u64 {
            return Err(BattleError::InvalidCase(format!(
                "{} rounds requested, at most {} allowed",
                rounds, self.config.max_rounds
            )));
        }

        let catalog = self.catalog.cases().await?;
        let mut cases = Vec::new();
        for selection in selections {
            if selection.count == 0 {
                return Err(BattleError::InvalidCase(format!("case {} selected zero times", selection.case_id)));
            }
            let case = catalog
                .get(&selection.case_id)
                .ok_or_else(|| BattleError::InvalidCase(format!("unknown case {}", selection.case_id)))?;
            cases.extend(std::iter::repeat(case).take(selection.count as usize).cloned());
        }
        Ok(cases)
    }

    fn ensure_affordable(who: &Identity, cost: Money) -> Result<(), BattleError> {
        if who.balance < cost {
            return Err(BattleError::InsufficientBalance { cost, balance: who.balance });
        }
        Ok(())
    }

    /// Credit `amount` back to `user`. Failures are logged and returned.
    pub(crate) async fn refund(&self, user: UserId, amount: Money, battle_id: BattleId) -> Result<(), BattleError> {
        match self
            .ledger
            .add_transaction(LedgerEntry::credit(user, amount, battle_id, "case battle refund"))
            .await
        {
            Ok(tx) => {
                info!("Refunded {} to user {} for battle {} ({})", amount, user, battle_id, tx);
                Ok(())
            }
            Err(e) => {
                error!("Refund of {} to user {} for battle {} failed: {}", amount, user, battle_id, e);
                Err(e.into())
            }
        }
    }

    /// Undo a debit after `cause` failed the operation.
    ///
    /// A failed refund is surfaced as [`BattleError::RefundOwed`] so the
    /// caller knows the debit stands.
    async fn compensate(&self, user: UserId, amount: Money, battle_id: BattleId, cause: BattleError) -> BattleError {
        match self.refund(user, amount, battle_id).await {
            Ok(()) => cause,
            Err(refund) => {
                error!(
                    "REFUND OWED: {} to user {} for battle {} ({}; refund failed: {})",
                    amount, user, battle_id, cause, refund
                );
                BattleError::RefundOwed { user_id: user, amount, cause: Box::new(cause) }
            }
        }
    }

    /// Open a battle with the caller in seat 1.
    pub async fn create(self: &Arc<Self>, token: &str, request: CreateBattle) -> Result<CreatedBattle, BattleError> {
        let who = self.identity.resolve(token).await?;
        let cases = self.select_cases(&request.cases).await?;
        let now = self.clock.now();

        let mut battle = Battle::new(
            request.player_type,
            normalize_options(&request.options),
            cases,
            ServerSeed::generate(),
            who.user_id,
            now,
        );
        let cost = battle.cost;
        Self::ensure_affordable(&who, cost)?;

        let first = SeatId::first(1)
            .next()
            .ok_or_else(|| BattleError::Internal("topology without seats".into()))?;
        let team = team_of(&battle, first)?;
        battle.occupy(
            first,
            Slot::player(who.user_id, who.display_name.clone(), client_seed_for(who.user_id), team),
        );
        battle.refresh_fill_status();

        self.ledger
            .add_transaction(LedgerEntry::debit(who.user_id, cost, 0, "case battle entry"))
            .await?;

        let private = battle.has_option(BattleOption::Private);
        let secret = self.config.join_key_secret.as_str();
        let user = who.user_id;
        let inserted = self
            .store
            .insert_new(battle, |b| {
                if private {
                    b.private_key = Some(private_join_key(secret, b.id, b.created_at.timestamp())?);
                }
                b.log(now, "create", user);
                Ok(())
            })
            .await;

        let battle = match inserted {
            Ok(battle) => battle,
            Err(e) => return Err(self.compensate(user, cost, 0, e).await),
        };

        info!(
            "Battle {} created by user {}: {} x{} rounds, cost {}",
            battle.id,
            user,
            battle.player_type,
            battle.round_count(),
            cost
        );
        self.notify_index().await;
        Ok(CreatedBattle {
            battle: BattleView::from(&battle),
            private_key: battle.private_key.clone(),
        })
    }

    /// Take a seat in a forming battle.
    pub async fn join(self: &Arc<Self>, token: &str, request: JoinBattle) -> Result<BattleView, BattleError> {
        let who = self.identity.resolve(token).await?;
        let id = request.battle_id;
        let key = request.private_key.as_deref();

        let (seat, cost) = self
            .store
            .read(id, |b| check_joinable(b, who.user_id, request.seat, key).map(|seat| (seat, b.cost)))
            .await??;
        Self::ensure_affordable(&who, cost)?;

        self.ledger
            .add_transaction(LedgerEntry::debit(who.user_id, cost, id, "case battle entry"))
            .await?;

        let now = self.clock.now();
        let committed = self
            .store
            .update(id, |b| {
                let seat = check_joinable(b, who.user_id, Some(seat), key)?;
                let team = team_of(b, seat)?;
                b.occupy(
                    seat,
                    Slot::player(who.user_id, who.display_name.clone(), client_seed_for(who.user_id), team),
                );
                b.refresh_fill_status();
                b.log(now, format!("join {seat}"), who.user_id);
                Ok(b.status_code == BattleStatus::Rolling)
            })
            .await;

        let (filled, battle) = match committed {
            Ok(done) => done,
            Err(e) => {
                warn!("Join of user {} to battle {} failed after debit: {}", who.user_id, id, e);
                return Err(self.compensate(who.user_id, cost, id, e).await);
            }
        };

        info!("User {} joined battle {} at {}", who.user_id, id, seat);
        if filled {
            self.spawn_driver(id);
        }
        self.notify_index().await;
        Ok(BattleView::from(&battle))
    }

    /// Move the caller to another open seat.
    pub async fn change_seat(self: &Arc<Self>, token: &str, battle_id: BattleId, to: SeatId) -> Result<BattleView, BattleError> {
        let who = self.identity.resolve(token).await?;
        let now = self.clock.now();

        let (filled, battle) = self
            .store
            .update(battle_id, |b| {
                require_forming(b)?;
                let from = b.seat_of(who.user_id).ok_or(BattleError::NotSeated(b.id))?;
                let to = open_seat(b, Some(to))?;
                let team = team_of(b, to)?;

                let mut slot = b.vacate(from).ok_or(BattleError::InvalidSeat(from))?;
                slot.team = team;
                b.occupy(to, slot);
                b.refresh_fill_status();
                b.log(now, format!("seat {from} -> {to}"), who.user_id);
                Ok(b.status_code == BattleStatus::Rolling)
            })
            .await?;

        if filled {
            self.spawn_driver(battle_id);
        }
        self.notify_index().await;
        Ok(BattleView::from(&battle))
    }

    /// Fill a seat with a house bot. Creator only.
    pub async fn add_bot(self: &Arc<Self>, token: &str, battle_id: BattleId, seat: Option<SeatId>) -> Result<BattleView, BattleError> {
        let who = self.identity.resolve(token).await?;

        let seated = self
            .store
            .read(battle_id, |b| {
                require_creator(b, who.user_id)?;
                require_forming(b)?;
                open_seat(b, seat)?;
                Ok::<_, BattleError>(b.bots())
            })
            .await??;
        let bot: Bot = self.catalog.pick_bot(&seated).await?.ok_or(BattleError::NoBotAvailable)?;

        let now = self.clock.now();
        let (filled, battle) = self
            .store
            .update(battle_id, |b| {
                require_creator(b, who.user_id)?;
                require_forming(b)?;
                if b.bots().contains(&bot.id) {
                    return Err(BattleError::NoBotAvailable);
                }
                let seat = open_seat(b, seat)?;
                let team = team_of(b, seat)?;
                b.occupy(seat, Slot::bot(bot.id, bot.name.clone(), bot_client_seed(bot.id), team));
                b.refresh_fill_status();
                b.log(now, format!("bot {} {seat}", bot.id), who.user_id);
                Ok(b.status_code == BattleStatus::Rolling)
            })
            .await?;

        info!("Bot {} added to battle {}", bot.id, battle_id);
        if filled {
            self.spawn_driver(battle_id);
        }
        self.notify_index().await;
        Ok(BattleView::from(&battle))
    }

    /// Cancel a battle nobody else has joined, refunding the creator.
    ///
    /// The battle is marked canceled first so nobody can join it, then the
    /// creator is refunded. If the refund fails the battle goes back to
    /// forming under a fresh server seed and stays live, so the cancel can
    /// be retried.
    pub async fn cancel(self: &Arc<Self>, token: &str, battle_id: BattleId) -> Result<BattleView, BattleError> {
        let who = self.identity.resolve(token).await?;
        let now = self.clock.now();

        let (cost, battle) = self
            .store
            .update(battle_id, |b| {
                require_creator(b, who.user_id)?;
                if !b.status_code.is_forming() || b.occupied_seats().len() != 1 || b.seat_of(who.user_id).is_none() {
                    return Err(BattleError::CannotCancel(b.id));
                }
                b.set_status(BattleStatus::Canceled, "canceled");
                b.log(now, "cancel", who.user_id);
                Ok(b.cost)
            })
            .await?;

        if let Err(e) = self.refund(who.user_id, cost, battle_id).await {
            // The canceled view revealed the seed; a reopened battle needs a new one.
            let reseed = ServerSeed::generate();
            let reverted = self
                .store
                .update(battle_id, |b| {
                    if b.status_code != BattleStatus::Canceled {
                        return Err(BattleError::Internal(format!("battle {} changed while canceling", b.id)));
                    }
                    b.fair.server_seed = reseed.seed;
                    b.fair.server_seed_hash = reseed.hash;
                    b.set_status(BattleStatus::Waiting, "");
                    b.refresh_fill_status();
                    b.log(now, "cancel reverted", who.user_id);
                    Ok(())
                })
                .await;
            return Err(match reverted {
                Ok(_) => {
                    warn!("Cancel of battle {} reverted, refund failed: {}", battle_id, e);
                    e
                }
                Err(revert) => {
                    error!(
                        "REFUND OWED: {} to user {} for canceled battle {} (revert failed: {})",
                        cost, who.user_id, battle_id, revert
                    );
                    BattleError::RefundOwed { user_id: who.user_id, amount: cost, cause: Box::new(e) }
                }
            });
        }

        if let Err(e) = self.store.retire(battle_id).await {
            warn!("Canceled battle {} still flagged live: {}", battle_id, e);
        }
        self.notify_index().await;
        self.schedule_removal(battle_id, self.config.cancel_removal_delay);

        info!("Battle {} canceled by user {}", battle_id, who.user_id);
        Ok(BattleView::from(&battle))
    }

    /// Drop a battle from the live index after `delay`.
    pub(crate) fn schedule_removal(self: &Arc<Self>, id: BattleId, delay: Duration) {
        let service = Arc::clone(self);
        self.tasks.spawn(format!("battle-{id}-removal"), async move {
            service.clock.sleep(delay).await;
            service.store.remove(id).await;
            service.notify_index().await;
            Ok(())
        });
    }

    /// One live battle.
    pub async fn battle(&self, id: BattleId) -> Result<BattleView, BattleError> {
        self.store.read(id, |b| BattleView::from(b)).await
    }

    /// Every live battle.
    pub async fn live_battles(&self) -> Vec<BattleView> {
        self.store.snapshot().await.iter().map(BattleView::from).collect()
    }

    /// The case catalog.
    pub async fn cases(&self) -> Result<Vec<CaseEntry>, BattleError> {
        Ok(self.catalog.cases().await?.values().cloned().collect())
    }

    /// The bot roster.
    pub async fn bots(&self) -> Result<Vec<Bot>, BattleError> {
        Ok(self.catalog.bots().await?.as_ref().clone())
    }

    /// Push the live index to viewers.
    pub(crate) async fn notify_index(&self) {
        let views = self.live_battles().await;
        let sent = match event(BATTLES_CHANNEL, "battleIndex", &views) {
            Ok(ev) => self.feed.emit(ev).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!("Battle index not published: {}", e);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
