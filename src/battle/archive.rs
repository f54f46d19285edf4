//! Payout and Archival
//!
//! Winning players are credited one seat at a time; each credit is marked
//! paid in the persisted record before the next, so a resumed driver skips
//! seats already paid. Bots and empty seats receive nothing.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{info, warn};

use crate::backend::ledger::LedgerEntry;
use crate::core::money::Money;
use crate::error::BattleError;
use crate::network::feed::{event, WINNERS_CHANNEL};

use super::lifecycle::BattleService;
use super::model::{BattleId, BattleStatus, Slot};

impl BattleService {
    /// Credit every unpaid winning player, then move to rewarding.
    pub(crate) async fn pay_winners(self: &Arc<Self>, id: BattleId) -> Result<(), BattleError> {
        let battle = self.store.get(id).await.ok_or(BattleError::NotFound(id))?;
        let winner = battle
            .summary
            .winner
            .clone()
            .ok_or_else(|| BattleError::Internal(format!("battle {id} is resolving without a winner")))?;

        for (seat, amount) in &winner.payouts {
            if winner.paid.contains(seat) || !amount.is_positive() {
                continue;
            }
            let Some(slot) = battle.slots.get(seat).filter(|slot| slot.is_player()) else {
                continue;
            };

            self.ledger
                .add_transaction(LedgerEntry::credit(slot.id, *amount, id, "case battle win"))
                .await?;

            let now = self.clock.now();
            let seat = *seat;
            let user_id = slot.id;
            let marked = self
                .store
                .update(id, |b| {
                    if let Some(w) = b.summary.winner.as_mut() {
                        w.paid.insert(seat);
                    }
                    b.log(now, format!("payout {seat}"), user_id);
                    Ok(())
                })
                .await;
            if let Err(e) = marked {
                // Credited but not recorded: a resumed driver would pay twice.
                return Err(BattleError::Internal(format!(
                    "battle {id} paid {amount} to user {user_id} at {seat} but could not record it: {e}"
                )));
            }

            info!("Battle {} paid {} to user {} ({})", id, amount, user_id, seat);
            self.announce_winner(id, slot, *amount).await;
        }

        let now = self.clock.now();
        self.store
            .update(id, |b| {
                b.set_status(BattleStatus::Rewarding, "rewarding");
                b.log(now, "rewarded", 0);
                Ok(())
            })
            .await?;
        self.notify_index().await;
        Ok(())
    }

    async fn announce_winner(&self, id: BattleId, slot: &Slot, amount: Money) {
        let payload = json!({
            "battleId": id,
            "userId": slot.id,
            "displayName": slot.display_name,
            "amount": amount,
        });
        let sent = match event(WINNERS_CHANNEL, "liveWinner", &payload) {
            Ok(ev) => self.feed.emit(ev).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!("Live winner notice for battle {} not sent: {}", id, e);
        }
    }

    /// Hold the result visible, then archive and drop the battle.
    pub(crate) async fn finish(self: &Arc<Self>, id: BattleId) -> Result<(), BattleError> {
        self.clock.sleep(self.config.archive_cooldown).await;

        let now = self.clock.now();
        self.store
            .update(id, |b| {
                b.set_status(BattleStatus::Archived, "archived");
                b.log(now, "archived", 0);
                Ok(())
            })
            .await?;
        self.store.retire(id).await?;
        info!("Battle {} archived", id);

        self.notify_index().await;
        self.schedule_removal(id, Duration::ZERO);
        Ok(())
    }
}
