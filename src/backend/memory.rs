//! In-Process Backends
//!
//! Records and ledger held in memory. Used by the demo binary and tests;
//! fault switches let tests exercise the failure paths of the engine.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use uuid::Uuid;

use crate::battle::model::{Battle, BattleId, UserId};
use crate::catalog::case::{Bot, CaseEntry};
use crate::core::money::Money;

use super::ledger::{Ledger, LedgerEntry, LedgerError, TransactionId, TransactionKind};
use super::records::{BattleRecords, CatalogRecords};
use super::BackendError;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// RECORDS
// =============================================================================

#[derive(Debug, Clone)]
struct StoredBattle {
    battle: Battle,
    live: bool,
}

#[derive(Debug, Default)]
struct Tables {
    next_id: BattleId,
    battles: BTreeMap<BattleId, StoredBattle>,
    cases: Vec<CaseEntry>,
    bots: Vec<Bot>,
    case_loads: usize,
    reject_updates: bool,
    offline: bool,
}

/// Battle and catalog records in memory.
#[derive(Debug, Default)]
pub struct MemoryRecords {
    tables: Mutex<Tables>,
}

impl MemoryRecords {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with a catalog.
    pub fn with_catalog(cases: Vec<CaseEntry>, bots: Vec<Bot>) -> Self {
        let records = Self::new();
        {
            let mut tables = locked(&records.tables);
            tables.cases = cases;
            tables.bots = bots;
        }
        records
    }

    /// Seed a live row as if written by an earlier process.
    pub fn preload(&self, battle: Battle) {
        let mut tables = locked(&self.tables);
        tables.next_id = tables.next_id.max(battle.id);
        tables.battles.insert(battle.id, StoredBattle { battle, live: true });
    }

    /// Persisted snapshot of a battle.
    pub fn stored(&self, id: BattleId) -> Option<Battle> {
        locked(&self.tables).battles.get(&id).map(|s| s.battle.clone())
    }

    /// Live flag of a battle.
    pub fn is_live(&self, id: BattleId) -> Option<bool> {
        locked(&self.tables).battles.get(&id).map(|s| s.live)
    }

    /// Times the case table has been read.
    pub fn case_loads(&self) -> usize {
        locked(&self.tables).case_loads
    }

    /// Make battle updates report zero affected rows.
    pub fn reject_updates(&self, reject: bool) {
        locked(&self.tables).reject_updates = reject;
    }

    /// Make every call fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        locked(&self.tables).offline = offline;
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>, BackendError> {
        let tables = locked(&self.tables);
        if tables.offline {
            return Err(BackendError::Transport("memory store offline".into()));
        }
        Ok(tables)
    }
}

#[async_trait]
impl BattleRecords for MemoryRecords {
    async fn insert_battle(&self, battle: &Battle) -> Result<BattleId, BackendError> {
        let mut tables = self.tables()?;
        tables.next_id += 1;
        let id = tables.next_id;
        let mut stored = battle.clone();
        stored.id = id;
        tables.battles.insert(id, StoredBattle { battle: stored, live: true });
        Ok(id)
    }

    async fn update_battle(&self, battle: &Battle) -> Result<(), BackendError> {
        let mut tables = self.tables()?;
        if tables.reject_updates {
            return Err(BackendError::NoRowsAffected);
        }
        match tables.battles.get_mut(&battle.id) {
            Some(row) => {
                row.battle = battle.clone();
                Ok(())
            }
            None => Err(BackendError::NoRowsAffected),
        }
    }

    async fn set_live(&self, id: BattleId, live: bool) -> Result<(), BackendError> {
        let mut tables = self.tables()?;
        let row = tables.battles.get_mut(&id).ok_or(BackendError::NoRowsAffected)?;
        row.live = live;
        Ok(())
    }

    async fn load_live_battles(&self) -> Result<Vec<Battle>, BackendError> {
        let tables = self.tables()?;
        Ok(tables
            .battles
            .values()
            .filter(|row| row.live)
            .map(|row| row.battle.clone())
            .collect())
    }
}

#[async_trait]
impl CatalogRecords for MemoryRecords {
    async fn load_cases(&self) -> Result<Vec<CaseEntry>, BackendError> {
        let mut tables = self.tables()?;
        tables.case_loads += 1;
        Ok(tables.cases.clone())
    }

    async fn load_bots(&self) -> Result<Vec<Bot>, BackendError> {
        Ok(self.tables()?.bots.clone())
    }
}

// =============================================================================
// LEDGER
// =============================================================================

/// A recorded ledger movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalEntry {
    /// Reference.
    pub tx_ref: TransactionId,
    /// The movement.
    pub entry: LedgerEntry,
}

#[derive(Debug, Default)]
struct Accounts {
    balances: BTreeMap<UserId, Money>,
    journal: Vec<JournalEntry>,
    offline: bool,
    reject_credits: bool,
}

/// Ledger in memory. Debits never overdraw.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    accounts: Mutex<Accounts>,
}

impl MemoryLedger {
    /// Empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ledger with opening balances.
    pub fn with_balances(balances: impl IntoIterator<Item = (UserId, Money)>) -> Self {
        let ledger = Self::new();
        locked(&ledger.accounts).balances.extend(balances);
        ledger
    }

    /// Open or top up an account.
    pub fn deposit(&self, user_id: UserId, amount: Money) {
        *locked(&self.accounts).balances.entry(user_id).or_default() += amount;
    }

    /// Balance without going through the trait.
    pub fn balance_of(&self, user_id: UserId) -> Option<Money> {
        locked(&self.accounts).balances.get(&user_id).copied()
    }

    /// Sum of every balance.
    pub fn total(&self) -> Money {
        locked(&self.accounts).balances.values().sum()
    }

    /// Every recorded movement.
    pub fn journal(&self) -> Vec<JournalEntry> {
        locked(&self.accounts).journal.clone()
    }

    /// Make every call fail with a transport error.
    pub fn set_offline(&self, offline: bool) {
        locked(&self.accounts).offline = offline;
    }

    /// Make `game_win` credits fail while debits still go through.
    pub fn reject_credits(&self, reject: bool) {
        locked(&self.accounts).reject_credits = reject;
    }
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn add_transaction(&self, entry: LedgerEntry) -> Result<TransactionId, LedgerError> {
        if !entry.amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(entry.amount));
        }
        let mut accounts = locked(&self.accounts);
        if accounts.offline {
            return Err(BackendError::Transport("memory ledger offline".into()).into());
        }
        if accounts.reject_credits && entry.kind == TransactionKind::GameWin {
            return Err(BackendError::Transport("memory ledger rejected credit".into()).into());
        }
        let balance = accounts
            .balances
            .get_mut(&entry.user_id)
            .ok_or(LedgerError::UnknownAccount(entry.user_id))?;
        if entry.kind == TransactionKind::GameLoss && *balance < entry.amount {
            return Err(LedgerError::InsufficientFunds { balance: *balance, requested: entry.amount });
        }
        *balance += entry.kind.signed(entry.amount);

        let tx_ref = Uuid::new_v4();
        accounts.journal.push(JournalEntry { tx_ref, entry });
        Ok(tx_ref)
    }

    async fn balance(&self, user_id: UserId) -> Result<Money, LedgerError> {
        let accounts = locked(&self.accounts);
        if accounts.offline {
            return Err(BackendError::Transport("memory ledger offline".into()).into());
        }
        accounts
            .balances
            .get(&user_id)
            .copied()
            .ok_or(LedgerError::UnknownAccount(user_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::model::tests::forming_battle;
    use crate::battle::topology::PlayerType;

    #[tokio::test]
    async fn test_records_assign_ids() {
        let records = MemoryRecords::new();
        let battle = forming_battle(PlayerType::OneVsOne);
        let first = records.insert_battle(&battle).await.unwrap();
        let second = records.insert_battle(&battle).await.unwrap();
        assert_eq!((first, second), (1, 2));
        assert_eq!(records.stored(2).unwrap().id, 2);
    }

    #[tokio::test]
    async fn test_update_unknown_battle_affects_nothing() {
        let records = MemoryRecords::new();
        let mut battle = forming_battle(PlayerType::OneVsOne);
        battle.id = 42;
        assert_eq!(records.update_battle(&battle).await, Err(BackendError::NoRowsAffected));
    }

    #[tokio::test]
    async fn test_retired_battles_not_loaded() {
        let records = MemoryRecords::new();
        let battle = forming_battle(PlayerType::OneVsOne);
        let id = records.insert_battle(&battle).await.unwrap();
        records.insert_battle(&battle).await.unwrap();
        records.set_live(id, false).await.unwrap();

        let live = records.load_live_battles().await.unwrap();
        assert_eq!(live.len(), 1);
        assert_eq!(records.is_live(id), Some(false));
    }

    #[tokio::test]
    async fn test_ledger_moves_money() {
        let ledger = MemoryLedger::with_balances([(1, Money::from_units(10))]);
        ledger.add_transaction(LedgerEntry::debit(1, Money::from_units(4), 0, "fee")).await.unwrap();
        ledger.add_transaction(LedgerEntry::credit(1, Money::from_units(1), 0, "win")).await.unwrap();

        assert_eq!(ledger.balance(1).await.unwrap(), Money::from_units(7));
        assert_eq!(ledger.journal().len(), 2);
    }

    #[tokio::test]
    async fn test_ledger_refuses_overdraft() {
        let ledger = MemoryLedger::with_balances([(1, Money::from_units(3))]);
        let result = ledger.add_transaction(LedgerEntry::debit(1, Money::from_units(4), 0, "fee")).await;
        assert!(matches!(result, Err(LedgerError::InsufficientFunds { .. })));
        assert_eq!(ledger.balance_of(1), Some(Money::from_units(3)));
        assert!(ledger.journal().is_empty());
    }

    #[tokio::test]
    async fn test_offline_ledger_fails() {
        let ledger = MemoryLedger::with_balances([(1, Money::from_units(3))]);
        ledger.set_offline(true);
        assert!(matches!(ledger.balance(1).await, Err(LedgerError::Backend(_))));
    }

    #[tokio::test]
    async fn test_rejected_credits_leave_debits_working() {
        let ledger = MemoryLedger::with_balances([(1, Money::from_units(3))]);
        ledger.reject_credits(true);

        let credit = ledger.add_transaction(LedgerEntry::credit(1, Money::from_units(1), 0, "win")).await;
        assert!(matches!(credit, Err(LedgerError::Backend(_))));
        ledger.add_transaction(LedgerEntry::debit(1, Money::from_units(1), 0, "fee")).await.unwrap();

        assert_eq!(ledger.balance_of(1), Some(Money::from_units(2)));
        assert_eq!(ledger.journal().len(), 1);
    }
}
