//! Balance Ledger
//!
//! Battles move money only through two transaction kinds: `game_loss`
//! (entry fee) and `game_win` (payouts and refunds). Callers always pass a
//! positive amount; the kind decides the sign.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::battle::model::{BattleId, UserId};
use crate::core::money::Money;

use super::query::{execute_checked, quote, row_money, QueryExecutor, QueryResult};
use super::BackendError;

/// Ledger transaction reference.
pub type TransactionId = Uuid;

/// Transaction kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Debit.
    GameLoss,
    /// Credit.
    GameWin,
}

impl TransactionKind {
    /// Wire name.
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionKind::GameLoss => "game_loss",
            TransactionKind::GameWin => "game_win",
        }
    }

    /// Balance delta for a positive `amount`.
    pub fn signed(self, amount: Money) -> Money {
        match self {
            TransactionKind::GameLoss => -amount,
            TransactionKind::GameWin => amount,
        }
    }
}

/// One balance movement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Account.
    pub user_id: UserId,
    /// Debit or credit.
    pub kind: TransactionKind,
    /// Positive amount.
    pub amount: Money,
    /// Battle this belongs to (0 before the battle has an ID).
    pub battle_id: BattleId,
    /// Free text for statements.
    pub description: String,
}

impl LedgerEntry {
    /// Entry-fee debit.
    pub fn debit(user_id: UserId, amount: Money, battle_id: BattleId, description: impl Into<String>) -> Self {
        Self {
            user_id,
            kind: TransactionKind::GameLoss,
            amount,
            battle_id,
            description: description.into(),
        }
    }

    /// Payout or refund credit.
    pub fn credit(user_id: UserId, amount: Money, battle_id: BattleId, description: impl Into<String>) -> Self {
        Self {
            user_id,
            kind: TransactionKind::GameWin,
            amount,
            battle_id,
            description: description.into(),
        }
    }
}

/// Ledger failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Amount was zero or negative.
    #[error("ledger amount must be positive, got {0}")]
    NonPositiveAmount(Money),
    /// Debit exceeds the balance.
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Current balance.
        balance: Money,
        /// Attempted debit.
        requested: Money,
    },
    /// No such account.
    #[error("unknown account {0}")]
    UnknownAccount(UserId),
    /// Store failure.
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Balance ledger.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record a movement and apply it to the balance.
    async fn add_transaction(&self, entry: LedgerEntry) -> Result<TransactionId, LedgerError>;

    /// Current balance.
    async fn balance(&self, user_id: UserId) -> Result<Money, LedgerError>;
}

/// Ledger kept in the `credit_transactions` and `users` tables.
pub struct SqlLedger {
    executor: Arc<dyn QueryExecutor>,
    timeout: Duration,
}

impl SqlLedger {
    /// Wrap an executor; each call gets `timeout`.
    pub fn new(executor: Arc<dyn QueryExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    async fn run(&self, query: &str) -> Result<QueryResult, BackendError> {
        execute_checked(self.executor.as_ref(), query, self.timeout).await
    }
}

#[async_trait]
impl Ledger for SqlLedger {
    async fn add_transaction(&self, entry: LedgerEntry) -> Result<TransactionId, LedgerError> {
        if !entry.amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount(entry.amount));
        }
        let tx_ref = Uuid::new_v4();
        let delta = entry.kind.signed(entry.amount);

        // Debits only apply while the balance covers them.
        let guard = match entry.kind {
            TransactionKind::GameLoss => format!(" AND balance >= {}", entry.amount),
            TransactionKind::GameWin => String::new(),
        };
        let updated = match self
            .run(&format!(
                "UPDATE users SET balance = balance + {} WHERE id = {}{}",
                delta, entry.user_id, guard
            ))
            .await
        {
            Ok(result) => result.rows_affected,
            Err(BackendError::NoRowsAffected) => 0,
            Err(e) => return Err(e.into()),
        };
        if updated == 0 {
            return Err(match entry.kind {
                TransactionKind::GameLoss => match self.balance(entry.user_id).await {
                    Ok(balance) => LedgerError::InsufficientFunds { balance, requested: entry.amount },
                    Err(e) => e,
                },
                TransactionKind::GameWin => LedgerError::UnknownAccount(entry.user_id),
            });
        }

        let recorded = self
            .run(&format!(
                "INSERT INTO credit_transactions (user_id, type, amount, created_by, tx_ref, ref_id, description) \
                 VALUES ({}, {}, {}, {}, {}, {}, {})",
                entry.user_id,
                quote(entry.kind.as_str()),
                delta,
                entry.user_id,
                quote(&tx_ref.to_string()),
                entry.battle_id,
                quote(&entry.description),
            ))
            .await;
        if let Err(e) = recorded {
            let undo = format!("UPDATE users SET balance = balance + {} WHERE id = {}", -delta, entry.user_id);
            if let Err(undo_err) = self.run(&undo).await {
                error!(
                    "Balance of user {} moved by {} without a transaction row: {}",
                    entry.user_id, delta, undo_err
                );
            }
            return Err(e.into());
        }
        Ok(tx_ref)
    }

    async fn balance(&self, user_id: UserId) -> Result<Money, LedgerError> {
        let result = self
            .run(&format!("SELECT balance AS balance FROM users WHERE id = {user_id} LIMIT 1"))
            .await?;
        let row = result.rows.first().ok_or(LedgerError::UnknownAccount(user_id))?;
        Ok(row_money(row, "balance")?)
    }
}
