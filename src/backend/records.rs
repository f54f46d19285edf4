//! Battle and Catalog Records
//!
//! Persistence contracts used by the battle store and the catalog cache,
//! plus the implementation that speaks to the remote query service.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::battle::model::{Battle, BattleId};
use crate::catalog::case::{Bot, CaseEntry, CaseId, CaseItem};

use super::query::{
    execute_checked, quote, row_i64, row_money, row_opt_string, row_string, row_u32,
    QueryExecutor, QueryResult,
};
use super::BackendError;

/// Durable battle snapshots.
#[async_trait]
pub trait BattleRecords: Send + Sync {
    /// Store a new battle; returns its ID.
    async fn insert_battle(&self, battle: &Battle) -> Result<BattleId, BackendError>;

    /// Overwrite the snapshot for `battle.id`. Zero rows is an error.
    async fn update_battle(&self, battle: &Battle) -> Result<(), BackendError>;

    /// Flag a battle as live or retired.
    async fn set_live(&self, id: BattleId, live: bool) -> Result<(), BackendError>;

    /// All battles still flagged live.
    async fn load_live_battles(&self) -> Result<Vec<Battle>, BackendError>;
}

/// Case and bot definitions.
#[async_trait]
pub trait CatalogRecords: Send + Sync {
    /// Every case with its items.
    async fn load_cases(&self) -> Result<Vec<CaseEntry>, BackendError>;

    /// Bot roster.
    async fn load_bots(&self) -> Result<Vec<Bot>, BackendError>;
}

/// Records stored through a [`QueryExecutor`].
pub struct SqlRecords {
    executor: Arc<dyn QueryExecutor>,
    timeout: Duration,
}

impl SqlRecords {
    /// Wrap an executor; each call gets `timeout`.
    pub fn new(executor: Arc<dyn QueryExecutor>, timeout: Duration) -> Self {
        Self { executor, timeout }
    }

    async fn run(&self, query: &str) -> Result<QueryResult, BackendError> {
        debug!("query: {:.120}", query);
        execute_checked(self.executor.as_ref(), query, self.timeout).await
    }
}

fn encode(battle: &Battle) -> Result<String, BackendError> {
    serde_json::to_string(battle).map_err(|e| BackendError::Encoding(e.to_string()))
}

fn decode_battle(value: &Value) -> Result<Battle, BackendError> {
    let parsed = match value {
        Value::String(text) => serde_json::from_str(text),
        other => serde_json::from_value(other.clone()),
    };
    parsed.map_err(|e| BackendError::MalformedRow(format!("battle column: {e}")))
}

#[async_trait]
impl BattleRecords for SqlRecords {
    async fn insert_battle(&self, battle: &Battle) -> Result<BattleId, BackendError> {
        let query = format!(
            "INSERT INTO g1_battles (server_seed, server_seed_hash, battle) VALUES ({}, {}, {})",
            quote(&battle.fair.server_seed),
            quote(&battle.fair.server_seed_hash),
            quote(&encode(battle)?),
        );
        let result = self.run(&query).await?;
        if result.inserted_id <= 0 {
            return Err(BackendError::MissingInsertId);
        }
        Ok(result.inserted_id)
    }

    async fn update_battle(&self, battle: &Battle) -> Result<(), BackendError> {
        let query = format!(
            "UPDATE g1_battles SET battle = {} WHERE id = {}",
            quote(&encode(battle)?),
            battle.id,
        );
        let result = self.run(&query).await?;
        if result.rows_affected == 0 {
            return Err(BackendError::NoRowsAffected);
        }
        Ok(())
    }

    async fn set_live(&self, id: BattleId, live: bool) -> Result<(), BackendError> {
        let query = format!("UPDATE g1_battles SET is_live = {} WHERE id = {}", u8::from(live), id);
        let result = self.run(&query).await?;
        if result.rows_affected == 0 {
            return Err(BackendError::NoRowsAffected);
        }
        Ok(())
    }

    async fn load_live_battles(&self) -> Result<Vec<Battle>, BackendError> {
        let result = self.run("SELECT id, battle FROM g1_battles WHERE is_live = 1").await?;
        result
            .rows
            .iter()
            .map(|row| {
                let column = row
                    .get("battle")
                    .ok_or_else(|| BackendError::MalformedRow("missing column \"battle\"".into()))?;
                decode_battle(column)
            })
            .collect()
    }
}

#[async_trait]
impl CatalogRecords for SqlRecords {
    async fn load_cases(&self) -> Result<Vec<CaseEntry>, BackendError> {
        let case_rows = self.run("SELECT * FROM cases").await?.rows;
        let item_rows = self.run("SELECT * FROM case_items").await?.rows;

        let mut items: BTreeMap<CaseId, Vec<CaseItem>> = BTreeMap::new();
        for row in &item_rows {
            items.entry(row_i64(row, "case_id")?).or_default().push(CaseItem {
                id: row_i64(row, "id")?,
                name: row_string(row, "name")?,
                price: row_money(row, "price")?,
                min_rand: row_u32(row, "min_rand")?,
                max_rand: row_u32(row, "max_rand")?,
                image: row_opt_string(row, "image"),
            });
        }

        case_rows
            .iter()
            .map(|row| {
                let id = row_i64(row, "id")?;
                Ok(CaseEntry {
                    id,
                    name: row_string(row, "name")?,
                    price: row_money(row, "price")?,
                    image: row_opt_string(row, "image"),
                    items: items.remove(&id).unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn load_bots(&self) -> Result<Vec<Bot>, BackendError> {
        let result = self.run("SELECT * FROM bots").await?;
        result
            .rows
            .iter()
            .map(|row| {
                Ok(Bot {
                    id: row_i64(row, "id")?,
                    name: row_string(row, "name")?,
                    avatar: row_opt_string(row, "avatar"),
                })
            })
            .collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================
