//! Query Boundary
//!
//! The relational store sits behind a remote query service. The engine
//! builds the query text; the executor ships it and returns a generic
//! result envelope.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::money::Money;

use super::BackendError;

/// One result row, column name to value.
pub type Row = serde_json::Map<String, Value>;

/// Outcome flag reported by the query service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryStatus {
    /// Query succeeded.
    Ok,
    /// Query failed; see `error`.
    Error,
}

/// Result envelope from the query service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Outcome.
    pub status: QueryStatus,
    /// Row count for selects.
    #[serde(default)]
    pub count: u64,
    /// Selected rows.
    #[serde(default)]
    pub rows: Vec<Row>,
    /// Rows touched by writes.
    #[serde(default)]
    pub rows_affected: u64,
    /// Auto-increment ID from inserts.
    #[serde(default)]
    pub inserted_id: i64,
    /// Failure description.
    #[serde(default)]
    pub error: Option<String>,
}

impl QueryResult {
    /// Successful write touching `rows_affected` rows.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            status: QueryStatus::Ok,
            count: 0,
            rows: Vec::new(),
            rows_affected,
            inserted_id: 0,
            error: None,
        }
    }

    /// Successful insert.
    pub fn inserted(id: i64) -> Self {
        Self { inserted_id: id, ..Self::affected(1) }
    }

    /// Successful select.
    pub fn with_rows(rows: Vec<Row>) -> Self {
        Self { count: rows.len() as u64, rows, ..Self::affected(0) }
    }

    /// Failed query.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: QueryStatus::Error,
            error: Some(message.into()),
            ..Self::affected(0)
        }
    }

    /// Turn a non-ok status into an error.
    pub fn into_checked(self) -> Result<Self, BackendError> {
        match self.status {
            QueryStatus::Ok => Ok(self),
            QueryStatus::Error => Err(BackendError::Rejected(
                self.error.unwrap_or_else(|| "unknown query error".into()),
            )),
        }
    }
}

/// Remote query execution.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Run one query.
    async fn execute(&self, query: &str) -> Result<QueryResult, BackendError>;
}

/// Run a query with a deadline and reject non-ok results.
pub async fn execute_checked(
    executor: &dyn QueryExecutor,
    query: &str,
    limit: Duration,
) -> Result<QueryResult, BackendError> {
    match tokio::time::timeout(limit, executor.execute(query)).await {
        Ok(result) => result?.into_checked(),
        Err(_) => Err(BackendError::Timeout(limit)),
    }
}

/// Quote a string literal for the query text.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
}

// =============================================================================
// ROW ACCESS
// =============================================================================

fn column<'a>(row: &'a Row, key: &str) -> Result<&'a Value, BackendError> {
    row.get(key)
        .ok_or_else(|| BackendError::MalformedRow(format!("missing column {key:?}")))
}

/// Integer column; numeric strings are accepted.
pub fn row_i64(row: &Row, key: &str) -> Result<i64, BackendError> {
    let value = column(row, key)?;
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
        .ok_or_else(|| BackendError::MalformedRow(format!("column {key:?} is not an integer: {value}")))
}

/// Unsigned 32-bit column.
pub fn row_u32(row: &Row, key: &str) -> Result<u32, BackendError> {
    let raw = row_i64(row, key)?;
    u32::try_from(raw)
        .map_err(|_| BackendError::MalformedRow(format!("column {key:?} out of range: {raw}")))
}

/// Text column.
pub fn row_string(row: &Row, key: &str) -> Result<String, BackendError> {
    match column(row, key)? {
        Value::String(s) => Ok(s.clone()),
        other => Err(BackendError::MalformedRow(format!("column {key:?} is not text: {other}"))),
    }
}

/// Optional text column; missing or null is `None`.
pub fn row_opt_string(row: &Row, key: &str) -> Option<String> {
    row.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Money column; decimal strings or numbers.
pub fn row_money(row: &Row, key: &str) -> Result<Money, BackendError> {
    let value = column(row, key)?;
    let parsed = match value {
        Value::String(s) => Money::parse(s),
        Value::Number(n) => match n.as_i64() {
            Some(units) => Ok(Money::from_units(units)),
            None => Money::from_decimal(n.as_f64().unwrap_or(f64::NAN)),
        },
        other => {
            return Err(BackendError::MalformedRow(format!("column {key:?} is not an amount: {other}")))
        }
    };
    parsed.map_err(|e| BackendError::MalformedRow(format!("column {key:?}: {e}")))
}
