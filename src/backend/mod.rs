//! External Collaborators
//!
//! Everything that leaves the process: battle records, the case catalog
//! and the balance ledger. Each concern is a trait with a query-building
//! implementation for the remote store and an in-process one for demos
//! and tests.

pub mod ledger;
pub mod memory;
pub mod query;
pub mod records;

use std::time::Duration;

pub use ledger::{Ledger, LedgerEntry, LedgerError, SqlLedger, TransactionKind};
pub use memory::{MemoryLedger, MemoryRecords};
pub use query::{QueryExecutor, QueryResult, QueryStatus};
pub use records::{BattleRecords, CatalogRecords, SqlRecords};

/// Failures talking to the persistent store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BackendError {
    /// Call exceeded its deadline.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
    /// Transport-level failure.
    #[error("backend unavailable: {0}")]
    Transport(String),
    /// Store rejected the query.
    #[error("query rejected: {0}")]
    Rejected(String),
    /// A write matched no rows.
    #[error("write affected no rows")]
    NoRowsAffected,
    /// Insert returned no ID.
    #[error("insert returned no id")]
    MissingInsertId,
    /// Row shape was not what we expect.
    #[error("malformed row: {0}")]
    MalformedRow(String),
    /// Could not encode a record.
    #[error("encoding failed: {0}")]
    Encoding(String),
}
