//! Case and bot catalog.

pub mod cache;
pub mod case;

pub use cache::CatalogCache;
pub use case::{Bot, CaseEntry, CaseId, CaseIndex, CaseItem, CatalogError, ItemId};
