//! Case and Bot Definitions
//!
//! A case owns a list of items whose inclusive roll ranges must tile
//! `[0, ROLL_MAX]` exactly once.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::money::Money;
use crate::fairness::draw::ROLL_MAX;

/// Case identifier.
pub type CaseId = i64;

/// Item identifier.
pub type ItemId = i64;

/// All known cases, keyed by ID.
pub type CaseIndex = BTreeMap<CaseId, CaseEntry>;

/// A prize that can drop from a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseItem {
    /// Item ID.
    pub id: ItemId,
    /// Display name.
    pub name: String,
    /// Market price.
    pub price: Money,
    /// Lowest roll (inclusive) that drops this item.
    pub min_rand: u32,
    /// Highest roll (inclusive) that drops this item.
    pub max_rand: u32,
    /// Optional image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl CaseItem {
    /// Does `roll` land on this item?
    #[inline]
    pub fn covers(&self, roll: u32) -> bool {
        self.min_rand <= roll && roll <= self.max_rand
    }
}

/// A purchasable case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseEntry {
    /// Case ID.
    pub id: CaseId,
    /// Display name.
    pub name: String,
    /// Price to open once.
    pub price: Money,
    /// Optional image URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Droppable items, ordered by `min_rand`.
    pub items: Vec<CaseItem>,
}

impl CaseEntry {
    /// Check that the item ranges partition `[0, ROLL_MAX]`.
    ///
    /// Expects items ordered by `min_rand` (see [`CaseEntry::sort_items`]).
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.items.is_empty() {
            return Err(CatalogError::EmptyCase { case_id: self.id });
        }

        let mut expected_min: u64 = 0;
        for item in &self.items {
            if item.min_rand > item.max_rand {
                return Err(CatalogError::InvertedRange {
                    case_id: self.id,
                    item_id: item.id,
                });
            }
            let min = u64::from(item.min_rand);
            if min > expected_min {
                return Err(CatalogError::Gap {
                    case_id: self.id,
                    from: expected_min,
                    to: min - 1,
                });
            }
            if min < expected_min {
                return Err(CatalogError::Overlap {
                    case_id: self.id,
                    item_id: item.id,
                });
            }
            expected_min = u64::from(item.max_rand) + 1;
        }

        if expected_min != u64::from(ROLL_MAX) + 1 {
            return Err(CatalogError::Uncovered {
                case_id: self.id,
                last: expected_min.saturating_sub(1),
            });
        }
        Ok(())
    }

    /// Order items by their range start.
    pub fn sort_items(&mut self) {
        self.items.sort_by_key(|item| (item.min_rand, item.id));
    }

    /// Look up an item by ID.
    pub fn item(&self, id: ItemId) -> Option<&CaseItem> {
        self.items.iter().find(|item| item.id == id)
    }
}

/// A house-controlled participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bot {
    /// Bot ID.
    pub id: i64,
    /// Display name.
    pub name: String,
    /// Optional avatar URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

/// Catalog integrity errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CatalogError {
    /// Case has no items.
    #[error("case {case_id} has no items")]
    EmptyCase {
        /// Case ID.
        case_id: CaseId,
    },
    /// An item's range is inverted.
    #[error("case {case_id} item {item_id} has min_rand > max_rand")]
    InvertedRange {
        /// Case ID.
        case_id: CaseId,
        /// Item ID.
        item_id: ItemId,
    },
    /// Rolls in `[from, to]` drop nothing.
    #[error("case {case_id} has no item for rolls {from}..={to}")]
    Gap {
        /// Case ID.
        case_id: CaseId,
        /// First uncovered roll.
        from: u64,
        /// Last uncovered roll.
        to: u64,
    },
    /// Two items claim the same roll.
    #[error("case {case_id} item {item_id} overlaps the previous item")]
    Overlap {
        /// Case ID.
        case_id: CaseId,
        /// Item ID.
        item_id: ItemId,
    },
    /// Ranges stop short of `ROLL_MAX`.
    #[error("case {case_id} ranges end at {last}")]
    Uncovered {
        /// Case ID.
        case_id: CaseId,
        /// Last covered roll.
        last: u64,
    },
}

// =============================================================================
// TESTS
// =============================================================================
