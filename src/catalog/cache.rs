//! Catalog Cache
//!
//! Cases and bots are read once from the store and then served from
//! memory. Each load builds the complete structure first and publishes it
//! in one swap, so readers see either nothing or a full catalog.

use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::backend::records::CatalogRecords;
use crate::backend::BackendError;

use super::case::{Bot, CaseEntry, CaseId, CaseIndex};

/// Lazily loaded cases and bots.
pub struct CatalogCache {
    records: Arc<dyn CatalogRecords>,
    cases: RwLock<Option<Arc<CaseIndex>>>,
    bots: RwLock<Option<Arc<Vec<Bot>>>>,
}

impl CatalogCache {
    /// Empty cache over `records`.
    pub fn new(records: Arc<dyn CatalogRecords>) -> Self {
        Self {
            records,
            cases: RwLock::new(None),
            bots: RwLock::new(None),
        }
    }

    /// All valid cases, loading on first use.
    pub async fn cases(&self) -> Result<Arc<CaseIndex>, BackendError> {
        if let Some(cases) = self.cases.read().await.as_ref() {
            return Ok(Arc::clone(cases));
        }
        self.refresh_cases().await
    }

    /// One case by ID.
    pub async fn case(&self, id: CaseId) -> Result<Option<CaseEntry>, BackendError> {
        Ok(self.cases().await?.get(&id).cloned())
    }

    /// Reload cases from the store.
    ///
    /// Cases whose item ranges do not tile the roll space are left out.
    pub async fn refresh_cases(&self) -> Result<Arc<CaseIndex>, BackendError> {
        let loaded = self.records.load_cases().await?;
        let total = loaded.len();

        let mut index = CaseIndex::new();
        for mut case in loaded {
            case.sort_items();
            match case.validate() {
                Ok(()) => {
                    index.insert(case.id, case);
                }
                Err(e) => error!("Excluding case {} from catalog: {}", case.id, e),
            }
        }

        info!("Catalog loaded {} of {} cases", index.len(), total);
        let published = Arc::new(index);
        *self.cases.write().await = Some(Arc::clone(&published));
        Ok(published)
    }

    /// Bot roster, loading on first use.
    pub async fn bots(&self) -> Result<Arc<Vec<Bot>>, BackendError> {
        if let Some(bots) = self.bots.read().await.as_ref() {
            return Ok(Arc::clone(bots));
        }
        self.refresh_bots().await
    }

    /// Reload the bot roster.
    pub async fn refresh_bots(&self) -> Result<Arc<Vec<Bot>>, BackendError> {
        let published = Arc::new(self.records.load_bots().await?);
        info!("Catalog loaded {} bots", published.len());
        *self.bots.write().await = Some(Arc::clone(&published));
        Ok(published)
    }

    /// Random bot whose ID is not in `seated`.
    pub async fn pick_bot(&self, seated: &[i64]) -> Result<Option<Bot>, BackendError> {
        let bots = self.bots().await?;
        let free: Vec<&Bot> = bots.iter().filter(|bot| !seated.contains(&bot.id)).collect();
        let picked = free.choose(&mut rand::thread_rng()).map(|bot| (*bot).clone());
        Ok(picked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryRecords;
    use crate::catalog::case::tests::{case_with, item, single_item_case};

    fn bots() -> Vec<Bot> {
        (1..=3)
            .map(|id| Bot { id, name: format!("bot-{id}"), avatar: None })
            .collect()
    }

    fn cache_over(records: &Arc<MemoryRecords>) -> CatalogCache {
        CatalogCache::new(records.clone())
    }

    #[tokio::test]
    async fn test_loads_once_then_serves_from_memory() {
        let records = Arc::new(MemoryRecords::with_catalog(vec![single_item_case(1, 100, 100)], bots()));
        let cache = cache_over(&records);

        assert_eq!(cache.cases().await.unwrap().len(), 1);
        assert_eq!(cache.cases().await.unwrap().len(), 1);
        assert!(cache.case(1).await.unwrap().is_some());
        assert!(cache.case(2).await.unwrap().is_none());
        assert_eq!(records.case_loads(), 1);
    }

    #[tokio::test]
    async fn test_refresh_reloads() {
        let records = Arc::new(MemoryRecords::with_catalog(vec![single_item_case(1, 100, 100)], vec![]));
        let cache = cache_over(&records);
        cache.cases().await.unwrap();
        cache.refresh_cases().await.unwrap();
        assert_eq!(records.case_loads(), 2);
    }

    #[tokio::test]
    async fn test_invalid_cases_excluded() {
        let broken = case_with(2, 100, vec![item(1, 10, 0, 10)]);
        let records = Arc::new(MemoryRecords::with_catalog(vec![single_item_case(1, 100, 100), broken], vec![]));
        let cases = cache_over(&records).cases().await.unwrap();
        assert!(cases.contains_key(&1));
        assert!(!cases.contains_key(&2));
    }

    #[tokio::test]
    async fn test_items_sorted_on_load() {
        let shuffled = case_with(3, 100, vec![item(2, 10, 500_001, 1_000_000), item(1, 10, 0, 500_000)]);
        let records = Arc::new(MemoryRecords::with_catalog(vec![shuffled], vec![]));
        let case = cache_over(&records).case(3).await.unwrap().unwrap();
        assert_eq!(case.items[0].id, 1);
    }

    #[tokio::test]
    async fn test_failed_load_publishes_nothing() {
        let records = Arc::new(MemoryRecords::with_catalog(vec![single_item_case(1, 100, 100)], vec![]));
        records.set_offline(true);
        let cache = cache_over(&records);
        assert!(cache.cases().await.is_err());

        records.set_offline(false);
        assert_eq!(cache.cases().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pick_bot_skips_seated() {
        let records = Arc::new(MemoryRecords::with_catalog(vec![], bots()));
        let cache = cache_over(&records);

        for _ in 0..20 {
            let bot = cache.pick_bot(&[1, 2]).await.unwrap().unwrap();
            assert_eq!(bot.id, 3);
        }
        assert!(cache.pick_bot(&[1, 2, 3]).await.unwrap().is_none());
    }
}
