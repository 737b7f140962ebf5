use async_trait::async_trait;
use leaderboards_core::{AggregateRecord, ScoreUpdateResult, UpdateRequest};
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::AggregateStore;
use crate::domain::StoreError;

type Key = (String, String);

#[derive(Default)]
struct Tables {
    aggregates: HashMap<Key, AggregateRecord>,
    receipts: HashMap<(String, String, String), ScoreUpdateResult>,
}

/// Process-local aggregate store, conditions evaluated directly on the stored record
#[derive(Default)]
pub struct MemoryAggregateStore {
    tables: RwLock<Tables>,
}

impl MemoryAggregateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AggregateStore for MemoryAggregateStore {
    async fn update(
        &self,
        entry_id: &str,
        leaderboard: &str,
        request: &UpdateRequest,
    ) -> Result<ScoreUpdateResult, StoreError> {
        let mut tables = self.tables.write().await;

        let receipt_key = request.idempotency_key.as_ref().map(|report_id| {
            (
                entry_id.to_string(),
                leaderboard.to_string(),
                report_id.clone(),
            )
        });
        if let Some(previous) = receipt_key
            .as_ref()
            .and_then(|key| tables.receipts.get(key))
        {
            return Ok(*previous);
        }

        let key = (entry_id.to_string(), leaderboard.to_string());
        let stored = tables.aggregates.get(&key);

        let result = if request.is_allowed(stored) {
            let updated = request.apply_to(stored);
            let result = ScoreUpdateResult {
                new_score: updated.score,
                applied: true,
                update_counter: updated.update_counter,
            };
            tables.aggregates.insert(key, updated);
            result
        } else {
            ScoreUpdateResult {
                new_score: stored.map_or(0.0, |r| r.score),
                applied: false,
                update_counter: stored.map_or(0, |r| r.update_counter),
            }
        };

        if let Some(receipt_key) = receipt_key {
            tables.receipts.insert(receipt_key, result);
        }
        Ok(result)
    }

    async fn get(
        &self,
        entry_id: &str,
        leaderboard: &str,
    ) -> Result<Option<AggregateRecord>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .aggregates
            .get(&(entry_id.to_string(), leaderboard.to_string()))
            .cloned())
    }

    async fn prune_receipts(&self, leaderboard: &str, current: &str) -> Result<u64, StoreError> {
        let prefix = format!("{}::", leaderboard);
        let mut tables = self.tables.write().await;
        let before = tables.receipts.len();
        tables
            .receipts
            .retain(|(_, name, _), _| name == current || !name.starts_with(&prefix));
        Ok((before - tables.receipts.len()) as u64)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leaderboards_core::{update_request, AggregationPolicy};
    use maplit::hashmap;

    #[tokio::test]
    async fn test_sum_accumulates_counter() {
        let store = MemoryAggregateStore::new();
        for value in [1.0, 2.0, 3.5] {
            let request = update_request(AggregationPolicy::Sum, value, None, None);
            store.update("a", "lb::1", &request).await.unwrap();
        }

        let record = store.get("a", "lb::1").await.unwrap().unwrap();
        assert_eq!(record.score, 6.5);
        assert_eq!(record.update_counter, 3);
    }

    #[tokio::test]
    async fn test_rejected_update_reports_stored_values() {
        let store = MemoryAggregateStore::new();
        let pt = hashmap! { "country".to_string() => "PT".to_string() };
        let uk = hashmap! { "country".to_string() => "UK".to_string() };

        let first = update_request(AggregationPolicy::Max, 10.0, Some(&pt), None);
        store.update("a", "lb::1", &first).await.unwrap();

        let second = update_request(AggregationPolicy::Max, 50.0, Some(&uk), None);
        let result = store.update("a", "lb::1", &second).await.unwrap();
        assert!(!result.applied);
        assert_eq!(result.new_score, 10.0);
        assert_eq!(result.update_counter, 1);
    }

    #[tokio::test]
    async fn test_prune_drops_receipts_of_other_epochs() {
        let store = MemoryAggregateStore::new();
        for (leaderboard, report_id) in [("lb::1", "r-1"), ("lb::2", "r-2"), ("lb2::1", "r-3")] {
            let request = update_request(AggregationPolicy::Sum, 1.0, None, Some(report_id.into()));
            store.update("a", leaderboard, &request).await.unwrap();
        }

        assert_eq!(store.prune_receipts("lb", "lb::2").await.unwrap(), 1);
        assert_eq!(store.prune_receipts("lb", "lb::2").await.unwrap(), 0);

        // the pruned receipt no longer short-circuits a replay
        let replay = update_request(AggregationPolicy::Sum, 1.0, None, Some("r-1".into()));
        assert_eq!(store.update("a", "lb::1", &replay).await.unwrap().new_score, 2.0);
        let replay = update_request(AggregationPolicy::Sum, 1.0, None, Some("r-2".into()));
        assert_eq!(store.update("a", "lb::2", &replay).await.unwrap().new_score, 1.0);
    }

    #[tokio::test]
    async fn test_replayed_report_is_not_reapplied() {
        let store = MemoryAggregateStore::new();
        let request = update_request(AggregationPolicy::Sum, 5.0, None, Some("r-1".into()));

        let first = store.update("a", "lb::1", &request).await.unwrap();
        let replay = store.update("a", "lb::1", &request).await.unwrap();
        assert_eq!(first, replay);

        let record = store.get("a", "lb::1").await.unwrap().unwrap();
        assert_eq!(record.score, 5.0);
        assert_eq!(record.update_counter, 1);
    }
}
