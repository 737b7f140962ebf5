mod memory;
mod sqlite;

pub use memory::*;
pub use sqlite::*;

use async_trait::async_trait;
use leaderboards_core::{ScoreboardEntry, ScoreboardListing};
use std::{sync::Arc, time::Duration};

use super::{with_deadline, Error, StoreError};

/// Sorted view of scores per scoreboard name, highest first.
///
/// Equal scores are ordered by entry id, descending. Ranks are 1-based.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Scoreboard: Send + Sync {
    /// Set the entry's score, replacing any previous one
    async fn upsert(&self, name: &str, entry_id: &str, score: f64) -> Result<(), StoreError>;

    /// At most `n` entries from the top
    async fn top(&self, name: &str, n: usize) -> Result<Vec<ScoreboardEntry>, StoreError>;

    async fn rank_of(&self, name: &str, entry_id: &str) -> Result<Option<u64>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// [`Scoreboard`] calls under the store deadline
#[derive(Clone)]
pub struct RankedScoreboard {
    store: Arc<dyn Scoreboard>,
    timeout: Duration,
}

impl RankedScoreboard {
    pub fn new(store: Arc<dyn Scoreboard>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn add_score(&self, name: &str, entry_id: &str, score: f64) -> Result<(), Error> {
        with_deadline(self.timeout, self.store.upsert(name, entry_id, score)).await
    }

    pub async fn listing(&self, name: &str, n: usize) -> Result<ScoreboardListing, Error> {
        let scores = with_deadline(self.timeout, self.store.top(name, n)).await?;
        Ok(ScoreboardListing {
            name: name.to_string(),
            scores,
        })
    }

    pub async fn rank(&self, name: &str, entry_id: &str) -> Result<Option<u64>, Error> {
        with_deadline(self.timeout, self.store.rank_of(name, entry_id)).await
    }

    pub async fn ping(&self) -> Result<(), Error> {
        with_deadline(self.timeout, self.store.ping()).await
    }
}

/// Order used by every backend: score descending, then entry id descending
pub(crate) fn rank_order(a: &(String, f64), b: &(String, f64)) -> std::cmp::Ordering {
    b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_listing_is_named_after_scoreboard() {
        let mut store = MockScoreboard::new();
        store.expect_top().returning(|_, _| {
            Ok(vec![ScoreboardEntry {
                entry_id: String::from("b"),
                score: 15.0,
                rank: 1,
            }])
        });

        let scoreboard = RankedScoreboard::new(Arc::new(store), Duration::from_secs(1));
        let listing = scoreboard.listing("race::3", 10).await.unwrap();
        assert_eq!(listing.name, "race::3");
        assert_eq!(listing.scores.len(), 1);
    }

    #[test]
    fn test_rank_order_breaks_ties_by_entry_id() {
        let mut entries = vec![
            (String::from("a"), 10.0),
            (String::from("c"), 15.0),
            (String::from("b"), 10.0),
        ];
        entries.sort_by(rank_order);
        let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["c", "b", "a"]);
    }
}
