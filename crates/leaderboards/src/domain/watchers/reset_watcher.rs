use async_trait::async_trait;
use leaderboards_core::epoch_name;
use log::{debug, info};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
};
use time::OffsetDateTime;

use super::RecurringTask;
use crate::domain::{LeaderboardConfigProvider, ScoreAggregator};

/// A leaderboard that moved to a new epoch since the previous check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollover {
    pub leaderboard: String,
    pub from_epoch: i64,
    pub to_epoch: i64,
    pub next_reset: Option<OffsetDateTime>,
}

/// Tracks the current epoch of every configured leaderboard and reports rollovers.
///
/// Finished epochs stay queryable through the results endpoint; prize tables are left to
/// downstream consumers. Idempotency receipts are only kept for the current epoch: they are
/// pruned for every leaderboard on the first sweep and for each leaderboard that rolls over
/// after that.
pub struct ResetWatcher {
    provider: Arc<dyn LeaderboardConfigProvider>,
    aggregator: ScoreAggregator,
    observed: Mutex<HashMap<String, i64>>,
    primed: AtomicBool,
}

impl ResetWatcher {
    pub fn new(provider: Arc<dyn LeaderboardConfigProvider>, aggregator: ScoreAggregator) -> Self {
        Self {
            provider,
            aggregator,
            observed: Mutex::new(HashMap::new()),
            primed: AtomicBool::new(false),
        }
    }

    /// [`Self::check`] followed by receipt pruning
    pub async fn sweep(&self, now: OffsetDateTime) -> Result<Vec<Rollover>, anyhow::Error> {
        let rollovers = self.check(now)?;
        let primed = self.primed.load(Ordering::SeqCst);
        let current: Vec<(String, i64)> = if primed {
            rollovers
                .iter()
                .map(|rollover| (rollover.leaderboard.clone(), rollover.to_epoch))
                .collect()
        } else {
            self.provider
                .provide()?
                .leaderboards()
                .into_iter()
                .map(|leaderboard| {
                    (
                        leaderboard.name().to_lowercase(),
                        leaderboard.schedule.epoch(now),
                    )
                })
                .collect()
        };

        for (leaderboard, epoch) in current {
            let pruned = self
                .aggregator
                .prune_receipts(&leaderboard, &epoch_name(&leaderboard, epoch))
                .await?;
            if pruned > 0 {
                info!("pruned {} receipts of finished {} epochs", pruned, leaderboard);
            }
        }
        self.primed.store(true, Ordering::SeqCst);
        Ok(rollovers)
    }

    pub fn check(&self, now: OffsetDateTime) -> Result<Vec<Rollover>, anyhow::Error> {
        let snapshot = self.provider.provide()?;
        let mut observed = self.observed.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rollovers = vec![];

        for leaderboard in snapshot.leaderboards() {
            let key = leaderboard.name().to_lowercase();
            let epoch = leaderboard.schedule.epoch(now);

            match observed.insert(key.clone(), epoch) {
                Some(previous) if previous != epoch => rollovers.push(Rollover {
                    leaderboard: key,
                    from_epoch: previous,
                    to_epoch: epoch,
                    next_reset: leaderboard.schedule.next(now),
                }),
                Some(_) => {}
                None => debug!(
                    "tracking leaderboard {} at epoch {}, next reset {:?}, {}",
                    key,
                    epoch,
                    leaderboard.schedule.next_unix(now),
                    leaderboard
                        .schedule
                        .interval()
                        .map_or_else(|| String::from("calendar cadence"), |secs| format!("every {}s", secs))
                ),
            }
        }

        observed.retain(|name, _| snapshot.get(name).is_some());
        Ok(rollovers)
    }
}

#[async_trait]
impl RecurringTask for ResetWatcher {
    fn name(&self) -> &'static str {
        "reset_watcher"
    }

    async fn run_once(&self) -> Result<(), anyhow::Error> {
        for rollover in self.sweep(OffsetDateTime::now_utc()).await? {
            info!(
                "leaderboard {} rolled over from epoch {} to {}, next reset at {}",
                rollover.leaderboard,
                rollover.from_epoch,
                rollover.to_epoch,
                rollover
                    .next_reset
                    .map_or_else(|| String::from("manual"), |next| next.to_string())
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MemoryAggregateStore, MemoryConfigSource, Report, SnapshotProvider};
    use leaderboards_core::{AggregationPolicy, LeaderboardConfig, ResetSchedule};
    use std::time::Duration;
    use time::macros::datetime;

    fn aggregator() -> ScoreAggregator {
        ScoreAggregator::new(Arc::new(MemoryAggregateStore::new()), Duration::from_secs(1))
    }

    async fn hourly_provider() -> Arc<SnapshotProvider> {
        let source = MemoryConfigSource::new(vec![LeaderboardConfig {
            name: "Hourly-Race".into(),
            policy: AggregationPolicy::Sum,
            reset: ResetSchedule::Hourly,
            prizes: Default::default(),
            segments: vec![],
        }]);
        let provider = Arc::new(SnapshotProvider::new(Arc::new(source), Duration::from_secs(1)));
        provider.refresh().await.unwrap();
        provider
    }

    #[tokio::test]
    async fn test_reports_rollover_once() {
        let watcher = ResetWatcher::new(hourly_provider().await, aggregator());

        assert!(watcher.check(datetime!(2024-07-01 15:44 UTC)).unwrap().is_empty());
        assert!(watcher.check(datetime!(2024-07-01 15:59 UTC)).unwrap().is_empty());

        let rollovers = watcher.check(datetime!(2024-07-01 16:00 UTC)).unwrap();
        assert_eq!(
            rollovers,
            vec![Rollover {
                leaderboard: "hourly-race".into(),
                from_epoch: 477735,
                to_epoch: 477736,
                next_reset: Some(datetime!(2024-07-01 17:00 UTC)),
            }]
        );
        assert!(watcher.check(datetime!(2024-07-01 16:30 UTC)).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unloaded_configuration_is_an_error() {
        let provider = Arc::new(SnapshotProvider::new(
            Arc::new(MemoryConfigSource::new(vec![])),
            Duration::from_secs(1),
        ));
        assert!(ResetWatcher::new(provider, aggregator())
            .check(OffsetDateTime::now_utc())
            .is_err());
    }

    #[tokio::test]
    async fn test_sweep_prunes_receipts_of_finished_epochs() {
        let aggregator = aggregator();
        let watcher = ResetWatcher::new(hourly_provider().await, aggregator.clone());
        let report = |report_id: &'static str| Report {
            entry_id: "a",
            value: 1.0,
            metadata: None,
            report_id: Some(report_id),
        };

        // left over from before the process started
        aggregator.sum("hourly-race::477734", &report("r-0")).await.unwrap();
        aggregator.sum("hourly-race::477735", &report("r-1")).await.unwrap();

        assert!(watcher.sweep(datetime!(2024-07-01 15:44 UTC)).await.unwrap().is_empty());
        let replay = aggregator.sum("hourly-race::477734", &report("r-0")).await.unwrap();
        assert_eq!(replay.new_score, 2.0);
        let replay = aggregator.sum("hourly-race::477735", &report("r-1")).await.unwrap();
        assert_eq!(replay.new_score, 1.0);

        let rollovers = watcher.sweep(datetime!(2024-07-01 16:00 UTC)).await.unwrap();
        assert_eq!(rollovers.len(), 1);
        let replay = aggregator.sum("hourly-race::477735", &report("r-1")).await.unwrap();
        assert_eq!(replay.new_score, 2.0);
    }
}
