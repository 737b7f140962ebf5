use leaderboards_core::{validate_config, Leaderboard, LeaderboardConfig};
use log::{debug, error, info};
use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use super::ConfigSource;
use crate::domain::{with_deadline, Error, StoreError};

/// Compiled leaderboards keyed by lower-cased name
#[derive(Debug, Default)]
pub struct ConfigSnapshot {
    leaderboards: HashMap<String, Leaderboard>,
}

impl ConfigSnapshot {
    pub fn get(&self, name: &str) -> Option<&Leaderboard> {
        self.leaderboards.get(&name.to_lowercase())
    }

    /// Leaderboards ordered by name
    pub fn leaderboards(&self) -> Vec<&Leaderboard> {
        let mut leaderboards: Vec<&Leaderboard> = self.leaderboards.values().collect();
        leaderboards.sort_by(|a, b| a.name().cmp(b.name()));
        leaderboards
    }

    pub fn len(&self) -> usize {
        self.leaderboards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leaderboards.is_empty()
    }
}

/// Non-blocking access to the latest leaderboard configuration
pub trait LeaderboardConfigProvider: Send + Sync {
    /// Last successfully refreshed snapshot, or an error if none was ever loaded
    fn provide(&self) -> Result<Arc<ConfigSnapshot>, Error>;
}

/// Keeps the last good [`ConfigSnapshot`] loaded from a [`ConfigSource`].
///
/// A refresh builds the new snapshot off to the side and swaps it in whole. A failed fetch
/// or a schedule that does not compile leaves the previous snapshot in place.
pub struct SnapshotProvider {
    source: Arc<dyn ConfigSource>,
    snapshot: RwLock<Option<Arc<ConfigSnapshot>>>,
    timeout: Duration,
}

impl SnapshotProvider {
    pub fn new(source: Arc<dyn ConfigSource>, timeout: Duration) -> Self {
        Self {
            source,
            snapshot: RwLock::new(None),
            timeout,
        }
    }

    fn current(&self) -> Option<Arc<ConfigSnapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Reload every configuration, returning the number of leaderboards now active
    pub async fn refresh(&self) -> Result<usize, Error> {
        let configs = with_deadline(self.timeout, self.source.fetch_all())
            .await
            .map_err(|e| {
                error!("failed to fetch leaderboard configuration: {}", e);
                match e {
                    Error::Store(StoreError::Malformed(reason)) => Error::Marshal(reason),
                    Error::Store(StoreError::Json(e)) => Error::Marshal(e.to_string()),
                    other => other,
                }
            })?;

        let previous = self.current();
        let mut leaderboards = HashMap::with_capacity(configs.len());
        for config in configs {
            let key = config.name.to_lowercase();
            let known_schedule = previous
                .as_ref()
                .and_then(|snapshot| snapshot.leaderboards.get(&key))
                .filter(|known| known.config.reset == config.reset)
                .map(|known| known.schedule.clone());

            let leaderboard = match known_schedule {
                Some(schedule) => Leaderboard::with_schedule(config, schedule),
                None => Leaderboard::compile(config).map_err(|e| {
                    error!("refresh aborted, leaderboard '{}': {}", key, e);
                    Error::from(e)
                })?,
            };
            leaderboards.insert(key, leaderboard);
        }

        let count = leaderboards.len();
        if previous.as_ref().map_or(true, |p| p.len() != count) {
            info!("loaded configuration for {} leaderboards", count);
        } else {
            debug!("refreshed configuration for {} leaderboards", count);
        }

        *self
            .snapshot
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(ConfigSnapshot { leaderboards }));
        Ok(count)
    }

    /// Validate and persist one configuration, then reload so it takes effect immediately
    pub async fn update(&self, config: LeaderboardConfig) -> Result<Leaderboard, Error> {
        validate_config(&config)?;
        let compiled = Leaderboard::compile(config)?;

        with_deadline(self.timeout, self.source.update(&compiled.config)).await?;
        info!(
            "stored configuration for leaderboard {} ({}, {:?})",
            compiled.name(),
            compiled.policy(),
            compiled.config.reset
        );

        self.refresh().await?;
        Ok(compiled)
    }

    pub async fn ping(&self) -> Result<(), Error> {
        with_deadline(self.timeout, self.source.ping()).await
    }
}

impl LeaderboardConfigProvider for SnapshotProvider {
    fn provide(&self) -> Result<Arc<ConfigSnapshot>, Error> {
        self.current().ok_or_else(|| {
            Error::ConfigUnavailable(String::from("configuration has not been loaded yet"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{MemoryConfigSource, MockConfigSource};
    use leaderboards_core::{AggregationPolicy, ResetSchedule};

    fn config(name: &str, reset: ResetSchedule) -> LeaderboardConfig {
        LeaderboardConfig {
            name: name.to_string(),
            policy: AggregationPolicy::Max,
            reset,
            prizes: Default::default(),
            segments: vec![],
        }
    }

    fn custom(expression: &str) -> ResetSchedule {
        ResetSchedule::Custom {
            expression: expression.to_string(),
        }
    }

    #[tokio::test]
    async fn test_provide_before_refresh_fails() {
        let provider = SnapshotProvider::new(
            Arc::new(MemoryConfigSource::new(vec![])),
            Duration::from_secs(1),
        );
        assert!(matches!(provider.provide(), Err(Error::ConfigUnavailable(_))));
    }

    #[tokio::test]
    async fn test_refresh_populates_case_insensitive_snapshot() {
        let source = MemoryConfigSource::new(vec![
            config("Weekly-Race", ResetSchedule::Weekly),
            config("cup", ResetSchedule::Monthly),
        ]);
        let provider = SnapshotProvider::new(Arc::new(source), Duration::from_secs(1));

        assert_eq!(provider.refresh().await.unwrap(), 2);
        let snapshot = provider.provide().unwrap();
        assert!(snapshot.get("weekly-race").is_some());
        assert!(snapshot.get("WEEKLY-RACE").is_some());
        assert!(snapshot.get("unknown").is_none());
        let names: Vec<&str> = snapshot.leaderboards().iter().map(|l| l.name()).collect();
        assert_eq!(names, vec!["Weekly-Race", "cup"]);
    }

    #[tokio::test]
    async fn test_bad_schedule_keeps_previous_snapshot() {
        let source = Arc::new(MemoryConfigSource::new(vec![config("race", ResetSchedule::Daily)]));
        let provider = SnapshotProvider::new(source.clone(), Duration::from_secs(1));
        provider.refresh().await.unwrap();
        let before = provider.provide().unwrap();

        source.update(&config("broken", custom("61 * * * *"))).await.unwrap();
        source.update(&config("cup", ResetSchedule::Weekly)).await.unwrap();
        assert!(matches!(
            provider.refresh().await,
            Err(Error::InvalidSchedule(_))
        ));

        let after = provider.provide().unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.len(), 1);
        assert!(after.get("cup").is_none());
        assert!(after.get("broken").is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_keeps_previous_snapshot() {
        let mut source = MockConfigSource::new();
        let mut calls = 0;
        source.expect_fetch_all().returning(move || {
            calls += 1;
            if calls == 1 {
                Ok(vec![config("race", ResetSchedule::Hourly)])
            } else {
                Err(StoreError::Malformed(String::from("leaderboard race: bad json")))
            }
        });

        let provider = SnapshotProvider::new(Arc::new(source), Duration::from_secs(1));
        provider.refresh().await.unwrap();
        assert!(matches!(provider.refresh().await, Err(Error::Marshal(_))));
        assert!(provider.provide().unwrap().get("race").is_some());
    }

    #[tokio::test]
    async fn test_unchanged_schedule_is_reused() {
        let source = Arc::new(MemoryConfigSource::new(vec![config("race", custom("0 9 * * 1-5"))]));
        let provider = SnapshotProvider::new(source.clone(), Duration::from_secs(1));
        provider.refresh().await.unwrap();
        let first = provider.provide().unwrap().get("race").unwrap().schedule.clone();

        let mut renamed_policy = config("race", custom("0 9 * * 1-5"));
        renamed_policy.policy = AggregationPolicy::Sum;
        source.update(&renamed_policy).await.unwrap();
        provider.refresh().await.unwrap();
        let second = provider.provide().unwrap().get("race").unwrap().schedule.clone();
        assert!(Arc::ptr_eq(&first, &second));

        source.update(&config("race", ResetSchedule::Daily)).await.unwrap();
        provider.refresh().await.unwrap();
        let third = provider.provide().unwrap().get("race").unwrap().schedule.clone();
        assert!(!Arc::ptr_eq(&first, &third));
    }

    #[tokio::test]
    async fn test_update_validates_before_persisting() {
        let source = Arc::new(MemoryConfigSource::new(vec![]));
        let provider = SnapshotProvider::new(source.clone(), Duration::from_secs(1));

        let err = provider
            .update(config("race", custom("0 0 31 2 *")))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidSchedule(_)));
        assert!(source.fetch_all().await.unwrap().is_empty());

        provider.update(config("race", ResetSchedule::Daily)).await.unwrap();
        assert!(provider.provide().unwrap().get("race").is_some());
    }
}
