mod memory;
mod sqlite;

pub use memory::*;
pub use sqlite::*;

use async_trait::async_trait;
use leaderboards_core::{
    update_request, AggregateRecord, AggregationPolicy, Metadata, ScoreUpdateResult, UpdateRequest,
};
use log::debug;
use std::{sync::Arc, time::Duration};

use super::{with_deadline, Error, StoreError};

/// Durable per-entry aggregates keyed by `(entry_id, epoch-qualified leaderboard)`.
///
/// `update` must evaluate the request's condition and apply the write atomically with
/// respect to other writers of the same key. A rejected condition is reported as
/// `applied == false` with the stored score and counter, never as an error.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn update(
        &self,
        entry_id: &str,
        leaderboard: &str,
        request: &UpdateRequest,
    ) -> Result<ScoreUpdateResult, StoreError>;

    async fn get(
        &self,
        entry_id: &str,
        leaderboard: &str,
    ) -> Result<Option<AggregateRecord>, StoreError>;

    /// Delete idempotency receipts recorded under `{leaderboard}::*` names other than
    /// `current`. Reports only ever target the current epoch.
    async fn prune_receipts(&self, leaderboard: &str, current: &str) -> Result<u64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}

/// One score report as seen by the aggregator
#[derive(Debug, Clone, Copy)]
pub struct Report<'a> {
    pub entry_id: &'a str,
    pub value: f64,
    pub metadata: Option<&'a Metadata>,
    pub report_id: Option<&'a str>,
}

/// Applies aggregation policies against an [`AggregateStore`] under a per-call deadline
#[derive(Clone)]
pub struct ScoreAggregator {
    store: Arc<dyn AggregateStore>,
    timeout: Duration,
}

impl ScoreAggregator {
    pub fn new(store: Arc<dyn AggregateStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn apply(
        &self,
        policy: AggregationPolicy,
        leaderboard: &str,
        report: &Report<'_>,
    ) -> Result<ScoreUpdateResult, Error> {
        match policy {
            AggregationPolicy::Sum => self.sum(leaderboard, report).await,
            AggregationPolicy::Max => self.max(leaderboard, report).await,
            AggregationPolicy::Min => self.min(leaderboard, report).await,
            AggregationPolicy::Last => self.last(leaderboard, report).await,
        }
    }

    pub async fn sum(&self, leaderboard: &str, report: &Report<'_>) -> Result<ScoreUpdateResult, Error> {
        self.conditional_update(AggregationPolicy::Sum, leaderboard, report)
            .await
    }

    pub async fn max(&self, leaderboard: &str, report: &Report<'_>) -> Result<ScoreUpdateResult, Error> {
        self.conditional_update(AggregationPolicy::Max, leaderboard, report)
            .await
    }

    pub async fn min(&self, leaderboard: &str, report: &Report<'_>) -> Result<ScoreUpdateResult, Error> {
        self.conditional_update(AggregationPolicy::Min, leaderboard, report)
            .await
    }

    pub async fn last(&self, leaderboard: &str, report: &Report<'_>) -> Result<ScoreUpdateResult, Error> {
        self.conditional_update(AggregationPolicy::Last, leaderboard, report)
            .await
    }

    pub async fn get(
        &self,
        entry_id: &str,
        leaderboard: &str,
    ) -> Result<Option<AggregateRecord>, Error> {
        with_deadline(self.timeout, self.store.get(entry_id, leaderboard)).await
    }

    pub async fn prune_receipts(&self, leaderboard: &str, current: &str) -> Result<u64, Error> {
        with_deadline(self.timeout, self.store.prune_receipts(leaderboard, current)).await
    }

    pub async fn ping(&self) -> Result<(), Error> {
        with_deadline(self.timeout, self.store.ping()).await
    }

    async fn conditional_update(
        &self,
        policy: AggregationPolicy,
        leaderboard: &str,
        report: &Report<'_>,
    ) -> Result<ScoreUpdateResult, Error> {
        let request = update_request(
            policy,
            report.value,
            report.metadata,
            report.report_id.map(String::from),
        );
        let result = with_deadline(
            self.timeout,
            self.store.update(report.entry_id, leaderboard, &request),
        )
        .await?;

        if !result.applied {
            debug!(
                "{} update of {} on {} rejected: reported {}, stored {}",
                policy, report.entry_id, leaderboard, report.value, result.new_score
            );
        }
        Ok(result)
    }
}
