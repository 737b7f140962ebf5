use leaderboards_core::{
    epoch_name, segment_names, validate_metadata, validate_name, validate_score, Leaderboard,
    Metadata, ScoreUpdateResult, ScoreboardListing,
};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use time::OffsetDateTime;

use crate::domain::{
    Error, LeaderboardConfigProvider, RankedScoreboard, Report, ScoreAggregator,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreReport {
    pub entry_id: String,
    pub score: f64,
    pub metadata: Option<Metadata>,
    /// Retries carrying the same id are applied once
    pub report_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportOutcome {
    pub update: ScoreUpdateResult,
    pub epoch: i64,
}

/// Position of one entry in one scoreboard, `None` when it has no score there
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRank {
    pub name: String,
    pub rank: Option<u64>,
}

/// Entry point for reporting and reading scores.
///
/// A report resolves the leaderboard's configuration and current epoch, applies the
/// configured aggregation policy to the durable aggregate and, when the write was accepted,
/// copies the new absolute score into the global scoreboard and every segment scoreboard
/// selected by the report's metadata.
#[derive(Clone)]
pub struct LeaderboardService {
    provider: Arc<dyn LeaderboardConfigProvider>,
    aggregator: ScoreAggregator,
    scoreboard: RankedScoreboard,
    listing_size: usize,
}

impl LeaderboardService {
    pub fn new(
        provider: Arc<dyn LeaderboardConfigProvider>,
        aggregator: ScoreAggregator,
        scoreboard: RankedScoreboard,
        listing_size: usize,
    ) -> Self {
        Self {
            provider,
            aggregator,
            scoreboard,
            listing_size,
        }
    }

    pub fn leaderboard(&self, name: &str) -> Result<Leaderboard, Error> {
        let snapshot = self.provider.provide()?;
        snapshot
            .get(name)
            .cloned()
            .ok_or_else(|| Error::ConfigNotFound(name.to_string()))
    }

    pub async fn report_score(
        &self,
        leaderboard: &str,
        report: &ScoreReport,
    ) -> Result<ReportOutcome, Error> {
        self.report_score_at(leaderboard, report, OffsetDateTime::now_utc())
            .await
    }

    pub async fn report_score_at(
        &self,
        leaderboard: &str,
        report: &ScoreReport,
        now: OffsetDateTime,
    ) -> Result<ReportOutcome, Error> {
        validate_name("entry id", &report.entry_id)?;
        validate_score(report.score)?;
        if let Some(metadata) = &report.metadata {
            validate_metadata(metadata)?;
        }

        let leaderboard = self.leaderboard(leaderboard)?;
        let epoch = leaderboard.schedule.epoch(now);
        let global = epoch_name(leaderboard.name(), epoch);

        let update = self
            .aggregator
            .apply(
                leaderboard.policy(),
                &global,
                &Report {
                    entry_id: &report.entry_id,
                    value: report.score,
                    metadata: report.metadata.as_ref(),
                    report_id: report.report_id.as_deref(),
                },
            )
            .await?;

        if update.applied {
            let segments = segment_names(
                leaderboard.name(),
                &leaderboard.config.segments,
                report.metadata.as_ref(),
                epoch,
            );
            // every scoreboard is attempted; the first failure is reported
            let mut first_error = None;
            for name in std::iter::once(global).chain(segments) {
                if let Err(e) = self
                    .scoreboard
                    .add_score(&name, &report.entry_id, update.new_score)
                    .await
                {
                    error!(
                        "aggregate for {} committed but scoreboard {} not updated: {}",
                        report.entry_id, name, e
                    );
                    first_error.get_or_insert(e);
                }
            }
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        debug!(
            "reported {} for {} on {} epoch {}: applied {}, score {}",
            report.score,
            report.entry_id,
            leaderboard.name(),
            epoch,
            update.applied,
            update.new_score
        );
        Ok(ReportOutcome { update, epoch })
    }

    /// Listings for the current epoch: the global scoreboard, then one per segment selected by
    /// `metadata`
    pub async fn list_scores(
        &self,
        leaderboard: &str,
        metadata: Option<&Metadata>,
    ) -> Result<(Vec<ScoreboardListing>, i64), Error> {
        self.list_scores_at(leaderboard, metadata, OffsetDateTime::now_utc())
            .await
    }

    pub async fn list_scores_at(
        &self,
        leaderboard: &str,
        metadata: Option<&Metadata>,
        now: OffsetDateTime,
    ) -> Result<(Vec<ScoreboardListing>, i64), Error> {
        let leaderboard = self.leaderboard(leaderboard)?;
        let epoch = leaderboard.schedule.epoch(now);
        let listings = self.listings(&leaderboard, epoch, metadata).await?;
        Ok((listings, epoch))
    }

    /// Listings frozen at an explicit, usually finished, epoch
    pub async fn get_results(
        &self,
        leaderboard: &str,
        epoch: i64,
        metadata: Option<&Metadata>,
    ) -> Result<Vec<ScoreboardListing>, Error> {
        let leaderboard = self.leaderboard(leaderboard)?;
        self.listings(&leaderboard, epoch, metadata).await
    }

    /// Rank of `entry_id` in every scoreboard of the current epoch selected by `metadata`
    pub async fn rank_of(
        &self,
        leaderboard: &str,
        entry_id: &str,
        metadata: Option<&Metadata>,
    ) -> Result<(Vec<EntryRank>, i64), Error> {
        validate_name("entry id", entry_id)?;
        let leaderboard = self.leaderboard(leaderboard)?;
        let epoch = leaderboard.schedule.epoch(OffsetDateTime::now_utc());

        let mut ranks = vec![];
        for name in scoreboard_names(&leaderboard, epoch, metadata) {
            let rank = self.scoreboard.rank(&name, entry_id).await?;
            ranks.push(EntryRank { name, rank });
        }
        Ok((ranks, epoch))
    }

    async fn listings(
        &self,
        leaderboard: &Leaderboard,
        epoch: i64,
        metadata: Option<&Metadata>,
    ) -> Result<Vec<ScoreboardListing>, Error> {
        let mut listings = vec![];
        for name in scoreboard_names(leaderboard, epoch, metadata) {
            listings.push(self.scoreboard.listing(&name, self.listing_size).await?);
        }
        Ok(listings)
    }

    pub async fn ping(&self) -> Result<(), Error> {
        self.aggregator.ping().await?;
        self.scoreboard.ping().await
    }
}

fn scoreboard_names(leaderboard: &Leaderboard, epoch: i64, metadata: Option<&Metadata>) -> Vec<String> {
    let mut names = vec![epoch_name(leaderboard.name(), epoch)];
    names.extend(segment_names(
        leaderboard.name(),
        &leaderboard.config.segments,
        metadata,
        epoch,
    ));
    names
}
