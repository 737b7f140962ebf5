use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    response::ErrorResponse,
    Json,
};
use leaderboards_core::{Metadata, ScoreboardListing};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};

use crate::{
    domain::{EntryRank, Error, ScoreReport},
    startup::AppState,
};

/// Query parameters carrying metadata are prefixed, e.g. `?meta_country=PT`
const METADATA_PREFIX: &str = "meta_";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportScoreRequest {
    pub entry: String,
    pub score: f64,
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub report_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportScoreResponse {
    pub new_score: f64,
    pub epoch: i64,
    /// false when the aggregation policy rejected the report
    pub done: bool,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoresResponse {
    pub scores: Vec<ScoreboardListing>,
    pub epoch: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankResponse {
    pub entry_id: String,
    pub epoch: i64,
    pub ranks: Vec<EntryRank>,
}

pub fn metadata_from_query(params: HashMap<String, String>) -> Option<Metadata> {
    let metadata: Metadata = params
        .into_iter()
        .filter_map(|(key, value)| {
            key.strip_prefix(METADATA_PREFIX)
                .filter(|field| !field.is_empty())
                .map(|field| (field.to_string(), value))
        })
        .collect();
    if metadata.is_empty() {
        None
    } else {
        Some(metadata)
    }
}

pub async fn report_score(
    State(state): State<Arc<AppState>>,
    Path(leaderboard): Path<String>,
    payload: Result<Json<ReportScoreRequest>, JsonRejection>,
) -> Result<Json<ReportScoreResponse>, ErrorResponse> {
    let Json(body) = payload.map_err(|e| Error::BadRequest(e.body_text()))?;
    debug!("score report for {} on {}", body.entry, leaderboard);
    let report = ScoreReport {
        entry_id: body.entry,
        score: body.score,
        metadata: body.metadata,
        report_id: body.report_id,
    };

    let outcome = state
        .leaderboards
        .report_score(&leaderboard, &report)
        .await
        .map_err(|e| {
            error!("error reporting score on {}: {}", leaderboard, e);
            e
        })?;

    Ok(Json(ReportScoreResponse {
        new_score: outcome.update.new_score,
        epoch: outcome.epoch,
        done: outcome.update.applied,
        count: outcome.update.update_counter,
    }))
}

pub async fn get_scores(
    State(state): State<Arc<AppState>>,
    Path(leaderboard): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ScoresResponse>, ErrorResponse> {
    let metadata = metadata_from_query(params);
    let (scores, epoch) = state
        .leaderboards
        .list_scores(&leaderboard, metadata.as_ref())
        .await
        .map_err(|e| {
            error!("error listing scores of {}: {}", leaderboard, e);
            e
        })?;
    Ok(Json(ScoresResponse { scores, epoch }))
}

pub async fn get_results(
    State(state): State<Arc<AppState>>,
    Path((leaderboard, epoch)): Path<(String, i64)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<ScoresResponse>, ErrorResponse> {
    let metadata = metadata_from_query(params);
    let scores = state
        .leaderboards
        .get_results(&leaderboard, epoch, metadata.as_ref())
        .await
        .map_err(|e| {
            error!("error reading results of {} epoch {}: {}", leaderboard, epoch, e);
            e
        })?;
    Ok(Json(ScoresResponse { scores, epoch }))
}

pub async fn get_rank(
    State(state): State<Arc<AppState>>,
    Path((leaderboard, entry_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<RankResponse>, ErrorResponse> {
    let metadata = metadata_from_query(params);
    let (ranks, epoch) = state
        .leaderboards
        .rank_of(&leaderboard, &entry_id, metadata.as_ref())
        .await
        .map_err(|e| {
            error!("error ranking {} on {}: {}", entry_id, leaderboard, e);
            e
        })?;
    Ok(Json(RankResponse {
        entry_id,
        epoch,
        ranks,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;

    #[test]
    fn test_metadata_from_query_strips_prefix() {
        let params = hashmap! {
            "meta_country".to_string() => "PT".to_string(),
            "meta_league".to_string() => "gold".to_string(),
            "limit".to_string() => "10".to_string(),
            "meta_".to_string() => "ignored".to_string(),
        };
        assert_eq!(
            metadata_from_query(params),
            Some(hashmap! {
                "country".to_string() => "PT".to_string(),
                "league".to_string() => "gold".to_string(),
            })
        );
        assert_eq!(metadata_from_query(HashMap::new()), None);
    }
}
