use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::ErrorResponse,
    Json,
};
use leaderboards_core::LeaderboardConfig;
use log::{error, info};
use std::sync::Arc;

use crate::{
    domain::{Error, LeaderboardConfigProvider},
    startup::AppState,
};

// Private route, not meant to be exposed to players
pub async fn put_leaderboard(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    payload: Result<Json<LeaderboardConfig>, JsonRejection>,
) -> Result<Json<LeaderboardConfig>, ErrorResponse> {
    let Json(body) = payload.map_err(|e| Error::BadRequest(e.body_text()))?;
    if !body.name.eq_ignore_ascii_case(&name) {
        return Err(Error::BadRequest(format!(
            "config name {} does not match path {}",
            body.name, name
        ))
        .into());
    }

    let leaderboard = state.config_provider.update(body).await.map_err(|e| {
        error!("error storing leaderboard {}: {}", name, e);
        e
    })?;
    info!("leaderboard {} configured", leaderboard.name());
    Ok(Json(leaderboard.config))
}

pub async fn get_leaderboards(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<LeaderboardConfig>>, ErrorResponse> {
    let snapshot = state.config_provider.provide()?;
    Ok(Json(
        snapshot
            .leaderboards()
            .into_iter()
            .map(|leaderboard| leaderboard.config.clone())
            .collect(),
    ))
}
