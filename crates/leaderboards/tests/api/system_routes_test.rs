use hyper::StatusCode;
use leaderboards_core::AggregationPolicy;

use crate::helpers::{leaderboard, spawn_app};

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app(vec![leaderboard("race", AggregationPolicy::Max)]).await;
    let (status, _) = app.get("/api/v1/health_check").await;
    assert_eq!(status, StatusCode::OK);
}
