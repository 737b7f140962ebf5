use hyper::StatusCode;
use leaderboards_core::AggregationPolicy;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::helpers::{leaderboard, spawn_app, spawn_app_with_scoreboard, MockScoreboard, EPOCH};

#[tokio::test]
async fn test_reported_scores_are_ranked() {
    let app = spawn_app(vec![leaderboard("race", AggregationPolicy::Max)]).await;

    let (status, body) = app
        .put("/api/v1/score/race", json!({"entry": "A", "score": 10.0}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"new_score": 10.0, "epoch": EPOCH, "done": true, "count": 1})
    );
    app.put("/api/v1/score/race", json!({"entry": "B", "score": 15.0}))
        .await;

    let (status, body) = app.get("/api/v1/scores/race").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "scores": [{
                "name": "race::3",
                "scores": [
                    {"entry_id": "B", "score": 15.0, "rank": 1},
                    {"entry_id": "A", "score": 10.0, "rank": 2},
                ]
            }],
            "epoch": EPOCH
        })
    );
}

#[tokio::test]
async fn test_rejected_report_is_not_an_error() {
    let app = spawn_app(vec![leaderboard("race", AggregationPolicy::Max)]).await;
    app.put("/api/v1/score/race", json!({"entry": "A", "score": 10.0}))
        .await;

    let (status, body) = app
        .put("/api/v1/score/race", json!({"entry": "A", "score": 4.0}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["done"], json!(false));
    assert_eq!(body["new_score"], json!(10.0));
    assert_eq!(body["count"], json!(1));
}

#[tokio::test]
async fn test_segment_views_follow_metadata() {
    let app = spawn_app(vec![leaderboard("race", AggregationPolicy::Sum)]).await;
    app.put(
        "/api/v1/score/race",
        json!({"entry": "A", "score": 3.0, "metadata": {"country": "PT", "league": "Gold"}}),
    )
    .await;
    app.put(
        "/api/v1/score/race",
        json!({"entry": "B", "score": 5.0, "metadata": {"country": "UK"}}),
    )
    .await;

    let (status, body) = app
        .get("/api/v1/scores/race?meta_country=PT&meta_league=Gold")
        .await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body["scores"]
        .as_array()
        .unwrap()
        .iter()
        .map(|listing| listing["name"].as_str().unwrap())
        .collect();
    assert_eq!(
        names,
        vec!["race::3", "race::league::gold::3", "race::country::pt::3"]
    );
    assert_eq!(body["scores"][0]["scores"].as_array().unwrap().len(), 2);
    assert_eq!(
        body["scores"][2]["scores"],
        json!([{"entry_id": "A", "score": 3.0, "rank": 1}])
    );
}

#[tokio::test]
async fn test_results_and_rank_endpoints() {
    let app = spawn_app(vec![leaderboard("race", AggregationPolicy::Last)]).await;
    app.put("/api/v1/score/race", json!({"entry": "A", "score": 7.0}))
        .await;
    app.put("/api/v1/score/race", json!({"entry": "B", "score": 9.0}))
        .await;

    let (status, body) = app.get("/api/v1/results/race/3").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["epoch"], json!(3));
    assert_eq!(body["scores"][0]["scores"][1]["entry_id"], json!("A"));

    let (_, body) = app.get("/api/v1/results/race/2").await;
    assert_eq!(body["scores"][0]["scores"], json!([]));

    let (status, body) = app.get("/api/v1/rank/race/A?meta_country=PT").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "entry_id": "A",
            "epoch": EPOCH,
            "ranks": [
                {"name": "race::3", "rank": 2},
                {"name": "race::country::pt::3", "rank": null},
            ]
        })
    );
}

#[tokio::test]
async fn test_repeated_report_id_applies_once() {
    let app = spawn_app(vec![leaderboard("coins", AggregationPolicy::Sum)]).await;
    let report = json!({"entry": "A", "score": 5.0, "report_id": "match-42"});

    let (_, first) = app.put("/api/v1/score/coins", report.clone()).await;
    let (status, replay) = app.put("/api/v1/score/coins", report).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, replay);
    assert_eq!(replay["new_score"], json!(5.0));

    let (_, body) = app
        .put(
            "/api/v1/score/coins",
            json!({"entry": "A", "score": 5.0, "report_id": "match-43"}),
        )
        .await;
    assert_eq!(body["new_score"], json!(10.0));
    assert_eq!(body["count"], json!(2));
}

#[tokio::test]
async fn test_bad_reports() {
    let app = spawn_app(vec![leaderboard("race", AggregationPolicy::Max)]).await;

    let (status, body) = app
        .put("/api/v1/score/unknown", json!({"entry": "A", "score": 1.0}))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("unknown leaderboard"));

    for bad in [
        json!({"entry": "A", "score": "high"}),
        json!({"score": 1.0}),
        json!({"entry": "", "score": 1.0}),
        json!({"entry": "A::B", "score": 1.0}),
        json!({"entry": "A", "score": 1.0, "metadata": {"country code": "PT"}}),
    ] {
        let (status, body) = app.put("/api/v1/score/race", bad.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", bad);
        assert!(matches!(body["error"], Value::String(_)));
    }
}

#[tokio::test]
async fn test_scoreboard_failure_is_internal_error() {
    let mut scoreboard = MockScoreboard::new();
    scoreboard.expect_upsert().returning(|_, _, _| {
        Err(leaderboards::domain::StoreError::Malformed(String::from(
            "ranking store down",
        )))
    });

    let app = spawn_app_with_scoreboard(
        vec![leaderboard("race", AggregationPolicy::Sum)],
        Arc::new(scoreboard),
    )
    .await;
    let (status, body) = app
        .put("/api/v1/score/race", json!({"entry": "A", "score": 1.0}))
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body, json!({"error": "internal server error"}));
}
