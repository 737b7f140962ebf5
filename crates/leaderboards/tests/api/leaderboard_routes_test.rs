use hyper::StatusCode;
use leaderboards_core::AggregationPolicy;
use serde_json::json;

use crate::helpers::{leaderboard, spawn_app};

#[tokio::test]
async fn test_configure_and_list_leaderboards() {
    let app = spawn_app(vec![leaderboard("race", AggregationPolicy::Max)]).await;

    let (status, body) = app
        .put(
            "/api/v1/leaderboards/cup",
            json!({
                "name": "cup",
                "policy": "sum",
                "reset": {"type": "custom", "expression": "0 9 * * 1-5"},
                "prizes": {"table": [{"rank_from": 1, "rank_to": 3, "action": "gold"}]},
                "segments": [{"kind": "country", "field": "country"}]
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], json!("cup"));

    let (status, body) = app.get("/api/v1/leaderboards").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|config| config["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["cup", "race"]);

    // the new leaderboard takes reports right away
    let (status, body) = app
        .put("/api/v1/score/cup", json!({"entry": "A", "score": 2.0}))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["done"], json!(true));
}

#[tokio::test]
async fn test_rejected_configurations() {
    let app = spawn_app(vec![]).await;

    let unsatisfiable = json!({
        "name": "cup",
        "policy": "max",
        "reset": {"type": "custom", "expression": "0 0 31 2 *"}
    });
    let (status, _) = app.put("/api/v1/leaderboards/cup", unsatisfiable).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let mismatched = json!({"name": "other", "policy": "max", "reset": {"type": "daily"}});
    let (status, _) = app.put("/api/v1/leaderboards/cup", mismatched).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let unknown_policy = json!({"name": "cup", "policy": "median", "reset": {"type": "daily"}});
    let (status, _) = app.put("/api/v1/leaderboards/cup", unknown_policy).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = app.get("/api/v1/leaderboards").await;
    assert_eq!(body, json!([]));
}
