use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    Router,
};
use leaderboards::{
    app, build_app,
    domain::{
        LeaderboardService, MemoryAggregateStore, MemoryConfigSource, RankedScoreboard,
        ScoreAggregator, Scoreboard, SnapshotProvider, StoreError,
    },
    AppState, Settings, StorageBackend,
};
use leaderboards_core::{
    AggregationPolicy, LeaderboardConfig, ResetSchedule, ScoreboardEntry, SegmentDefinition,
    SegmentKind,
};
use mockall::mock;
use serde_json::Value;
use std::{collections::HashMap, sync::{Arc, Once}, time::Duration};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

static INIT_LOGGER: Once = Once::new();

pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

mock! {
    pub Scoreboard {}

    #[async_trait]
    impl Scoreboard for Scoreboard {
        async fn upsert(&self, name: &str, entry_id: &str, score: f64) -> Result<(), StoreError>;
        async fn top(&self, name: &str, n: usize) -> Result<Vec<ScoreboardEntry>, StoreError>;
        async fn rank_of(&self, name: &str, entry_id: &str) -> Result<Option<u64>, StoreError>;
        async fn ping(&self) -> Result<(), StoreError>;
    }
}

/// Manual schedule so the epoch under test never moves
pub const EPOCH: i64 = 3;

pub fn leaderboard(name: &str, policy: AggregationPolicy) -> LeaderboardConfig {
    LeaderboardConfig {
        name: name.to_string(),
        policy,
        reset: ResetSchedule::Manual { epoch: EPOCH },
        prizes: Default::default(),
        segments: vec![
            SegmentDefinition {
                kind: SegmentKind::League,
                field: "league".into(),
            },
            SegmentDefinition {
                kind: SegmentKind::Country,
                field: "country".into(),
            },
        ],
    }
}

pub struct TestApp {
    pub router: Router,
    cancel_token: Option<CancellationToken>,
}

impl TestApp {
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    pub async fn put(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(Method::PUT, uri, Some(body)).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        if let Some(token) = &self.cancel_token {
            token.cancel();
        }
    }
}

/// Full application on in-memory stores, background watchers included
pub async fn spawn_app(seed: Vec<LeaderboardConfig>) -> TestApp {
    init_logger();
    let mut settings = Settings::default();
    settings.leaderboard_settings.backend = StorageBackend::Memory;
    settings.leaderboard_settings.seed_leaderboards = seed;

    let (app_state, _tracker, cancel_token) = build_app(settings).await.unwrap();
    TestApp {
        router: app(app_state, vec![]),
        cancel_token: Some(cancel_token),
    }
}

/// Application wired to the given scoreboard, without background watchers
pub async fn spawn_app_with_scoreboard(
    seed: Vec<LeaderboardConfig>,
    scoreboard: Arc<dyn Scoreboard>,
) -> TestApp {
    init_logger();
    let timeout = Duration::from_secs(1);
    let config_provider = Arc::new(SnapshotProvider::new(
        Arc::new(MemoryConfigSource::new(seed)),
        timeout,
    ));
    config_provider.refresh().await.unwrap();

    let leaderboards = Arc::new(LeaderboardService::new(
        config_provider.clone(),
        ScoreAggregator::new(Arc::new(MemoryAggregateStore::new()), timeout),
        RankedScoreboard::new(scoreboard, timeout),
        50,
    ));
    let app_state = AppState {
        leaderboards,
        config_provider,
        background_threads: Arc::new(HashMap::new()),
        db: None,
    };
    TestApp {
        router: app(app_state, vec![]),
        cancel_token: None,
    }
}
