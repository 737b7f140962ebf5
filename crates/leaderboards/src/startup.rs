use crate::{
    api::routes::{
        get_leaderboards, get_rank, get_results, get_scores, health, put_leaderboard,
        report_score,
    },
    config::{LeaderboardSettings, Settings, StorageBackend},
    domain::{
        AggregateStore, ConfigSource, LeaderboardService, MemoryAggregateStore,
        MemoryConfigSource, MemoryScoreboard, RankedScoreboard, RecurringTask, ResetWatcher,
        ScoreAggregator, Scoreboard, SnapshotProvider, SqliteAggregateStore, SqliteConfigSource,
        SqliteScoreboard, Watcher,
    },
    infra::{
        db::{DBConnection, DatabasePoolConfig},
        file_utils::create_folder,
    },
};
use anyhow::anyhow;
use axum::{
    body::Body,
    extract::{connect_info::IntoMakeServiceWithConnectInfo, ConnectInfo, Request},
    http::HeaderValue,
    middleware::{self, AddExtension, Next},
    response::IntoResponse,
    routing::{get, put},
    serve::Serve,
    Router,
};
use hyper::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    Method,
};
use log::{error, info, warn};
use std::{collections::HashMap, net::SocketAddr, str::FromStr, sync::Arc, time::Duration};
use tokio::signal::unix::{signal, SignalKind};
use tokio::{net::TcpListener, select, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tower_http::cors::{AllowOrigin, CorsLayer};

pub struct Application {
    server: Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    cancellation_token: CancellationToken,
    background_tasks: TaskTracker,
    db: Option<DBConnection>,
}

impl Application {
    pub async fn build(config: Settings) -> Result<Self, anyhow::Error> {
        let address = format!(
            "{}:{}",
            config.api_settings.domain, config.api_settings.port
        );
        let listener = SocketAddr::from_str(&address)?;
        let (app_state, background_tasks, cancellation_token) = build_app(config.clone()).await?;
        let db = app_state.db.clone();
        let server = build_server(listener, app_state, config.api_settings.origins).await?;
        Ok(Self {
            server,
            cancellation_token,
            background_tasks,
            db,
        })
    }

    pub async fn run_until_stopped(self) -> Result<(), anyhow::Error> {
        info!("Starting server...");
        match self.server.with_graceful_shutdown(shutdown_signal()).await {
            Ok(_) => {
                info!("Server shutdown initiated");
                self.cancellation_token.cancel();

                let timeout = tokio::time::sleep(Duration::from_secs(10));
                select! {
                    _ = self.background_tasks.wait() => {
                        info!("Background tasks completed gracefully");
                    }
                    _ = timeout => {
                        warn!("Background tasks timed out during shutdown");
                    }
                }

                if let Some(db) = &self.db {
                    db.close().await;
                    info!("Closed database {}", db.database_path);
                }
                info!("Shutdown complete");
                Ok(())
            }
            Err(e) => {
                error!("Server shutdown error: {}", e);
                self.cancellation_token.cancel();

                let _ =
                    tokio::time::timeout(Duration::from_secs(5), self.background_tasks.wait())
                        .await;
                if let Some(db) = &self.db {
                    db.close().await;
                }

                Err(anyhow!("Error during server shutdown: {}", e))
            }
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub leaderboards: Arc<LeaderboardService>,
    pub config_provider: Arc<SnapshotProvider>,
    pub background_threads: Arc<HashMap<String, JoinHandle<()>>>,
    /// Set for the sqlite backend, closed on shutdown
    pub db: Option<DBConnection>,
}

struct Stores {
    aggregates: Arc<dyn AggregateStore>,
    scoreboard: Arc<dyn Scoreboard>,
    configs: Arc<dyn ConfigSource>,
    db: Option<DBConnection>,
}

async fn build_stores(config: &Settings) -> Result<Stores, anyhow::Error> {
    match config.leaderboard_settings.backend {
        StorageBackend::Sqlite => {
            create_folder(&config.db_settings.data_folder)?;
            let pool_config: DatabasePoolConfig = config.db_settings.clone().into();
            let db = DBConnection::new(&config.db_settings.data_folder, "leaderboards", pool_config)
                .await
                .map_err(|e| anyhow!("Error setting up leaderboards db: {}", e))?;
            info!("SQLite stores configured at {}", db.database_path);
            Ok(Stores {
                aggregates: Arc::new(SqliteAggregateStore::new(db.clone())),
                scoreboard: Arc::new(SqliteScoreboard::new(db.clone())),
                configs: Arc::new(SqliteConfigSource::new(db.clone())),
                db: Some(db),
            })
        }
        StorageBackend::Memory => {
            warn!("In-memory stores configured, scores are lost on restart");
            Ok(Stores {
                aggregates: Arc::new(MemoryAggregateStore::new()),
                scoreboard: Arc::new(MemoryScoreboard::new()),
                configs: Arc::new(MemoryConfigSource::default()),
                db: None,
            })
        }
    }
}

/// Write the configured seed leaderboards and load the first snapshot
async fn load_configuration(
    provider: &SnapshotProvider,
    settings: &LeaderboardSettings,
) -> Result<(), anyhow::Error> {
    for config in &settings.seed_leaderboards {
        let leaderboard = provider
            .update(config.clone())
            .await
            .map_err(|e| anyhow!("Error seeding leaderboard {}: {}", config.name, e))?;
        info!("Seeded leaderboard {}", leaderboard.name());
    }
    let count = provider
        .refresh()
        .await
        .map_err(|e| anyhow!("Error loading leaderboard configuration: {}", e))?;
    info!("Serving {} leaderboards", count);
    Ok(())
}

fn spawn_watcher(
    tracker: &TaskTracker,
    threads: &mut HashMap<String, JoinHandle<()>>,
    watcher: Watcher,
) {
    let name = watcher.name();
    let handle = tracker.spawn(async move {
        match watcher.watch().await {
            Ok(_) => {
                info!("Successfully shutdown {}", watcher.name())
            }
            Err(e) => {
                error!("Error in {}: {}", watcher.name(), e)
            }
        }
    });
    threads.insert(name.to_string(), handle);
}

pub async fn build_app(
    config: Settings,
) -> Result<(AppState, TaskTracker, CancellationToken), anyhow::Error> {
    let settings = &config.leaderboard_settings;
    let timeout = Duration::from_millis(settings.store_timeout_ms);
    let stores = build_stores(&config).await?;

    let config_provider = Arc::new(SnapshotProvider::new(stores.configs, timeout));
    load_configuration(&config_provider, settings).await?;

    let aggregator = ScoreAggregator::new(stores.aggregates, timeout);
    let leaderboards = Arc::new(LeaderboardService::new(
        config_provider.clone(),
        aggregator.clone(),
        RankedScoreboard::new(stores.scoreboard, timeout),
        settings.listing_size,
    ));
    info!("Leaderboard service configured");

    let tracker = TaskTracker::new();
    let mut threads = HashMap::new();
    let cancel_token = CancellationToken::new();

    let refresh_task: Arc<dyn RecurringTask> = config_provider.clone();
    spawn_watcher(
        &tracker,
        &mut threads,
        Watcher::new(
            refresh_task,
            cancel_token.clone(),
            Duration::from_secs(settings.config_refresh_interval_secs),
        ),
    );
    spawn_watcher(
        &tracker,
        &mut threads,
        Watcher::new(
            Arc::new(ResetWatcher::new(config_provider.clone(), aggregator)),
            cancel_token.clone(),
            Duration::from_secs(settings.reset_watch_interval_secs),
        ),
    );
    tracker.close();

    let app_state = AppState {
        leaderboards,
        config_provider,
        background_threads: Arc::new(threads),
        db: stores.db,
    };
    Ok((app_state, tracker, cancel_token))
}

pub async fn build_server(
    socket_addr: SocketAddr,
    app_state: AppState,
    origins: Vec<String>,
) -> Result<
    Serve<
        TcpListener,
        IntoMakeServiceWithConnectInfo<Router, SocketAddr>,
        AddExtension<Router, ConnectInfo<SocketAddr>>,
    >,
    anyhow::Error,
> {
    let listener = TcpListener::bind(socket_addr).await?;
    info!("Setting up service");
    let app = app(app_state, origins);
    let server = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    );
    info!(
        "Service running @: http://{}:{}",
        socket_addr.ip(),
        socket_addr.port()
    );
    Ok(server)
}

pub fn app(app_state: AppState, origins: Vec<String>) -> Router {
    let origins: Vec<HeaderValue> = origins
        .into_iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::PUT, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE, AUTHORIZATION])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true);

    let admin_endpoints = Router::new()
        .route("/", get(get_leaderboards))
        .route("/{name}", put(put_leaderboard));

    Router::new()
        .route("/api/v1/health_check", get(health))
        .route("/api/v1/score/{leaderboard}", put(report_score))
        .route("/api/v1/scores/{leaderboard}", get(get_scores))
        .route("/api/v1/results/{leaderboard}/{epoch}", get(get_results))
        .route("/api/v1/rank/{leaderboard}/{entry_id}", get(get_rank))
        .nest("/api/v1/leaderboards", admin_endpoints)
        .layer(middleware::from_fn(log_request))
        .with_state(Arc::new(app_state))
        .layer(cors)
}

async fn log_request(request: Request<Body>, next: Next) -> impl IntoResponse {
    let now = time::OffsetDateTime::now_utc();
    let path = request
        .uri()
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_default();
    info!(target: "http_request","new request, {} {}", request.method().as_str(), path);

    let response = next.run(request).await;
    let response_time = time::OffsetDateTime::now_utc() - now;
    info!(target: "http_response", "response, code: {}, time: {}", response.status().as_str(), response_time);

    response
}

async fn shutdown_signal() {
    let (mut sigint, mut sigterm) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
        (Err(e), _) | (_, Err(e)) => {
            error!("Failed to install shutdown signal handlers: {}", e);
            std::future::pending::<()>().await;
            return;
        }
    };

    select! {
        _ = sigint.recv() => info!("Received SIGINT signal"),
        _ = sigterm.recv() => info!("Received SIGTERM signal"),
    }
}
