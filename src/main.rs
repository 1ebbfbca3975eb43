// src/main.rs

use std::{sync::Arc, time::Duration};

use quiz_service::{
    clients::{
        auth::{AuthGateway, HttpAuthGateway, JwtAuthGateway},
        outbox::StatsOutbox,
        stats::{HttpStatsRecorder, NoopStatsRecorder, RetryPolicy, StatsRecorder},
    },
    config::{AuthMode, Config},
    engine::{EngineOptions, SessionOrchestrator},
    routes,
    state::AppState,
    storage::postgres::PgStore,
};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Stats events waiting for delivery before new ones are dropped.
const STATS_QUEUE_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration from environment (and .env, if present)
    let config = Config::from_env()?;

    let file_appender = tracing_appender::rolling::daily("logs", "quiz.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = EnvFilter::new(&config.rust_log);
    let stdout_layer = fmt::layer().with_writer(std::io::stdout).with_target(false);
    let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);

    // Initialize Tracing (Logging)
    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    let pool = connect_with_retry(&config.database_url).await?;
    tracing::info!("Database connected...");

    // Run Migrations Automatically
    tracing::info!("Running migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    tracing::info!("Migrations applied successfully.");

    let store = Arc::new(PgStore::new(pool));

    let auth: Arc<dyn AuthGateway> = match &config.auth {
        AuthMode::Remote(url) => {
            tracing::info!("Verifying credentials with auth service at {}", url);
            Arc::new(HttpAuthGateway::new(url.clone(), config.outbound_timeout)?)
        }
        AuthMode::LocalJwt(secret) => {
            tracing::info!("Verifying credentials locally (HS256)");
            Arc::new(JwtAuthGateway::new(secret.clone()))
        }
    };

    let stats: Arc<dyn StatsRecorder> = match &config.stats_service_url {
        Some(url) => {
            tracing::info!("Reporting quiz events to stats service at {}", url);
            let policy = RetryPolicy {
                max_attempts: config.stats_max_attempts,
                backoff: config.stats_retry_backoff,
                attempt_timeout: config.outbound_timeout,
            };
            Arc::new(HttpStatsRecorder::new(url.clone(), policy)?)
        }
        None => {
            tracing::warn!("STATS_SERVICE_URL not set, quiz events will not be reported");
            Arc::new(NoopStatsRecorder)
        }
    };

    let outbox = StatsOutbox::start(stats, config.stats_deadline(), STATS_QUEUE_CAPACITY);

    let orchestrator = Arc::new(SessionOrchestrator::new(
        store.clone(),
        store.clone(),
        store.clone(),
        outbox,
        EngineOptions {
            default_time_limit_secs: config.default_time_limit_secs,
        },
    ));

    let state = AppState {
        orchestrator: orchestrator.clone(),
        questions: store.clone(),
        settings: store,
        auth,
        config: config.clone(),
    };

    // Create the Axum application router
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr).await?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, delivering queued stats events...");
    let drain = config.stats_deadline() * 2;
    if tokio::time::timeout(drain, orchestrator.flush_stats()).await.is_err() {
        tracing::warn!("Stats events still queued after {:?}, dropping them", drain);
    }
    Ok(())
}

/// Connects to Postgres, retrying while the database is still starting up.
async fn connect_with_retry(database_url: &str) -> Result<PgPool, sqlx::Error> {
    let mut retry_count = 0;
    loop {
        match PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) => {
                retry_count += 1;
                if retry_count > 5 {
                    tracing::error!("Failed to connect to database after 5 retries: {}", e);
                    return Err(e);
                }
                tracing::warn!("Database not ready, retrying in 2s... (Attempt {})", retry_count);
                tokio::time::sleep(Duration::from_secs(2)).await;
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
