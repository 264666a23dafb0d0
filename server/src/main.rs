use axum::routing::get;
use axum::Router;
use core::config::PipelineConfig;
use core::orchestrator::Trigger;
use dotenv::dotenv;
use sqlx::sqlite::SqlitePool;
use std::net::SocketAddr;
use tokio_cron_scheduler::{Job, JobScheduler};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod error;
mod routes;
mod state;

use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting weather reschedule server...");

    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
        tracing::warn!("DATABASE_URL not set, using default: sqlite:reschedule.db");
        "sqlite:reschedule.db".to_string()
    });

    tracing::info!("Connecting to database...");
    let db = SqlitePool::connect(&database_url).await.map_err(|e| {
        tracing::error!("Failed to connect to database '{}': {}", database_url, e);
        e
    })?;

    tracing::info!("Running database migrations...");
    sqlx::migrate!("../migrations").run(&db).await.map_err(|e| {
        tracing::error!("Database migration failed: {}", e);
        e
    })?;
    tracing::info!("Database migrations completed");

    let config = PipelineConfig::from_env();
    let state = AppState::new(db.clone(), config);

    let cors = build_cors();

    let app = Router::new()
        .route("/health", get(health_check))
        .merge(routes::router())
        .layer(cors)
        .with_state(state.clone());

    let scheduler_orchestrator = state.orchestrator.clone();
    tokio::spawn(async move {
        if let Err(e) = start_pipeline_scheduler(scheduler_orchestrator).await {
            tracing::error!("scheduler error: {}", e);
        }
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    tracing::info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Hourly pipeline run: ingest forecasts, classify, and auto-reschedule
/// anything inside the horizon, for the default flight scope.
async fn start_pipeline_scheduler(
    orchestrator: std::sync::Arc<core::orchestrator::Orchestrator>,
) -> anyhow::Result<()> {
    let scheduler = JobScheduler::new().await?;

    let job = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let orchestrator = orchestrator.clone();
        Box::pin(async move {
            let outcome = orchestrator.run(Trigger::Cron, None).await;
            tracing::info!(
                correlation_id = %outcome.correlation_id,
                status = outcome.status.as_str(),
                "hourly pipeline run completed"
            );
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;

    // JobScheduler runs its own background tokio tasks; park this task so
    // the scheduler handle (and its jobs) aren't dropped.
    std::future::pending::<()>().await;
    Ok(())
}

fn build_cors() -> CorsLayer {
    if let Ok(origins_str) = std::env::var("ALLOWED_ORIGINS") {
        if origins_str.trim() == "*" {
            tracing::warn!("CORS configured to allow any origin - NOT RECOMMENDED FOR PRODUCTION");
            CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([axum::http::header::CONTENT_TYPE])
        } else {
            let origins: Vec<_> = origins_str
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            tracing::info!("CORS configured with allowed origins: {:?}", origins);
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers([axum::http::header::CONTENT_TYPE])
        }
    } else {
        tracing::warn!("ALLOWED_ORIGINS not set, using default (http://localhost:8000)");
        let origins = vec!["http://localhost:8000".parse().unwrap()];
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    }
}

async fn health_check() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}
