//! Web layer
//!
//! Thin HTTP surface over the scheduler: a health probe, a stats snapshot,
//! and manual triggers for the enqueue and consume passes. Handlers contain
//! no business logic; they delegate to `SchedulerService`.

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::Config;
use crate::database::Database;
use crate::scheduler::SchedulerService;

#[derive(Clone)]
pub struct AppState {
    pub database: Database,
    pub scheduler: Arc<SchedulerService>,
}

pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(config: &Config, database: Database, scheduler: Arc<SchedulerService>) -> Result<Self> {
        let app = create_router(AppState {
            database,
            scheduler,
        });
        let addr: SocketAddr = format!("{}:{}", config.web.host, config.web.port).parse()?;

        Ok(Self { app, addr })
    }

    pub async fn run(self) -> Result<()> {
        tracing::info!("Web server listening on {}", self.addr);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        axum::serve(listener, self.app).await?;
        Ok(())
    }
}

/// Build the router; also used directly by integration tests.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        .route("/scheduler/stats", get(scheduler_stats))
        .route("/scheduler/run", post(run_consumer))
        .route("/scheduler/enqueue", post(run_enqueuer))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    // A failing query here means the probe should fail too
    match state.database.count_jobs_by_status().await {
        Ok(_) => Json(json!({
            "status": "healthy",
            "service": "crawl-scheduler",
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "status": "unhealthy", "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn scheduler_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.stats(Utc::now()).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => internal_error(e),
    }
}

#[derive(Debug, Deserialize)]
struct RunParams {
    /// Pin the run to one shard instead of the clock-selected window.
    shard: Option<u32>,
}

async fn run_consumer(
    State(state): State<AppState>,
    Query(params): Query<RunParams>,
) -> impl IntoResponse {
    match state.scheduler.run_consumer(params.shard, Utc::now()).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => internal_error(e),
    }
}

async fn run_enqueuer(State(state): State<AppState>) -> impl IntoResponse {
    match state.scheduler.run_enqueuer(Utc::now()).await {
        Ok(report) => Json(report).into_response(),
        Err(e) => internal_error(e),
    }
}

fn internal_error(e: anyhow::Error) -> axum::response::Response {
    tracing::error!("Request failed: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}
