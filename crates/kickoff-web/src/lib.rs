//! Admin HTTP triggers for the sync pipeline.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use kickoff_sync::{pipeline_from_env, SyncError, SyncPipeline};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "kickoff-web";

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<SyncPipeline>,
    /// Shared secret for the trigger endpoints. Unset means they always refuse.
    pub sync_secret: Option<String>,
}

impl AppState {
    pub fn new(pipeline: Arc<SyncPipeline>, sync_secret: Option<String>) -> Self {
        Self {
            pipeline,
            sync_secret: sync_secret.filter(|s| !s.is_empty()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Sync(err) => {
                error!(error = %err, "sync request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct KeyQuery {
    key: Option<String>,
}

/// Compare digests so the check takes the same time wherever the inputs differ.
fn key_matches(provided: Option<&str>, secret: Option<&str>) -> bool {
    let (Some(provided), Some(secret)) = (provided, secret) else {
        return false;
    };
    let a = Sha256::digest(provided.as_bytes());
    let b = Sha256::digest(secret.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn authorize(state: &AppState, query: &KeyQuery) -> Result<(), ApiError> {
    if key_matches(query.key.as_deref(), state.sync_secret.as_deref()) {
        Ok(())
    } else {
        warn!("rejected sync trigger with bad key");
        Err(ApiError::Unauthorized)
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/api/sync", get(full_sync_handler))
        .route("/api/sync/scores", get(score_sync_handler))
        .route("/api/reset", post(reset_handler))
        .route("/api/gameweeks/current", get(current_gameweek_handler))
        .with_state(Arc::new(state))
}

/// Serve the admin API. When the scheduler is enabled its cron jobs run
/// alongside the server for as long as it is up.
pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("KICKOFF_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    let pipeline = Arc::new(pipeline_from_env().await?);
    let scheduler = pipeline.maybe_build_scheduler().await?;
    if let Some(sched) = &scheduler {
        sched.start().await?;
        info!("scheduler started");
    }

    let state = AppState::new(pipeline, std::env::var("SYNC_SECRET").ok());
    if state.sync_secret.is_none() {
        warn!("SYNC_SECRET is not set; trigger endpoints will refuse every request");
    }
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn healthz_handler() -> Response {
    Json(json!({ "status": "ok" })).into_response()
}

async fn full_sync_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyQuery>,
) -> Result<Response, ApiError> {
    authorize(&state, &query)?;
    let summary = state.pipeline.run_full_sync().await?;
    Ok(Json(summary).into_response())
}

async fn score_sync_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyQuery>,
) -> Result<Response, ApiError> {
    authorize(&state, &query)?;
    let summary = state.pipeline.run_score_only_sync().await?;
    Ok(Json(summary).into_response())
}

async fn reset_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<KeyQuery>,
) -> Result<Response, ApiError> {
    authorize(&state, &query)?;
    let summary = state.pipeline.run_destructive_resync().await?;
    Ok(Json(summary).into_response())
}

async fn current_gameweek_handler(State(state): State<Arc<AppState>>) -> Result<Response, ApiError> {
    let resolution = state.pipeline.resolve_stored_current().await?;
    Ok(Json(resolution).into_response())
}
