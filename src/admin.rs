//! Administrative HTTP surface
//!
//! Lets an operator see the active job, terminate it and push the supported
//! problem list without going through the job queue.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tracing::{error, info};

use crate::engine::{GradingEngine, JobSnapshot};

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub busy: bool,
}

#[derive(Debug, Serialize)]
pub struct TerminateResponse {
    /// Whether a job was running
    pub terminated: bool,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub problems: Vec<i64>,
}

async fn health(State(engine): State<Arc<GradingEngine>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        busy: engine.state().is_some(),
    })
}

async fn current(State(engine): State<Arc<GradingEngine>>) -> Json<Option<JobSnapshot>> {
    Json(engine.state())
}

async fn terminate(State(engine): State<Arc<GradingEngine>>) -> Json<TerminateResponse> {
    info!("Termination requested over admin API");
    Json(TerminateResponse {
        terminated: engine.request_termination().await,
    })
}

async fn refresh_problems(
    State(engine): State<Arc<GradingEngine>>,
) -> Result<Json<RefreshResponse>, (StatusCode, String)> {
    match engine.refresh_problems().await {
        Ok(problems) => Ok(Json(RefreshResponse { problems })),
        Err(e) => {
            error!("Failed to refresh supported problems: {:#}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e)))
        }
    }
}

pub fn routes(engine: Arc<GradingEngine>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/current", get(current))
        .route("/terminate", post(terminate))
        .route("/problems/refresh", post(refresh_problems))
        .with_state(engine)
}
