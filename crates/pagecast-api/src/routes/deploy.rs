//! Deployment submission and status endpoints.

use axum::extract::{Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use pagecast_core::JobId;
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

/// Status reported for ids the store has never seen.
const NOT_FOUND_STATUS: &str = "not-found";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/deploy", post(deploy))
        .route("/status", get(status))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeployRequest {
    repo_url: String,
}

#[derive(Debug, Serialize)]
struct DeployResponse {
    id: String,
}

async fn deploy(
    State(state): State<AppState>,
    Json(req): Json<DeployRequest>,
) -> Result<Json<DeployResponse>, ApiError> {
    let job_id = state.ingest.deploy(&req.repo_url).await?;
    Ok(Json(DeployResponse {
        id: job_id.to_string(),
    }))
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    id: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    id: String,
    status: String,
}

async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<StatusResponse>, ApiError> {
    let job_id = JobId::parse(query.id)?;
    let status = state.status.get_status(&job_id).await?;
    Ok(Json(StatusResponse {
        id: job_id.to_string(),
        status: status
            .map(|s| s.as_str())
            .unwrap_or(NOT_FOUND_STATUS)
            .to_string(),
    }))
}
