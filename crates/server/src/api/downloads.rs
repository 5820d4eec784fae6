//! Download job API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use artifetch_core::{
    CreateJobRequest, DownloadJob, JobFilter, JobStatus, OrchestratorError, OrchestratorStatus,
    SourceKind,
};

use crate::metrics::DOWNLOADS_SUBMITTED;
use crate::state::AppState;

// ============================================================================
// Request/Response types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub kind: Option<SourceKind>,
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<DownloadJob>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub message: String,
}

fn error_response(err: OrchestratorError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        OrchestratorError::JobNotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::InvalidState { .. } => StatusCode::CONFLICT,
        OrchestratorError::Registry(_) | OrchestratorError::Snapshot(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/downloads
///
/// Submit a new download job.
pub async fn submit(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateJobRequest>,
) -> impl IntoResponse {
    let job = state.orchestrator().submit(request).await;
    DOWNLOADS_SUBMITTED.inc();
    (StatusCode::CREATED, Json(job))
}

/// GET /api/v1/downloads
///
/// List download jobs, optionally filtered, oldest first.
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> Json<JobListResponse> {
    let filter = JobFilter {
        status: params.status,
        kind: params.kind,
        limit: params.limit.unwrap_or(0),
        offset: params.offset.unwrap_or(0),
    };

    let jobs = state.orchestrator().list_jobs(&filter).await;
    let count = jobs.len();
    Json(JobListResponse { jobs, count })
}

/// GET /api/v1/downloads/status
///
/// Orchestrator-level counters.
pub async fn status(State(state): State<Arc<AppState>>) -> Json<OrchestratorStatus> {
    Json(state.orchestrator().status().await)
}

/// GET /api/v1/downloads/{id}
///
/// Latest known state of one job.
pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DownloadJob>, (StatusCode, Json<ErrorResponse>)> {
    state
        .orchestrator()
        .get_status(&id)
        .await
        .map(Json)
        .map_err(error_response)
}

/// POST /api/v1/downloads/{id}/cancel
///
/// Request cancellation. Acknowledges that cancellation was requested; the
/// terminal event on the job's topic confirms it.
pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, (StatusCode, Json<ErrorResponse>)> {
    state
        .orchestrator()
        .cancel(&id)
        .await
        .map(|()| {
            Json(SuccessResponse {
                message: format!("cancellation requested for job {}", id),
            })
        })
        .map_err(error_response)
}

/// POST /api/v1/downloads/{id}/resubmit
///
/// Create a fresh job from a terminal one.
pub async fn resubmit(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<DownloadJob>), (StatusCode, Json<ErrorResponse>)> {
    match state.orchestrator().resubmit(&id).await {
        Ok(job) => {
            DOWNLOADS_SUBMITTED.inc();
            Ok((StatusCode::CREATED, Json(job)))
        }
        Err(err) => Err(error_response(err)),
    }
}

/// DELETE /api/v1/downloads/{id}
///
/// Prune a terminal job from the registry and its snapshot.
pub async fn prune(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<DownloadJob>, (StatusCode, Json<ErrorResponse>)> {
    state
        .orchestrator()
        .prune(&id)
        .await
        .map(Json)
        .map_err(error_response)
}
