//! Video job handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vchat_models::{job_schema, Job, JobId, JobStatus};
use vchat_store::{JobStore, NewJob};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Register an already-stored upload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterVideoRequest {
    /// Stored filename of the upload
    pub filename: String,
    /// Name the user uploaded it under (defaults to `filename`)
    #[serde(default)]
    pub original_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ProcessVideoRequest {
    /// Natural-language editing instruction
    #[serde(default)]
    pub command: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessVideoResponse {
    pub message: String,
    pub status: JobStatus,
    pub run_id: String,
}

/// List all jobs, oldest first.
pub async fn list_videos(State(state): State<AppState>) -> ApiResult<Json<Vec<Job>>> {
    Ok(Json(state.store.list().await?))
}

/// JSON Schema of the job records returned by the video endpoints.
pub async fn video_schema() -> impl IntoResponse {
    Json(job_schema())
}

/// Get a single job.
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state
        .store
        .get(&JobId::from(video_id))
        .await?
        .ok_or_else(|| ApiError::not_found("Video not found"))?;

    Ok(Json(job))
}

/// Register an uploaded file as a new job in `uploaded` state.
pub async fn register_video(
    State(state): State<AppState>,
    Json(request): Json<RegisterVideoRequest>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let original_name = request
        .original_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| request.filename.clone());

    let job = state
        .store
        .create(NewJob::new(request.filename, original_name))
        .await?;

    info!(job_id = %job.id, source = %job.source_artifact, "Registered video");
    Ok((StatusCode::CREATED, Json(job)))
}

/// Start processing a job with a natural-language command.
pub async fn process_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    Json(request): Json<ProcessVideoRequest>,
) -> ApiResult<Json<ProcessVideoResponse>> {
    let job_id = JobId::from(video_id);
    let ack = state.orchestrator.submit(&job_id, &request.command).await?;

    Ok(Json(ProcessVideoResponse {
        message: ack.message,
        status: ack.status,
        run_id: ack.run_id.to_string(),
    }))
}

/// Give up on a job's running worker and mark the job failed.
pub async fn abandon_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state.orchestrator.abandon(&JobId::from(video_id)).await?;
    Ok(Json(job))
}
