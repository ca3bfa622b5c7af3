use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::de::DeserializeOwned;
use tracing::info;

use super::{
    error::ApiError,
    models::{
        CancelResponse, CollectionRequest, CollectionResponse, CollectionVideo, HealthResponse,
        InfoRequest, InfoResponse, JobAcceptedResponse, JobListResponse, StartBatchRequest,
        StartJobRequest,
    },
    state::AppState,
    validation,
};
use crate::jobs::{Job, JobId};

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, ApiError> {
    Ok(serde_json::from_slice(body)?)
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::InvalidPayload(format!("invalid job id: {}", raw)))
}

/// Resolve metadata and quality options (POST /api/info)
pub async fn fetch_info(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: InfoRequest = parse_body(&body)?;
    validation::validate_single_url(&request.url)?;

    let summary = state.orchestrator.fetch_metadata(&request.url).await?;
    Ok(Json(InfoResponse::from(summary)))
}

/// List a channel or playlist without downloading (POST /api/collection)
pub async fn list_collection(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: CollectionRequest = parse_body(&body)?;
    validation::validate_collection(&request)?;

    let max_items = request
        .max_videos
        .unwrap_or(state.config.defaults.max_collection_items);
    let videos: Vec<CollectionVideo> = state
        .orchestrator
        .list_collection(&request.url, Some(max_items))
        .await?
        .into_iter()
        .map(CollectionVideo::from)
        .collect();

    Ok(Json(CollectionResponse {
        count: videos.len(),
        videos,
    }))
}

/// Start one download (POST /api/jobs)
pub async fn start_job(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: StartJobRequest = parse_body(&body)?;
    validation::validate_single_url(&request.url)?;

    let job_id = state
        .orchestrator
        .start_single(&request.url, request.quality.as_deref().unwrap_or_default())?;
    info!(job_id = %job_id, "Job accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAcceptedResponse { job_id, items: 1 }),
    ))
}

/// Start a batch of downloads (POST /api/batches)
pub async fn start_batch(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: StartBatchRequest = parse_body(&body)?;
    validation::validate_batch(&request, state.config.server.max_batch_items)?;

    let items = request.videos.len();
    let batch_id = state.orchestrator.start_batch_items(
        request.videos,
        request.quality.as_deref().unwrap_or_default(),
    )?;
    info!(batch_id = %batch_id, items, "Batch accepted");

    Ok((
        StatusCode::ACCEPTED,
        Json(JobAcceptedResponse {
            job_id: batch_id,
            items,
        }),
    ))
}

/// All known jobs in creation order (GET /api/jobs)
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs = state.orchestrator.list();
    Json(JobListResponse {
        count: jobs.len(),
        jobs,
    })
}

/// Job or batch status (GET /api/jobs/{job_id})
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    Ok(Json(state.orchestrator.get_status(job_id)?))
}

/// Cancel a job, or every unfinished child of a batch (DELETE /api/jobs/{job_id})
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let cancelled = state.orchestrator.cancel(job_id)?;
    Ok(Json(CancelResponse { job_id, cancelled }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let orchestrator = &state.orchestrator;
    let response = HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        pool: orchestrator.pool_stats(),
        jobs: orchestrator.registry().len(),
        metrics: orchestrator.metrics().snapshot(),
    };

    (StatusCode::OK, Json(response))
}
