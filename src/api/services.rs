use std::sync::Arc;

use axum::{Json, extract::State, http::HeaderMap, response::IntoResponse};
use http_body_util::BodyExt;
use serde::de::DeserializeOwned;

use super::{
    models::{
        ActionResponse, EnqueueRequest, HealthResponse, JobAcceptedResponse, ListParams,
        MaterializeRequest, MaterializeResponse,
    },
    state::AppState,
};
use crate::api::error::ApiError;
use crate::jobs::{Job, JobQueue, JobType};
use crate::model::Manifest;
use crate::sources::{self, ChunkingSource, IngestSource};

const MAX_PAYLOAD_SIZE: usize = 5 * 1024 * 1024;

const DEFAULT_LIST_LIMIT: usize = 20;

const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Job enqueue endpoint (POST /jobs).
///
/// Deserializes the typed envelope before anything is persisted, so a
/// payload with an unknown source type or malformed scope is rejected here
/// with 400 and never reaches a worker. Returns 202 with the job id; the
/// front-end then polls GET /jobs/{id} to stream status.
pub async fn enqueue_job(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: EnqueueRequest = read_json_body(&headers, body).await?;

    let queue = state.queues.queue(request.job_type);
    let id = queue.enqueue(request.payload)?;
    state.metrics.job_enqueued();

    let response = JobAcceptedResponse {
        id,
        queue: request.job_type.queue_name().to_string(),
    };
    Ok((axum::http::StatusCode::ACCEPTED, Json(response)))
}

/// Manifest pre-materialization endpoint (POST /artifacts).
///
/// Traverses the sources on a background task (the interactive caller only
/// awaits its completion), stores the resulting manifest, and returns the
/// artifact key for a later enqueue.
pub async fn materialize(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Body,
) -> Result<impl IntoResponse, ApiError> {
    let request: MaterializeRequest = read_json_body(&headers, body).await?;

    let source = build_source(&state, &request)?;
    let artifacts = state.artifacts.clone();
    let handle = tokio::spawn(async move {
        let manifest: Manifest = sources::materialize(source.as_ref())
            .await
            .map_err(|e| ApiError::Internal(format!("source traversal failed: {e}")))?;
        let key = artifacts
            .put_manifest(&manifest)
            .await
            .map_err(|e| ApiError::Internal(format!("manifest store failed: {e}")))?;
        Ok::<_, ApiError>((key, manifest.count))
    });
    let (artifact_key, count) = handle
        .await
        .map_err(|e| ApiError::Internal(format!("materialize task failed: {e}")))??;

    state.metrics.manifest_stored();
    Ok((
        axum::http::StatusCode::OK,
        Json(MaterializeResponse {
            artifact_key,
            count,
        }),
    ))
}

fn build_source(
    state: &AppState,
    request: &MaterializeRequest,
) -> Result<Arc<dyn IngestSource>, ApiError> {
    let composite = sources::build_sources(&request.sources, &state.sources_ctx)
        .map_err(|e| ApiError::InvalidPayload(e.to_string()))?;
    match request.chunk_size.filter(|size| *size > 0) {
        Some(chunk_size) => Ok(Arc::new(ChunkingSource::new(
            Arc::new(composite),
            chunk_size,
            request.chunk_overlap.unwrap_or(DEFAULT_CHUNK_OVERLAP),
        ))),
        None => Ok(Arc::new(composite)),
    }
}

/// Job listing endpoint (GET /jobs), newest first across queues.
pub async fn list_jobs(
    State(state): State<AppState>,
    axum::extract::Query(params): axum::extract::Query<ListParams>,
) -> Result<impl IntoResponse, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let queues: Vec<JobType> = match params.queue {
        Some(queue) => vec![queue],
        None => JobType::ALL.to_vec(),
    };

    let mut jobs: Vec<Job> = Vec::new();
    for job_type in queues {
        jobs.extend(state.queues.queue(job_type).list(limit, params.status)?);
    }
    jobs.sort_by(|a, b| b.id.cmp(&a.id));
    jobs.truncate(limit);

    Ok((axum::http::StatusCode::OK, Json(jobs)))
}

/// Job status endpoint (GET /jobs/{id}).
pub async fn get_job(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let (_, job) = find_job(&state, id)?.ok_or_else(|| ApiError::NotFound(format!("job {id}")))?;
    Ok((axum::http::StatusCode::OK, Json(job)))
}

/// Cancel endpoint (POST /jobs/{id}/cancel).
///
/// Allowed from `pending | processing`; a processing job is canceled
/// cooperatively at the worker's next progress checkpoint.
pub async fn cancel_job(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let (queue, _) = find_job(&state, id)?.ok_or_else(|| ApiError::NotFound(format!("job {id}")))?;
    let ok = queue.cancel(id)?;
    Ok((axum::http::StatusCode::OK, Json(ActionResponse { id, ok })))
}

/// Retry endpoint (POST /jobs/{id}/retry). Allowed from `failed | canceled`.
pub async fn retry_job(
    State(state): State<AppState>,
    axum::extract::Path(id): axum::extract::Path<u64>,
) -> Result<impl IntoResponse, ApiError> {
    let (queue, _) = find_job(&state, id)?.ok_or_else(|| ApiError::NotFound(format!("job {id}")))?;
    let ok = queue.retry(id)?;
    Ok((axum::http::StatusCode::OK, Json(ActionResponse { id, ok })))
}

/// Health endpoint (GET /health).
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    use std::collections::HashMap;

    let mut components = HashMap::new();
    components.insert("api".to_string(), "healthy".to_string());
    components.insert("jobs".to_string(), "healthy".to_string());
    components.insert("artifacts".to_string(), "healthy".to_string());

    let response = HealthResponse {
        status: "healthy".to_string(),
        components,
        metrics: state.metrics.snapshot(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    (axum::http::StatusCode::OK, Json(response))
}

/// Ids are global across queues; probe each queue for the owning one.
fn find_job(state: &AppState, id: u64) -> Result<Option<(JobQueue, Job)>, ApiError> {
    for job_type in JobType::ALL {
        let queue = state.queues.queue(job_type);
        if let Some(job) = queue.get(id)? {
            if job.job_type == job_type {
                return Ok(Some((queue, job)));
            }
        }
    }
    Ok(None)
}

/// Validate content type, enforce the size cap, and deserialize the body.
async fn read_json_body<T: DeserializeOwned>(
    headers: &HeaderMap,
    body: axum::body::Body,
) -> Result<T, ApiError> {
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::InvalidPayload("missing Content-Type header".into()))?;
    super::utils::parse_content_type(content_type)?;

    let data = body
        .collect()
        .await
        .map_err(|err| ApiError::Internal(err.to_string()))?
        .to_bytes();
    super::utils::validate_body_size(&data, MAX_PAYLOAD_SIZE)?;

    Ok(serde_json::from_slice(&data)?)
}
