//! Job handlers.
//!
//! Submission returns `202` as soon as the job record exists; clients poll
//! `GET /jobs/:id` and fetch the artifact from `GET /jobs/:id/download`.

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use reel_models::{CompositeJobRequest, FailureCode, JobId, JobKind, JobRecord, JobState};
use serde::Serialize;
use serde_json::Value;
use tokio_util::io::ReaderStream;
use tracing::{error, info};
use validator::Validate;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

// ============================================================================
// Types
// ============================================================================

/// Response to an accepted submission.
#[derive(Debug, Serialize)]
pub struct JobAcceptedResponse {
    pub job_id: String,
    pub status_url: String,
}

impl JobAcceptedResponse {
    fn new(job_id: &JobId) -> Self {
        Self {
            job_id: job_id.to_string(),
            status_url: format!("/jobs/{}", job_id),
        }
    }
}

/// Client-facing view of a job record.
#[derive(Debug, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub kind: JobKind,
    pub state: JobState,
    /// Progress percentage (0-100)
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<FailureCode>,
    /// Present once the job completed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<JobRecord> for JobSnapshot {
    fn from(record: JobRecord) -> Self {
        let download_url = (record.state == JobState::Completed)
            .then(|| format!("/jobs/{}/download", record.id));
        Self {
            job_id: record.id.to_string(),
            kind: record.kind,
            state: record.state,
            progress: record.progress,
            error: record.error,
            error_code: record.error_code,
            download_url,
            created_at: record.created_at.to_rfc3339(),
            started_at: record.started_at.map(|t| t.to_rfc3339()),
            completed_at: record.completed_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobSnapshot>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub job_id: String,
    pub cancelling: bool,
}

#[derive(Debug, Serialize)]
pub struct EffectListResponse {
    pub effects: Vec<String>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /jobs/:effect_id
///
/// Submit a single-effect render with raw JSON parameters.
pub async fn create_job(
    State(state): State<AppState>,
    Path(effect_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobAcceptedResponse>)> {
    let Json(raw) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;

    let bundle = state.builder.build(&effect_id, &raw)?;
    let job_id = state.orchestrator.submit_single(bundle)?;
    info!(job_id = %job_id, effect_id = %effect_id, "Accepted render job");

    Ok((StatusCode::ACCEPTED, Json(JobAcceptedResponse::new(&job_id))))
}

/// POST /jobs/composite
///
/// Submit an ordered list of effects rendered and merged into one video.
pub async fn create_composite_job(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<JobAcceptedResponse>)> {
    let Json(raw) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let request: CompositeJobRequest = serde_json::from_value(raw)
        .map_err(|e| ApiError::Validation(format!("Invalid composite request: {}", e)))?;
    request.validate()?;

    let spec = request.build_spec(state.builder.as_ref())?;
    let steps = spec.len();
    let job_id = state.orchestrator.submit_composite(spec)?;
    info!(
        job_id = %job_id,
        steps,
        merge_mode = %request.merge_mode,
        "Accepted composite render job"
    );

    Ok((StatusCode::ACCEPTED, Json(JobAcceptedResponse::new(&job_id))))
}

/// GET /jobs/:job_id
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobSnapshot>> {
    let job_id = parse_job_id(&job_id)?;
    let record = state
        .store()
        .get(&job_id)
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", job_id)))?;

    Ok(Json(record.into()))
}

/// GET /jobs
///
/// All jobs, newest first.
pub async fn list_jobs(State(state): State<AppState>) -> Json<JobListResponse> {
    let jobs: Vec<JobSnapshot> = state.store().list().into_iter().map(Into::into).collect();
    Json(JobListResponse {
        total: jobs.len(),
        jobs,
    })
}

/// GET /jobs/:job_id/download
///
/// Streams the artifact of a completed job.
///
/// Returns:
/// - 200: the MP4 as an attachment
/// - 404: unknown job, or `artifact_missing` when the file is gone
/// - 409: job not completed
pub async fn download_artifact(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let job_id = parse_job_id(&job_id)?;
    let record = state
        .store()
        .get(&job_id)
        .ok_or_else(|| ApiError::not_found(format!("Job {} not found", job_id)))?;

    let artifact = match (record.state, record.output_artifact) {
        (JobState::Completed, Some(artifact)) => artifact,
        (JobState::Completed, None) => {
            error!(job_id = %job_id, "Completed job has no artifact recorded");
            return Err(ApiError::internal("completed job has no artifact"));
        }
        (other, _) => {
            return Err(ApiError::conflict(format!(
                "Job {} is {}, not completed",
                job_id, other
            )))
        }
    };

    let path = state.orchestrator.artifact_path(&artifact);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            error!(
                job_id = %job_id,
                path = %path.display(),
                "Artifact of completed job is missing from disk (data loss)"
            );
            return Err(ApiError::ArtifactMissing(artifact));
        }
        Err(e) => {
            return Err(ApiError::internal(format!(
                "Failed to open artifact {}: {}",
                path.display(),
                e
            )))
        }
    };
    let length = file
        .metadata()
        .await
        .map_err(|e| ApiError::internal(format!("Failed to stat artifact: {}", e)))?
        .len();

    let headers = [
        (header::CONTENT_TYPE, "video/mp4".to_string()),
        (header::CONTENT_LENGTH, length.to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", artifact),
        ),
    ];
    Ok((headers, Body::from_stream(ReaderStream::new(file))).into_response())
}

/// POST /jobs/:job_id/cancel
///
/// Returns:
/// - 202: cancellation signalled
/// - 404: unknown job
/// - 409: job already terminal
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    let job_id = parse_job_id(&job_id)?;
    state.orchestrator.cancel(&job_id)?;
    info!(job_id = %job_id, "Cancellation requested");

    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id: job_id.to_string(),
            cancelling: true,
        }),
    ))
}

/// GET /effects
pub async fn list_effects(State(state): State<AppState>) -> Json<EffectListResponse> {
    let mut effects = state.builder.effect_ids();
    effects.sort();
    Json(EffectListResponse { effects })
}

// ============================================================================
// Helpers
// ============================================================================

fn parse_job_id(id: &str) -> ApiResult<JobId> {
    if is_valid_job_id(id) {
        Ok(JobId::from_string(id))
    } else {
        Err(ApiError::bad_request("Invalid job ID format"))
    }
}

/// Valid format: alphanumeric characters and hyphens only, 8-64 chars.
fn is_valid_job_id(id: &str) -> bool {
    (8..=64).contains(&id.len()) && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_job_ids() {
        assert!(is_valid_job_id("render-20261016-1760616000123456"));
        assert!(is_valid_job_id("abc-1234-def"));
    }

    #[test]
    fn test_invalid_job_ids() {
        assert!(!is_valid_job_id(""));
        assert!(!is_valid_job_id("short"));
        assert!(!is_valid_job_id("has space"));
        assert!(!is_valid_job_id("../../etc/passwd"));
        assert!(!is_valid_job_id("has.dot.mp4"));
        assert!(!is_valid_job_id(&"a".repeat(65)));
    }
}
