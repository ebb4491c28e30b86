//! Job status, cancellation and retry.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use vf_core::{Job, JobId, JobState};

use crate::context::AppContext;
use crate::error::AppError;
use crate::middleware::request_id::RequestId;
use crate::routes::parse_id;
use crate::{status, submit};

/// Query parameters for listing jobs.
#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct ListJobsParams {
    /// PENDING, STARTED, SUCCESS or FAILURE.
    pub state: Option<String>,
    #[serde(default)]
    pub offset: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}

fn default_limit() -> i64 {
    50
}

/// Returned when a job is accepted. Poll `GET /api/jobs/{job_id}` for progress.
#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct SubmitResponse {
    pub job_id: String,
    pub state: String,
}

impl SubmitResponse {
    pub fn from_model(job: &Job) -> Self {
        Self {
            job_id: job.id.to_string(),
            state: job.state.to_string(),
        }
    }
}

#[derive(Debug, Serialize, utoipa::ToSchema)]
pub struct JobResponse {
    pub id: String,
    pub kind: String,
    pub asset_id: String,
    pub state: String,
    pub claimed_by: Option<String>,
    pub result_asset_id: Option<String>,
    pub error: Option<String>,
    /// Tail of the transcoder's stderr, decoded leniently.
    pub diagnostics: Option<String>,
    pub attempt: u32,
    pub retry_of: Option<String>,
    pub created_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl JobResponse {
    pub fn from_model(job: &Job) -> Self {
        Self {
            id: job.id.to_string(),
            kind: job.request.kind().to_string(),
            asset_id: job.request.asset_id().to_string(),
            state: job.state.to_string(),
            claimed_by: job.claimed_by.clone(),
            result_asset_id: job.result_asset_id.map(|id| id.to_string()),
            error: job.error.as_ref().map(|e| e.message.clone()),
            diagnostics: job
                .error
                .as_ref()
                .and_then(|e| e.diagnostics_text())
                .map(|text| text.into_owned()),
            attempt: job.attempt,
            retry_of: job.retry_of.map(|id| id.to_string()),
            created_at: job.created_at.to_rfc3339(),
            started_at: job.started_at.map(|t| t.to_rfc3339()),
            finished_at: job.finished_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// GET /api/jobs
#[utoipa::path(
    get,
    path = "/api/jobs",
    params(ListJobsParams),
    responses(
        (status = 200, description = "List jobs", body = Vec<JobResponse>),
        (status = 400, description = "Unknown state filter")
    )
)]
pub async fn list_jobs(
    State(ctx): State<AppContext>,
    Query(params): Query<ListJobsParams>,
) -> Result<Json<Vec<JobResponse>>, AppError> {
    let state = params
        .state
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(str::parse::<JobState>)
        .transpose()?;

    let jobs = status::list(&ctx, state, params.offset, params.limit)?;
    Ok(Json(jobs.iter().map(JobResponse::from_model).collect()))
}

/// GET /api/jobs/{id}
#[utoipa::path(
    get,
    path = "/api/jobs/{id}",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job details", body = JobResponse),
        (status = 404, description = "Job not found")
    )
)]
pub async fn get_job(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    let job_id: JobId = parse_id(&id, "job")?;
    let job = status::get_status(&ctx, job_id)?;
    Ok(Json(JobResponse::from_model(&job)))
}

/// DELETE /api/jobs/{id}
#[utoipa::path(
    delete,
    path = "/api/jobs/{id}",
    params(("id" = String, Path, description = "Job ID")),
    responses(
        (status = 200, description = "Job cancelled", body = JobResponse),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job already started or finished")
    )
)]
pub async fn cancel_job(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<Json<JobResponse>, AppError> {
    let job_id: JobId = parse_id(&id, "job")?;
    let job = submit::cancel(&ctx, job_id)
        .await
        .map_err(|e| AppError::from(e).with_request_id(&request_id))?;
    Ok(Json(JobResponse::from_model(&job)))
}

/// POST /api/jobs/{id}/retry
#[utoipa::path(
    post,
    path = "/api/jobs/{id}/retry",
    params(("id" = String, Path, description = "Failed job ID")),
    responses(
        (status = 202, description = "Retry queued", body = SubmitResponse),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job has not failed or was already retried")
    )
)]
pub async fn retry_job(
    State(ctx): State<AppContext>,
    Extension(request_id): Extension<RequestId>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<SubmitResponse>), AppError> {
    let job_id: JobId = parse_id(&id, "job")?;
    let job = submit::retry(&ctx, job_id)
        .await
        .map_err(|e| AppError::from(e).with_request_id(&request_id))?;
    Ok((StatusCode::ACCEPTED, Json(SubmitResponse::from_model(&job))))
}
