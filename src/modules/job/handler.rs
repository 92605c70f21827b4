use super::dto::{CreateJobRequest, JobListResponse, JobResponse, JobStatsResponse, ListJobsQuery};
use super::service::JobService;
use crate::common::response::{ApiError, ApiResponse, ApiSuccess};
use crate::state::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

/// Submit a fetch + transcode job
#[utoipa::path(
    post,
    path = "/api/v1/jobs",
    request_body = CreateJobRequest,
    responses(
        (status = 202, description = "Job accepted", body = ApiResponse<JobResponse>),
        (status = 400, description = "Invalid source or unsupported format"),
        (status = 503, description = "Scheduler is shutting down")
    ),
    tag = "Jobs"
)]
pub async fn submit_job(
    State(state): State<AppState>,
    Json(payload): Json<CreateJobRequest>,
) -> impl IntoResponse {
    match JobService::submit(state, payload).await {
        Ok(job) => ApiSuccess(ApiResponse::success(job, "Job accepted"), StatusCode::ACCEPTED).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// List jobs in creation order
#[utoipa::path(
    get,
    path = "/api/v1/jobs",
    params(ListJobsQuery),
    responses(
        (status = 200, description = "One page of jobs", body = ApiResponse<JobListResponse>)
    ),
    tag = "Jobs"
)]
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> impl IntoResponse {
    match JobService::list(state, query).await {
        Ok(page) => ApiSuccess(ApiResponse::success(page, "Jobs retrieved successfully"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Get job status by ID
#[utoipa::path(
    get,
    path = "/api/v1/jobs/{id}",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job snapshot", body = ApiResponse<JobResponse>),
        (status = 404, description = "Job not found")
    ),
    tag = "Jobs"
)]
pub async fn get_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match JobService::find_by_id(state, id).await {
        Ok(job) => ApiSuccess(ApiResponse::success(job, "Job retrieved successfully"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Cancel a job that has not finished yet
#[utoipa::path(
    post,
    path = "/api/v1/jobs/{id}/cancel",
    params(
        ("id" = Uuid, Path, description = "Job ID")
    ),
    responses(
        (status = 200, description = "Job cancelled", body = ApiResponse<JobResponse>),
        (status = 404, description = "Job not found"),
        (status = 409, description = "Job already reached a terminal state")
    ),
    tag = "Jobs"
)]
pub async fn cancel_job(State(state): State<AppState>, Path(id): Path<Uuid>) -> impl IntoResponse {
    match JobService::cancel(state, id).await {
        Ok(job) => ApiSuccess(ApiResponse::success(job, "Job cancelled"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}

/// Job counts per state and worker usage
#[utoipa::path(
    get,
    path = "/api/v1/stats",
    responses(
        (status = 200, description = "Statistics", body = ApiResponse<JobStatsResponse>)
    ),
    tag = "Jobs"
)]
pub async fn job_stats(State(state): State<AppState>) -> impl IntoResponse {
    match JobService::stats(state).await {
        Ok(stats) => ApiSuccess(ApiResponse::success(stats, "Statistics retrieved successfully"), StatusCode::OK).into_response(),
        Err(e) => ApiError::from(e).into_response(),
    }
}
