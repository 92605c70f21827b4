use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;
use validator::Validate;

use crate::common::error::ErrorDetail;
use crate::infrastructure::engine::Quality;
use crate::modules::job::model::{Job, JobResult, JobState, SourceInfo};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateJobRequest {
    /// Absolute http(s) link to the media.
    #[validate(url(message = "source must be an absolute URL"), length(max = 2048))]
    #[schema(example = "https://example.com/clip.mov")]
    pub source: String,
    /// `container/codec`, e.g. `mp4/h264`.
    #[validate(length(min = 3, max = 32, message = "format must look like container/codec"))]
    #[schema(example = "mp4/h264")]
    pub format: String,
    #[serde(default)]
    pub quality: Quality,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobResponse {
    pub id: Uuid,
    pub seq: u64,
    pub source: String,
    pub format: String,
    pub quality: Quality,
    pub state: JobState,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
    pub fetched: Option<SourceInfo>,
    pub result: Option<JobResult>,
    pub error: Option<ErrorDetail>,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id,
            seq: job.seq,
            source: job.source.to_string(),
            format: job.format.descriptor(),
            quality: job.format.quality,
            state: job.state,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            fetched: job.fetched,
            result: job.result,
            error: job.error,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    /// Pass as `after` to fetch the next page.
    pub next_cursor: Option<u64>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListJobsQuery {
    /// Only jobs in this state.
    pub state: Option<JobState>,
    /// Cursor returned by the previous page.
    pub after: Option<u64>,
    /// Page size, 1..=200.
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatsResponse {
    pub total: usize,
    pub by_state: BTreeMap<String, usize>,
    pub worker_slots: usize,
    pub busy_workers: usize,
    pub queued: usize,
    pub uptime_secs: i64,
}
