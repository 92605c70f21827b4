use std::collections::BTreeMap;
use time::OffsetDateTime;
use uuid::Uuid;
use validator::Validate;

use super::dto::{CreateJobRequest, JobListResponse, JobResponse, JobStatsResponse, ListJobsQuery};
use super::repository::JobFilter;
use crate::common::error::ServiceError;
use crate::state::AppState;
use crate::workers::SubmitRequest;

pub struct JobService;

impl JobService {
    pub async fn submit(state: AppState, req: CreateJobRequest) -> Result<JobResponse, ServiceError> {
        req.validate()?;
        let job = state
            .scheduler
            .submit(SubmitRequest {
                source: req.source,
                format: req.format,
                quality: req.quality,
            })
            .await?;
        Ok(job.into())
    }

    pub async fn find_by_id(state: AppState, id: Uuid) -> Result<JobResponse, ServiceError> {
        Ok(state.store.get(id).await?.into())
    }

    pub async fn list(state: AppState, query: ListJobsQuery) -> Result<JobListResponse, ServiceError> {
        let page = state
            .store
            .list(&JobFilter {
                state: query.state,
                after: query.after,
                limit: query.limit,
            })
            .await?;

        Ok(JobListResponse {
            jobs: page.jobs.into_iter().map(JobResponse::from).collect(),
            next_cursor: page.next_cursor,
        })
    }

    pub async fn cancel(state: AppState, id: Uuid) -> Result<JobResponse, ServiceError> {
        Ok(state.scheduler.cancel(id).await?.into())
    }

    pub async fn stats(state: AppState) -> Result<JobStatsResponse, ServiceError> {
        let counts = state.store.counts().await?;
        let by_state: BTreeMap<String, usize> = counts
            .iter()
            .map(|(job_state, count)| (job_state.as_str().to_string(), *count))
            .collect();

        Ok(JobStatsResponse {
            total: counts.iter().map(|(_, count)| count).sum(),
            by_state,
            worker_slots: state.scheduler.slots(),
            busy_workers: state.scheduler.busy_workers(),
            queued: state.scheduler.queued(),
            uptime_secs: (OffsetDateTime::now_utc() - state.started_at).whole_seconds(),
        })
    }
}
