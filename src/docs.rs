use utoipa::OpenApi;

use crate::common::error::{ErrorDetail, FailureKind};
use crate::infrastructure::engine::{EngineSummary, Quality};
use crate::modules::health::dto::{BannerResponse, HealthReport, LivenessResponse};
use crate::modules::job::dto::{CreateJobRequest, JobListResponse, JobResponse, JobStatsResponse};
use crate::modules::job::model::{JobResult, JobState, SourceInfo};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::health::handler::banner,
        crate::modules::health::handler::liveness,
        crate::modules::health::handler::health_detail,
        crate::modules::job::handler::submit_job,
        crate::modules::job::handler::list_jobs,
        crate::modules::job::handler::get_job,
        crate::modules::job::handler::cancel_job,
        crate::modules::job::handler::job_stats,
    ),
    components(
        schemas(
            CreateJobRequest, JobResponse, JobListResponse, JobStatsResponse,
            JobState, JobResult, SourceInfo, EngineSummary, Quality,
            ErrorDetail, FailureKind,
            BannerResponse, LivenessResponse, HealthReport,
        )
    ),
    tags(
        (name = "Jobs", description = "Media fetch and transcode jobs"),
        (name = "Health", description = "Liveness and service status")
    )
)]
pub struct ApiDoc;
