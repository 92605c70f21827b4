use serde::Serialize;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct BannerResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LivenessResponse {
    /// `healthy` or `unhealthy`.
    pub status: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthReport {
    pub healthy: bool,
    pub store_reachable: bool,
    pub scheduler_running: bool,
    pub worker_slots: usize,
    pub live_workers: usize,
    pub busy_workers: usize,
    pub queued: usize,
    pub version: String,
}
