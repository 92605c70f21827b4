use super::dto::{BannerResponse, HealthReport, LivenessResponse};
use crate::common::response::{ApiResponse, ApiSuccess};
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tracing::warn;

const SERVICE_NAME: &str = env!("CARGO_PKG_NAME");
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Collects liveness from the store and the worker pool. Reads only.
pub async fn check(state: &AppState) -> HealthReport {
    let store_reachable = match state.store.ping().await {
        Ok(()) => true,
        Err(e) => {
            warn!("Job store ping failed: {}", e);
            false
        }
    };
    let scheduler_running = state.scheduler.is_running();

    HealthReport {
        healthy: store_reachable && scheduler_running,
        store_reachable,
        scheduler_running,
        worker_slots: state.scheduler.slots(),
        live_workers: state.scheduler.live_workers(),
        busy_workers: state.scheduler.busy_workers(),
        queued: state.scheduler.queued(),
        version: VERSION.to_string(),
    }
}

fn status_code(healthy: bool) -> StatusCode {
    if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Service banner
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service is up", body = BannerResponse)
    ),
    tag = "Health"
)]
pub async fn banner() -> impl IntoResponse {
    Json(BannerResponse {
        status: "online".to_string(),
        service: SERVICE_NAME.to_string(),
        version: VERSION.to_string(),
    })
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Healthy", body = LivenessResponse),
        (status = 503, description = "Workers or store unavailable", body = LivenessResponse)
    ),
    tag = "Health"
)]
pub async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    let report = check(&state).await;
    let status = if report.healthy { "healthy" } else { "unhealthy" };
    (
        status_code(report.healthy),
        Json(LivenessResponse {
            status: status.to_string(),
        }),
    )
}

/// Liveness with worker pool detail
#[utoipa::path(
    get,
    path = "/api/v1/health",
    responses(
        (status = 200, description = "Healthy", body = ApiResponse<HealthReport>),
        (status = 503, description = "Unhealthy", body = ApiResponse<HealthReport>)
    ),
    tag = "Health"
)]
pub async fn health_detail(State(state): State<AppState>) -> impl IntoResponse {
    let report = check(&state).await;
    let code = status_code(report.healthy);
    let message = if report.healthy {
        "Service is healthy"
    } else {
        "Service is unhealthy"
    };
    ApiSuccess(ApiResponse::success(report, message), code)
}
