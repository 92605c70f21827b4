use axum::routing::get;
use axum::Router;

use crate::state::AppState;

pub mod dto;
pub mod handler;

/// Probes served at the root, outside `/api/v1`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handler::banner))
        .route("/health", get(handler::liveness))
}
