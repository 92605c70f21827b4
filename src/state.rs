use std::sync::Arc;
use time::OffsetDateTime;

use crate::config::settings::AppConfig;
use crate::modules::job::repository::JobRepository;
use crate::workers::Scheduler;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn JobRepository>,
    pub scheduler: Scheduler,
    pub started_at: OffsetDateTime,
}

impl AppState {
    pub fn new(config: AppConfig, store: Arc<dyn JobRepository>, scheduler: Scheduler) -> Self {
        Self {
            config: Arc::new(config),
            store,
            scheduler,
            started_at: OffsetDateTime::now_utc(),
        }
    }
}
