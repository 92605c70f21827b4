use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use super::model::{IllegalTransition, Job, JobState, Transition};

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 200;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("job {0} already exists")]
    Duplicate(Uuid),
    #[error("job {id}: {source}")]
    InvalidTransition {
        id: Uuid,
        #[source]
        source: IllegalTransition,
    },
}

#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub state: Option<JobState>,
    /// Only jobs created after this sequence number.
    pub after: Option<u64>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn page_size(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

#[derive(Debug, Clone)]
pub struct JobPage {
    pub jobs: Vec<Job>,
    /// Pass as `after` to read the next page; `None` on the last page.
    pub next_cursor: Option<u64>,
}

/// Authoritative record of all jobs. Implementations serialize mutations so
/// that two concurrent transitions on one job cannot both succeed.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn create(&self, job: Job) -> Result<Uuid, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Job, StoreError>;

    async fn transition(&self, id: Uuid, transition: Transition) -> Result<Job, StoreError>;

    async fn list(&self, filter: &JobFilter) -> Result<JobPage, StoreError>;

    /// Job count per state, in [`JobState::ALL`] order.
    async fn counts(&self) -> Result<Vec<(JobState, usize)>, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
