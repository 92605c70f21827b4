use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::modules::job::model::{Job, JobState, Transition};
use crate::modules::job::repository::{JobFilter, JobPage, JobRepository, StoreError};

/// Process-local job store. One lock guards the whole map, so every
/// mutation is linearizable.
#[derive(Default)]
pub struct InMemoryJobStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<Uuid, Job>,
    order: BTreeMap<u64, Uuid>,
    next_seq: u64,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobStore {
    async fn create(&self, mut job: Job) -> Result<Uuid, StoreError> {
        let mut inner = self.inner.write().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }

        inner.next_seq += 1;
        job.seq = inner.next_seq;
        let id = job.id;
        inner.order.insert(job.seq, id);
        inner.jobs.insert(id, job);
        Ok(id)
    }

    async fn get(&self, id: Uuid) -> Result<Job, StoreError> {
        self.inner
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn transition(&self, id: Uuid, transition: Transition) -> Result<Job, StoreError> {
        let mut inner = self.inner.write().await;
        let job = inner.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        job.apply(transition, OffsetDateTime::now_utc())
            .map_err(|source| StoreError::InvalidTransition { id, source })?;
        Ok(job.clone())
    }

    async fn list(&self, filter: &JobFilter) -> Result<JobPage, StoreError> {
        let inner = self.inner.read().await;
        let limit = filter.page_size();
        let start = filter.after.map_or(Bound::Unbounded, Bound::Excluded);

        let mut matching = inner
            .order
            .range((start, Bound::Unbounded))
            .filter_map(|(_, id)| inner.jobs.get(id))
            .filter(|job| filter.state.is_none_or(|s| job.state == s));

        let jobs: Vec<Job> = matching.by_ref().take(limit).cloned().collect();
        let next_cursor = match matching.next() {
            Some(_) => jobs.last().map(|job| job.seq),
            None => None,
        };

        Ok(JobPage { jobs, next_cursor })
    }

    async fn counts(&self) -> Result<Vec<(JobState, usize)>, StoreError> {
        let inner = self.inner.read().await;
        let mut counts: Vec<(JobState, usize)> = JobState::ALL.iter().map(|s| (*s, 0)).collect();
        for job in inner.jobs.values() {
            if let Some(entry) = counts.iter_mut().find(|(s, _)| *s == job.state) {
                entry.1 += 1;
            }
        }
        Ok(counts)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let _guard = self.inner.read().await;
        Ok(())
    }
}
