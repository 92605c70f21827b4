use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_channel::Sender;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::settings::AppConfig;
use crate::infrastructure::engine::{FormatAllowlist, FormatError, OutputFormat, Quality, TranscodeEngine};
use crate::infrastructure::fetch::{host_allowed, validate_source, Fetcher};
use crate::infrastructure::storage::Workspace;
use crate::modules::job::model::{Job, JobEvent, JobState, Transition};
use crate::modules::job::repository::{JobRepository, StoreError};
use crate::workers::pipeline;
use crate::workers::retry::RetryPolicy;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub slots: usize,
    pub fetch_max_bytes: u64,
    pub fetch_timeout: Duration,
    pub retry: RetryPolicy,
    pub transcode_timeout: Duration,
    pub transcode_grace: Duration,
    pub allowed_hosts: Vec<String>,
    pub formats: FormatAllowlist,
}

impl From<&AppConfig> for SchedulerConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            slots: config.worker_slots,
            fetch_max_bytes: config.fetch_max_bytes,
            fetch_timeout: config.fetch_timeout,
            retry: RetryPolicy {
                max_retries: config.fetch_max_retries,
                base_delay: config.fetch_backoff_base,
                max_delay: config.fetch_backoff_max,
                jitter: config.fetch_backoff_jitter,
            },
            transcode_timeout: config.transcode_timeout,
            transcode_grace: config.transcode_grace,
            allowed_hosts: config.allowed_hosts.clone(),
            formats: config.formats.clone(),
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub source: String,
    pub format: String,
    pub quality: Quality,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("{0}")]
    InvalidSource(String),
    #[error(transparent)]
    UnsupportedFormat(#[from] FormatError),
    #[error("job {id} is already {state}")]
    AlreadyTerminal { id: Uuid, state: JobState },
    #[error("scheduler is shut down")]
    Closed,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// State shared between the scheduler handle and its worker tasks.
pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) store: Arc<dyn JobRepository>,
    pub(crate) fetcher: Arc<dyn Fetcher>,
    pub(crate) engine: Arc<dyn TranscodeEngine>,
    pub(crate) workspace: Workspace,
    pub(crate) live_workers: AtomicUsize,
    pub(crate) busy: AtomicUsize,
    pub(crate) shutdown: CancellationToken,
    queue: Sender<Uuid>,
    tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    events: broadcast::Sender<JobEvent>,
    /// Held across a store commit and its broadcast so events leave in
    /// commit order.
    commits: Mutex<()>,
}

impl Shared {
    /// Commits a transition and broadcasts it.
    pub(crate) async fn transition(&self, id: Uuid, transition: Transition) -> Result<Job, StoreError> {
        let _commit = self.commits.lock().await;
        let job = self.store.transition(id, transition).await?;
        info!(job_id = %id, state = %job.state, "📌 Job is now {}", job.state);
        self.publish(&job);
        Ok(job)
    }

    fn publish(&self, job: &Job) {
        // No subscribers is fine.
        let _ = self.events.send(JobEvent {
            id: job.id,
            state: job.state,
            at: OffsetDateTime::now_utc(),
        });
    }

    pub(crate) async fn token_for(&self, id: Uuid) -> CancellationToken {
        self.tokens
            .lock()
            .await
            .entry(id)
            .or_insert_with(|| self.shutdown.child_token())
            .clone()
    }

    pub(crate) async fn forget(&self, id: Uuid) {
        self.tokens.lock().await.remove(&id);
    }
}

/// Accepts submissions and runs them on a fixed pool of worker tasks fed by
/// one FIFO queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Shared>,
    handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Scheduler {
    /// Spawns `config.slots` workers. Must be called inside a Tokio runtime.
    pub fn start(
        config: SchedulerConfig,
        store: Arc<dyn JobRepository>,
        fetcher: Arc<dyn Fetcher>,
        engine: Arc<dyn TranscodeEngine>,
        workspace: Workspace,
    ) -> Self {
        let (queue, receiver) = async_channel::unbounded();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let slots = config.slots.max(1);

        let inner = Arc::new(Shared {
            config,
            store,
            fetcher,
            engine,
            workspace,
            live_workers: AtomicUsize::new(0),
            busy: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            queue,
            tokens: Mutex::new(HashMap::new()),
            events,
            commits: Mutex::new(()),
        });

        let handles = (0..slots)
            .map(|slot| tokio::spawn(pipeline::run_worker(inner.clone(), receiver.clone(), slot)))
            .collect();

        info!("🚀 Scheduler started with {} worker slot(s)", slots);
        Self {
            inner,
            handles: Arc::new(Mutex::new(handles)),
        }
    }

    /// Validates and enqueues a job. Returns as soon as the job is `Submitted`.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Job, SchedulerError> {
        let shared = &self.inner;
        if shared.queue.is_closed() {
            return Err(SchedulerError::Closed);
        }

        let source = validate_source(&request.source).map_err(|e| SchedulerError::InvalidSource(e.to_string()))?;
        if !host_allowed(&source, &shared.config.allowed_hosts) {
            return Err(SchedulerError::InvalidSource(format!(
                "host '{}' is not allowed",
                source.host_str().unwrap_or_default()
            )));
        }
        let format = OutputFormat::parse(&request.format, request.quality)?;
        shared.config.formats.check(&format)?;

        let job = {
            let _commit = shared.commits.lock().await;
            let id = shared.store.create(Job::new(source, format)).await?;
            let job = shared.store.get(id).await?;
            shared.publish(&job);
            job
        };
        let id = job.id;
        shared.token_for(id).await;

        if shared.queue.send(id).await.is_err() {
            warn!(job_id = %id, "Queue closed before job could be enqueued");
            shared.forget(id).await;
            let _ = shared.transition(id, Transition::Cancel).await;
            return Err(SchedulerError::Closed);
        }

        info!(job_id = %id, source = %job.source, format = %job.format, "📥 Job submitted");
        Ok(job)
    }

    /// Cancels a non-terminal job. The store change is committed first, then
    /// the job's token is signalled so in-flight work stops.
    pub async fn cancel(&self, id: Uuid) -> Result<Job, SchedulerError> {
        let shared = &self.inner;
        let current = shared.store.get(id).await?;
        if current.state.is_terminal() {
            return Err(SchedulerError::AlreadyTerminal {
                id,
                state: current.state,
            });
        }

        let job = match shared.transition(id, Transition::Cancel).await {
            Ok(job) => job,
            Err(StoreError::InvalidTransition { source, .. }) => {
                return Err(SchedulerError::AlreadyTerminal {
                    id,
                    state: source.from,
                });
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(token) = shared.tokens.lock().await.get(&id) {
            token.cancel();
        }
        info!(job_id = %id, "🛑 Job cancelled");
        Ok(job)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    pub fn slots(&self) -> usize {
        self.inner.config.slots.max(1)
    }

    pub fn live_workers(&self) -> usize {
        self.inner.live_workers.load(Ordering::SeqCst)
    }

    pub fn busy_workers(&self) -> usize {
        self.inner.busy.load(Ordering::SeqCst)
    }

    /// Job ids waiting for a free slot.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Every worker task is alive and the queue still accepts work.
    pub fn is_running(&self) -> bool {
        !self.inner.queue.is_closed() && self.live_workers() == self.slots()
    }

    /// Stops accepting work, cancels in-flight jobs and waits for the workers.
    pub async fn shutdown(&self) {
        self.inner.queue.close();
        self.inner.shutdown.cancel();
        let handles = std::mem::take(&mut *self.handles.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Worker task ended abnormally: {}", e);
            }
        }
        info!("👋 Scheduler stopped");
    }
}
