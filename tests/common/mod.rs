//! Shared doubles and a scheduler harness for the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use media_worker::infrastructure::engine::{
    EngineSummary, TranscodeEngine, TranscodeError, TranscodeOutcome, TranscodeRequest,
};
use media_worker::infrastructure::fetch::{FetchError, FetchRequest, FetchedArtifact, Fetcher};
use media_worker::infrastructure::storage::Workspace;
use media_worker::infrastructure::store::InMemoryJobStore;
use media_worker::modules::job::model::{Job, JobState};
use media_worker::modules::job::repository::JobRepository;
use media_worker::workers::retry::RetryPolicy;
use media_worker::workers::{Scheduler, SchedulerConfig, SubmitRequest};

pub const SOURCE_BYTES: &[u8] = b"not really a movie";

/// Fetcher that plays back queued failures, then succeeds.
#[derive(Default)]
pub struct ScriptedFetcher {
    script: Mutex<VecDeque<FetchError>>,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_with(errors: impl IntoIterator<Item = FetchError>) -> Self {
        Self {
            script: Mutex::new(errors.into_iter().collect()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(
        &self,
        request: FetchRequest,
        _cancel: &CancellationToken,
    ) -> Result<FetchedArtifact, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        if let Some(error) = next {
            return Err(error);
        }
        tokio::fs::write(&request.dest, SOURCE_BYTES).await.unwrap();
        Ok(FetchedArtifact {
            path: request.dest,
            bytes: SOURCE_BYTES.len() as u64,
            content_type: Some("video/quicktime".into()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineMode {
    Succeed,
    /// Blocks each call until [`FakeEngine::release`] hands out a permit.
    Gated,
    Fail,
    /// Panics on the first call, succeeds afterwards.
    PanicOnce,
}

pub struct FakeEngine {
    mode: EngineMode,
    delay: Duration,
    gate: Semaphore,
    calls: AtomicUsize,
    cancelled: AtomicUsize,
}

impl FakeEngine {
    pub fn new(mode: EngineMode) -> Self {
        Self {
            mode,
            delay: Duration::ZERO,
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            cancelled: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> usize {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TranscodeEngine for FakeEngine {
    async fn invoke(
        &self,
        request: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutcome, TranscodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);

        match self.mode {
            EngineMode::Fail => {
                return Err(TranscodeError::Failed {
                    status: "exit status: 1".into(),
                    diagnostics: "Invalid data found when processing input".into(),
                });
            }
            EngineMode::PanicOnce if call == 0 => panic!("engine blew up"),
            EngineMode::Gated => {
                tokio::select! {
                    permit = self.gate.acquire() => permit.unwrap().forget(),
                    _ = cancel.cancelled() => {
                        self.cancelled.fetch_add(1, Ordering::SeqCst);
                        return Err(TranscodeError::Cancelled);
                    }
                }
            }
            _ => {}
        }

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        tokio::fs::write(&request.output, b"transcoded").await.unwrap();
        Ok(TranscodeOutcome {
            output: request.output.clone(),
            bytes: 10,
            elapsed: self.delay,
            summary: EngineSummary::default(),
        })
    }
}

pub fn fast_config(slots: usize) -> SchedulerConfig {
    SchedulerConfig {
        slots,
        fetch_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            max_retries: 3,
            base_delay: Duration::from_millis(20),
            max_delay: Duration::from_millis(200),
            jitter: false,
        },
        transcode_timeout: Duration::from_secs(5),
        transcode_grace: Duration::from_millis(200),
        ..SchedulerConfig::default()
    }
}

pub struct Harness {
    pub scheduler: Scheduler,
    pub store: Arc<InMemoryJobStore>,
    pub fetcher: Arc<ScriptedFetcher>,
    pub engine: Arc<dyn TranscodeEngine>,
    pub dir: TempDir,
}

impl Harness {
    pub fn start(
        config: SchedulerConfig,
        fetcher: Arc<ScriptedFetcher>,
        engine: Arc<dyn TranscodeEngine>,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(InMemoryJobStore::new());
        let scheduler = Scheduler::start(
            config,
            store.clone(),
            fetcher.clone(),
            engine.clone(),
            Workspace::new(dir.path()),
        );
        Self {
            scheduler,
            store,
            fetcher,
            engine,
            dir,
        }
    }

    pub fn with_engine(slots: usize, engine: Arc<dyn TranscodeEngine>) -> Self {
        Self::start(fast_config(slots), Arc::new(ScriptedFetcher::new()), engine)
    }

    pub async fn submit(&self, source: &str) -> Job {
        self.scheduler
            .submit(request(source, "mp4/h264"))
            .await
            .unwrap()
    }

    pub async fn wait_for(&self, id: Uuid, state: JobState) -> Job {
        wait_for_state(self.store.as_ref(), id, state, Duration::from_secs(10)).await
    }
}

pub fn request(source: &str, format: &str) -> SubmitRequest {
    SubmitRequest {
        source: source.to_string(),
        format: format.to_string(),
        quality: Default::default(),
    }
}

/// Polls the store until the job reaches `state`; panics on timeout or when
/// the job settles in a different terminal state.
pub async fn wait_for_state(
    store: &dyn JobRepository,
    id: Uuid,
    state: JobState,
    within: Duration,
) -> Job {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let job = store.get(id).await.unwrap();
        if job.state == state {
            return job;
        }
        if job.state.is_terminal() {
            panic!("job {id} settled in {} (error: {:?}) while waiting for {state}", job.state, job.error);
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("job {id} still {} after {within:?}, wanted {state}", job.state);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
