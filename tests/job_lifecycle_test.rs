//! Scheduler and worker pool behaviour driven through fake fetchers and engines.

mod common;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{fast_config, request, EngineMode, FakeEngine, Harness, ScriptedFetcher};
use media_worker::common::error::FailureKind;
use media_worker::infrastructure::fetch::FetchError;
use media_worker::modules::job::model::JobState;
use media_worker::workers::SchedulerError;

const SOURCE: &str = "https://media.example.test/clips/intro.mov";

fn transient() -> FetchError {
    FetchError::Failed {
        message: "https://media.example.test responded with 503 Service Unavailable".into(),
        transient: true,
    }
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn job_walks_the_full_state_path() {
    let engine = Arc::new(FakeEngine::new(EngineMode::Succeed));
    let harness = Harness::with_engine(2, engine.clone());
    let mut events = harness.scheduler.subscribe();

    let job = harness.submit(SOURCE).await;
    assert_eq!(job.state, JobState::Submitted);
    let done = harness.wait_for(job.id, JobState::Completed).await;

    let mut path = Vec::new();
    while path.last() != Some(&JobState::Completed) {
        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .unwrap()
            .unwrap();
        if event.id == job.id {
            path.push(event.state);
        }
    }
    assert_eq!(
        path,
        [
            JobState::Submitted,
            JobState::Fetching,
            JobState::Transcoding,
            JobState::Completed
        ]
    );

    let result = done.result.expect("completed job has a result");
    assert_eq!(result.path, harness.dir.path().join(job.id.to_string()).join("output.mp4"));
    assert!(result.path.exists());
    assert!(done.error.is_none());
    assert!(done.completed_at.is_some());
    assert_eq!(done.fetched.unwrap().attempts, 1);
}

#[tokio::test]
async fn identical_submissions_get_distinct_ids_and_areas() {
    let harness = Harness::with_engine(2, Arc::new(FakeEngine::new(EngineMode::Succeed)));

    let a = harness.submit(SOURCE).await;
    let b = harness.submit(SOURCE).await;
    assert_ne!(a.id, b.id);

    let a = harness.wait_for(a.id, JobState::Completed).await;
    let b = harness.wait_for(b.id, JobState::Completed).await;
    let (pa, pb) = (a.result.unwrap().path, b.result.unwrap().path);
    assert_ne!(pa.parent(), pb.parent());
    assert!(pa.exists() && pb.exists());
}

// ---------------------------------------------------------------------------
// Concurrency bound and ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_slot_holds_second_job_until_first_is_terminal() {
    let engine = Arc::new(FakeEngine::new(EngineMode::Gated));
    let harness = Harness::with_engine(1, engine.clone());

    let first = harness.submit(SOURCE).await;
    let second = harness.submit(SOURCE).await;

    harness.wait_for(first.id, JobState::Transcoding).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(
        harness.store.get_state(second.id).await,
        JobState::Submitted
    );
    assert_eq!(harness.scheduler.queued(), 1);

    engine.release(1);
    harness.wait_for(first.id, JobState::Completed).await;
    harness.wait_for(second.id, JobState::Transcoding).await;
    engine.release(1);
    let second = harness.wait_for(second.id, JobState::Completed).await;
    let first = harness.store.get_job(first.id).await;
    assert!(first.completed_at.unwrap() <= second.started_at.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn never_more_active_jobs_than_slots() {
    let slots = 2;
    let engine = Arc::new(FakeEngine::new(EngineMode::Succeed).with_delay(Duration::from_millis(30)));
    let harness = Harness::with_engine(slots, engine.clone());
    let mut events = harness.scheduler.subscribe();

    let mut ids = Vec::new();
    for _ in 0..6 {
        ids.push(harness.submit(SOURCE).await.id);
    }

    let mut states = HashMap::new();
    let mut peak = 0;
    while states.len() < ids.len() || states.values().any(|s: &JobState| !s.is_terminal()) {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        states.insert(event.id, event.state);
        let active = states.values().filter(|s| s.is_active()).count();
        peak = peak.max(active);
    }

    assert!(peak <= slots, "saw {peak} active jobs with {slots} slots");
    assert!(states.values().all(|s| *s == JobState::Completed));
    assert_eq!(engine.calls(), ids.len());
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn transient_failures_are_retried_with_backoff() {
    let fetcher = Arc::new(ScriptedFetcher::failing_with([transient(), transient()]));
    let mut config = fast_config(1);
    config.retry.base_delay = Duration::from_millis(50);
    config.retry.max_delay = Duration::from_secs(1);
    let harness = Harness::start(config, fetcher.clone(), Arc::new(FakeEngine::new(EngineMode::Succeed)));

    let started = Instant::now();
    let job = harness.submit(SOURCE).await;
    let job = harness.wait_for(job.id, JobState::Completed).await;

    // 50ms after the first failure, 100ms after the second.
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(fetcher.calls(), 3);
    assert_eq!(job.fetched.unwrap().attempts, 3);
}

#[tokio::test]
async fn exhausted_retries_fail_as_transient() {
    let fetcher = Arc::new(ScriptedFetcher::failing_with((0..10).map(|_| transient())));
    let mut config = fast_config(1);
    config.retry.max_retries = 2;
    let harness = Harness::start(config, fetcher.clone(), Arc::new(FakeEngine::new(EngineMode::Succeed)));

    let job = harness.submit(SOURCE).await;
    let job = harness.wait_for(job.id, JobState::Failed).await;

    let error = job.error.unwrap();
    assert_eq!(error.kind, FailureKind::TransientFailure);
    assert!(error.message.contains("after 3 attempts"), "{}", error.message);
    assert_eq!(fetcher.calls(), 3);
    assert!(job.result.is_none());
}

#[tokio::test]
async fn oversize_source_is_not_retried() {
    let fetcher = Arc::new(ScriptedFetcher::failing_with([FetchError::TooLarge {
        limit: 1024,
        received: 4096,
    }]));
    let engine = Arc::new(FakeEngine::new(EngineMode::Succeed));
    let harness = Harness::start(fast_config(1), fetcher.clone(), engine.clone());

    let job = harness.submit(SOURCE).await;
    let job = harness.wait_for(job.id, JobState::Failed).await;

    assert_eq!(job.error.unwrap().kind, FailureKind::NonRecoverableFailure);
    assert_eq!(fetcher.calls(), 1);
    assert_eq!(engine.calls(), 0);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn engine_failure_is_recorded() {
    let harness = Harness::with_engine(1, Arc::new(FakeEngine::new(EngineMode::Fail)));

    let job = harness.submit(SOURCE).await;
    let job = harness.wait_for(job.id, JobState::Failed).await;

    let error = job.error.unwrap();
    assert_eq!(error.kind, FailureKind::EngineFailure);
    assert!(error.message.contains("Invalid data"));
    assert!(job.completed_at.is_some());
}

#[tokio::test]
async fn panic_in_one_job_does_not_stop_the_worker() {
    let harness = Harness::with_engine(1, Arc::new(FakeEngine::new(EngineMode::PanicOnce)));

    let first = harness.submit(SOURCE).await;
    let first = harness.wait_for(first.id, JobState::Failed).await;
    assert_eq!(first.error.unwrap().kind, FailureKind::InternalError);

    let second = harness.submit(SOURCE).await;
    harness.wait_for(second.id, JobState::Completed).await;
    assert!(harness.scheduler.is_running());
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancelling_a_queued_job_skips_fetch_and_engine() {
    let engine = Arc::new(FakeEngine::new(EngineMode::Gated));
    let harness = Harness::with_engine(1, engine.clone());

    let running = harness.submit(SOURCE).await;
    harness.wait_for(running.id, JobState::Transcoding).await;
    let queued = harness.submit(SOURCE).await;

    let cancelled = harness.scheduler.cancel(queued.id).await.unwrap();
    assert_eq!(cancelled.state, JobState::Cancelled);
    assert!(cancelled.started_at.is_none());

    engine.release(1);
    harness.wait_for(running.id, JobState::Completed).await;
    // Give the worker time to dequeue and skip the cancelled job.
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(harness.fetcher.calls(), 1);
    assert_eq!(engine.calls(), 1);
    assert_eq!(harness.store.get_state(queued.id).await, JobState::Cancelled);
    assert!(!harness.dir.path().join(queued.id.to_string()).exists());
}

#[tokio::test]
async fn cancelling_an_active_job_stops_the_engine() {
    let engine = Arc::new(FakeEngine::new(EngineMode::Gated));
    let harness = Harness::with_engine(1, engine.clone());

    let job = harness.submit(SOURCE).await;
    harness.wait_for(job.id, JobState::Transcoding).await;
    harness.scheduler.cancel(job.id).await.unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while engine.cancelled() == 0 {
        assert!(Instant::now() < deadline, "engine never saw the cancellation");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let job = harness.store.get_job(job.id).await;
    assert_eq!(job.state, JobState::Cancelled);
    assert!(job.error.is_none());
    assert!(job.result.is_none());

    // The slot is free again.
    let next = harness.submit(SOURCE).await;
    harness.wait_for(next.id, JobState::Transcoding).await;
    engine.release(1);
    harness.wait_for(next.id, JobState::Completed).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn events_follow_commit_order_when_cancel_races_workers() {
    let engine = Arc::new(FakeEngine::new(EngineMode::Succeed));
    let harness = Harness::with_engine(4, engine);
    let mut events = harness.scheduler.subscribe();

    let mut ids = Vec::new();
    for i in 0..40u64 {
        let id = harness.submit(SOURCE).await.id;
        ids.push(id);
        let scheduler = harness.scheduler.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_micros(i * 37 % 400)).await;
            let _ = scheduler.cancel(id).await;
        });
    }

    let mut paths: HashMap<uuid::Uuid, Vec<JobState>> = HashMap::new();
    while paths.len() < ids.len() || paths.values().any(|p| !p.last().is_some_and(|s| s.is_terminal())) {
        let event = tokio::time::timeout(Duration::from_secs(10), events.recv())
            .await
            .unwrap()
            .unwrap();
        paths.entry(event.id).or_default().push(event.state);
    }
    // Stragglers published after a terminal state would show up here.
    tokio::time::sleep(Duration::from_millis(100)).await;
    while let Ok(event) = events.try_recv() {
        paths.entry(event.id).or_default().push(event.state);
    }

    for (id, path) in &paths {
        assert_eq!(path[0], JobState::Submitted, "{id}: {path:?}");
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{id}: {path:?}");
        }
        assert_eq!(harness.store.get_state(*id).await, *path.last().unwrap(), "{id}: {path:?}");
    }
}

#[tokio::test]
async fn cancelling_a_terminal_job_changes_nothing() {
    let harness = Harness::with_engine(1, Arc::new(FakeEngine::new(EngineMode::Succeed)));

    let job = harness.submit(SOURCE).await;
    let done = harness.wait_for(job.id, JobState::Completed).await;

    let err = harness.scheduler.cancel(job.id).await.unwrap_err();
    assert!(matches!(
        err,
        SchedulerError::AlreadyTerminal {
            state: JobState::Completed,
            ..
        }
    ));
    assert_eq!(harness.store.get_job(job.id).await, done);
}

// ---------------------------------------------------------------------------
// Submission validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_submissions_are_rejected_synchronously() {
    let mut config = fast_config(1);
    config.allowed_hosts = vec!["example.test".into()];
    let harness = Harness::start(
        config,
        Arc::new(ScriptedFetcher::new()),
        Arc::new(FakeEngine::new(EngineMode::Succeed)),
    );
    let submit = |source: &'static str, format: &'static str| {
        let scheduler = harness.scheduler.clone();
        async move { scheduler.submit(request(source, format)).await }
    };

    assert!(matches!(
        submit("not a url", "mp4/h264").await,
        Err(SchedulerError::InvalidSource(_))
    ));
    assert!(matches!(
        submit("ftp://media.example.test/a.mov", "mp4/h264").await,
        Err(SchedulerError::InvalidSource(_))
    ));
    assert!(matches!(
        submit("https://elsewhere.invalid/a.mov", "mp4/h264").await,
        Err(SchedulerError::InvalidSource(_))
    ));
    assert!(matches!(
        submit(SOURCE, "webm/h264").await,
        Err(SchedulerError::UnsupportedFormat(_))
    ));
    assert!(matches!(
        submit(SOURCE, "mov/h264").await,
        Err(SchedulerError::UnsupportedFormat(_))
    ));

    let page = harness.store.list_all().await;
    assert!(page.is_empty(), "rejected submissions must not create jobs");
    assert!(submit(SOURCE, "webm/vp9").await.is_ok());
}

#[tokio::test]
async fn submissions_after_shutdown_are_refused() {
    let harness = Harness::with_engine(1, Arc::new(FakeEngine::new(EngineMode::Succeed)));
    harness.scheduler.shutdown().await;

    assert!(!harness.scheduler.is_running());
    assert!(matches!(
        harness.scheduler.submit(request(SOURCE, "mp4/h264")).await,
        Err(SchedulerError::Closed)
    ));
}

// ---------------------------------------------------------------------------
// Real engine adapter against a fake ffmpeg binary
// ---------------------------------------------------------------------------

#[cfg(unix)]
#[tokio::test]
async fn engine_timeout_fails_the_job_and_reaps_the_process() {
    use media_worker::infrastructure::engine::FfmpegEngine;
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    use std::os::unix::fs::PermissionsExt;

    let bin = tempfile::tempdir().unwrap();
    let pid_file = bin.path().join("engine.pid");
    let script = bin.path().join("fake-ffmpeg");
    std::fs::write(
        &script,
        format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n", pid_file.display()),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = fast_config(1);
    config.transcode_timeout = Duration::from_millis(300);
    config.transcode_grace = Duration::from_millis(100);
    let harness = Harness::start(
        config,
        Arc::new(ScriptedFetcher::new()),
        Arc::new(FfmpegEngine::new(&script)),
    );

    let job = harness.submit(SOURCE).await;
    let job = harness.wait_for(job.id, JobState::Failed).await;
    assert_eq!(job.error.unwrap().kind, FailureKind::TimeoutFailure);

    let pid: i32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
    assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
}

// Store helpers used only by these tests.
trait StoreExt {
    async fn get_job(&self, id: uuid::Uuid) -> media_worker::modules::job::model::Job;
    async fn get_state(&self, id: uuid::Uuid) -> JobState;
    async fn list_all(&self) -> HashSet<uuid::Uuid>;
}

impl StoreExt for media_worker::infrastructure::store::InMemoryJobStore {
    async fn get_job(&self, id: uuid::Uuid) -> media_worker::modules::job::model::Job {
        use media_worker::modules::job::repository::JobRepository;
        self.get(id).await.unwrap()
    }

    async fn get_state(&self, id: uuid::Uuid) -> JobState {
        self.get_job(id).await.state
    }

    async fn list_all(&self) -> HashSet<uuid::Uuid> {
        use media_worker::modules::job::repository::{JobFilter, JobRepository};
        self.list(&JobFilter::default())
            .await
            .unwrap()
            .jobs
            .into_iter()
            .map(|job| job.id)
            .collect()
    }
}
