use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_channel::Receiver;
use futures_util::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::common::error::ErrorDetail;
use crate::infrastructure::engine::{TranscodeError, TranscodeRequest};
use crate::infrastructure::fetch::{FetchError, FetchRequest};
use crate::modules::job::model::{Job, JobResult, SourceInfo, Transition};
use crate::modules::job::repository::StoreError;
use crate::workers::retry::{retry_with_backoff, RetryFailure};
use crate::workers::scheduler::Shared;

/// Why a job stopped before `Completed`.
#[derive(Debug)]
enum Halt {
    Failed(ErrorDetail),
    Cancelled,
    /// Someone else moved the job to a terminal state first.
    Superseded,
}

impl From<RetryFailure> for Halt {
    fn from(failure: RetryFailure) -> Self {
        let RetryFailure { error, attempts } = failure;
        if matches!(error, FetchError::Cancelled) {
            return Halt::Cancelled;
        }
        let message = if attempts > 1 {
            format!("{error} (after {attempts} attempts)")
        } else {
            error.to_string()
        };
        Halt::Failed(ErrorDetail::new(error.failure_kind(), message))
    }
}

impl From<TranscodeError> for Halt {
    fn from(error: TranscodeError) -> Self {
        match error {
            TranscodeError::Cancelled => Halt::Cancelled,
            other => Halt::Failed(ErrorDetail::new(other.failure_kind(), other.to_string())),
        }
    }
}

impl From<StoreError> for Halt {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::InvalidTransition { .. } => Halt::Superseded,
            other => {
                error!("Job store rejected an update: {}", other);
                Halt::Failed(ErrorDetail::internal(other.to_string()))
            }
        }
    }
}

/// Keeps `live_workers` accurate even if the task unwinds.
struct LiveGuard<'a>(&'a AtomicUsize);

impl<'a> LiveGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for LiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub(crate) async fn run_worker(shared: Arc<Shared>, queue: Receiver<Uuid>, slot: usize) {
    let _live = LiveGuard::enter(&shared.live_workers);
    info!("👷 Worker {} ready", slot);

    loop {
        let id = tokio::select! {
            biased;
            _ = shared.shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Ok(id) => id,
                Err(_) => break,
            },
        };

        let token = shared.token_for(id).await;
        shared.busy.fetch_add(1, Ordering::SeqCst);

        let span = info_span!("job", job_id = %id, slot);
        let outcome = AssertUnwindSafe(process(&shared, id, &token))
            .catch_unwind()
            .instrument(span)
            .await;
        if let Err(panic) = outcome {
            let message = panic_message(panic.as_ref());
            error!(job_id = %id, "💥 Job pipeline panicked: {}", message);
            if let Err(e) = shared
                .transition(id, Transition::Fail(ErrorDetail::internal(format!("worker panicked: {message}"))))
                .await
            {
                error!(job_id = %id, "Could not record panic: {}", e);
            }
        }

        shared.busy.fetch_sub(1, Ordering::SeqCst);
        shared.forget(id).await;
    }

    info!("Worker {} stopped", slot);
}

async fn process(shared: &Shared, id: Uuid, token: &CancellationToken) {
    let job = match shared.transition(id, Transition::StartFetching).await {
        Ok(job) => job,
        Err(StoreError::InvalidTransition { source, .. }) => {
            info!("⏭️ Skipping job already {}", source.from);
            return;
        }
        Err(e) => {
            error!("Could not start job: {}", e);
            return;
        }
    };

    match run_stages(shared, &job, token).await {
        Ok(()) => info!("✅ Job completed"),
        Err(halt) => settle(shared, id, token, halt).await,
    }
}

async fn run_stages(shared: &Shared, job: &Job, token: &CancellationToken) -> Result<(), Halt> {
    let config = &shared.config;
    let area = shared.workspace.allocate(job.id).await.map_err(|e| {
        Halt::Failed(ErrorDetail::internal(format!("cannot create working area: {e}")))
    })?;

    let request = FetchRequest {
        source: job.source.clone(),
        dest: area.source_path(&job.source),
        max_bytes: config.fetch_max_bytes,
        timeout: config.fetch_timeout,
    };
    info!("⬇️ Fetching {}", job.source);
    let (artifact, attempts) = retry_with_backoff(&config.retry, token, |attempt| {
        let request = request.clone();
        async move {
            if attempt > 0 {
                info!("⬇️ Fetch attempt {}", attempt + 1);
            }
            shared.fetcher.fetch(request, token).await
        }
    })
    .await?;
    info!("⬇️ Fetched {} bytes in {} attempt(s)", artifact.bytes, attempts);

    shared
        .transition(
            job.id,
            Transition::StartTranscoding(SourceInfo {
                bytes: artifact.bytes,
                content_type: artifact.content_type.clone(),
                attempts,
            }),
        )
        .await?;

    let request = TranscodeRequest {
        input: artifact.path,
        output: area.output_path(job.format.container),
        format: job.format,
        timeout: config.transcode_timeout,
        grace: config.transcode_grace,
    };
    info!("🎥 Transcoding to {}", job.format);
    let outcome = shared.engine.invoke(&request, token).await?;

    shared
        .transition(
            job.id,
            Transition::Complete(JobResult {
                path: outcome.output,
                bytes: outcome.bytes,
                elapsed_ms: u64::try_from(outcome.elapsed.as_millis()).unwrap_or(u64::MAX),
                summary: outcome.summary,
            }),
        )
        .await?;
    Ok(())
}

async fn settle(shared: &Shared, id: Uuid, token: &CancellationToken, halt: Halt) {
    let transition = match halt {
        Halt::Superseded => {
            info!("⏹️ Job left the pipeline after an external state change");
            return;
        }
        Halt::Cancelled => Transition::Cancel,
        Halt::Failed(_) if token.is_cancelled() => Transition::Cancel,
        Halt::Failed(detail) => {
            error!(kind = %detail.kind, "❌ Job failed: {}", detail.message);
            Transition::Fail(detail)
        }
    };

    match shared.transition(id, transition).await {
        Ok(_) => {}
        Err(StoreError::InvalidTransition { source, .. }) => {
            debug!("Job already {}, nothing to record", source.from);
        }
        Err(e) => error!("Could not record job outcome: {}", e),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
