pub mod ffmpeg;
pub mod format;
pub mod process;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::common::error::FailureKind;

pub use ffmpeg::FfmpegEngine;
pub use format::{Container, FormatAllowlist, FormatError, OutputFormat, Quality, VideoCodec};

#[derive(Debug, Clone)]
pub struct TranscodeRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    pub timeout: Duration,
    pub grace: Duration,
}

#[derive(Debug, Clone)]
pub struct TranscodeOutcome {
    pub output: PathBuf,
    pub bytes: u64,
    pub elapsed: Duration,
    pub summary: EngineSummary,
}

/// Figures scraped from the engine's diagnostic output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct EngineSummary {
    pub input_duration_secs: Option<f64>,
    pub encoded_duration_secs: Option<f64>,
    pub speed: Option<f64>,
    pub video_kib: Option<u64>,
    pub audio_kib: Option<u64>,
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("unsupported format: {0}")]
    UnsupportedFormat(#[from] FormatError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("output {0} already exists")]
    OutputExists(PathBuf),
    #[error("engine exited with {status}: {diagnostics}")]
    Failed { status: String, diagnostics: String },
    #[error("transcode timed out after {0:?}")]
    Timeout(Duration),
    #[error("transcode cancelled")]
    Cancelled,
    #[error("failed to start engine: {0}")]
    Spawn(String),
}

impl TranscodeError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            TranscodeError::UnsupportedFormat(_)
            | TranscodeError::InvalidInput(_)
            | TranscodeError::OutputExists(_) => FailureKind::NonRecoverableFailure,
            TranscodeError::Failed { .. } => FailureKind::EngineFailure,
            TranscodeError::Timeout(_) => FailureKind::TimeoutFailure,
            TranscodeError::Cancelled | TranscodeError::Spawn(_) => FailureKind::InternalError,
        }
    }
}

/// The external transcoding capability. One call runs at most one subprocess.
#[async_trait]
pub trait TranscodeEngine: Send + Sync {
    async fn invoke(
        &self,
        request: &TranscodeRequest,
        cancel: &CancellationToken,
    ) -> Result<TranscodeOutcome, TranscodeError>;
}

/// Input must exist and be non-empty; output must not exist yet.
pub async fn check_paths(request: &TranscodeRequest) -> Result<(), TranscodeError> {
    let meta = fs::metadata(&request.input)
        .await
        .map_err(|e| TranscodeError::InvalidInput(format!("{}: {}", request.input.display(), e)))?;
    if !meta.is_file() || meta.len() == 0 {
        return Err(TranscodeError::InvalidInput(format!(
            "{} is empty or not a file",
            request.input.display()
        )));
    }
    if fs::try_exists(&request.output).await.unwrap_or(true) {
        return Err(TranscodeError::OutputExists(request.output.clone()));
    }
    Ok(())
}
