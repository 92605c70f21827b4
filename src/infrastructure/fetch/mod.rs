pub mod http;

use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::common::error::FailureKind;

pub use http::HttpFetcher;

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub source: Url,
    pub dest: PathBuf,
    pub max_bytes: u64,
    pub timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedArtifact {
    pub path: PathBuf,
    pub bytes: u64,
    pub content_type: Option<String>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid source: {0}")]
    InvalidSource(String),
    #[error("fetch timed out after {0:?}")]
    Timeout(Duration),
    #[error("source exceeds the {limit} byte limit ({received} bytes seen)")]
    TooLarge { limit: u64, received: u64 },
    #[error("fetch failed: {message}")]
    Failed { message: String, transient: bool },
    #[error("fetch cancelled")]
    Cancelled,
    #[error("failed writing {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl FetchError {
    /// Worth another attempt under the retry policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Timeout(_) | FetchError::Failed { transient: true, .. }
        )
    }

    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FetchError::InvalidSource(_) => FailureKind::ValidationError,
            FetchError::Timeout(_) => FailureKind::TimeoutFailure,
            FetchError::TooLarge { .. } => FailureKind::NonRecoverableFailure,
            FetchError::Failed { transient: true, .. } => FailureKind::TransientFailure,
            FetchError::Failed { transient: false, .. } => FailureKind::NonRecoverableFailure,
            FetchError::Cancelled | FetchError::Io { .. } => FailureKind::InternalError,
        }
    }
}

/// Retrieves one remote resource into a job's working area.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(
        &self,
        request: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchedArtifact, FetchError>;
}

/// A source must be an absolute http(s) URL with a host.
pub fn validate_source(raw: &str) -> Result<Url, FetchError> {
    let url = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidSource(format!("{raw}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::InvalidSource(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    match url.host_str() {
        Some(host) if !host.is_empty() => Ok(url),
        _ => Err(FetchError::InvalidSource(format!("{raw}: missing host"))),
    }
}

/// Host allowlist check; `example.com` also admits `v.example.com`.
/// An empty list admits every host.
pub fn host_allowed(url: &Url, allowed: &[String]) -> bool {
    if allowed.is_empty() {
        return true;
    }
    let Some(host) = url.host_str().map(|h| h.to_ascii_lowercase()) else {
        return false;
    };
    allowed.iter().any(|entry| {
        let entry = entry.trim().trim_start_matches('.').to_ascii_lowercase();
        host == entry || host.ends_with(&format!(".{entry}"))
    })
}
