use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{validate_source, FetchError, FetchRequest, FetchedArtifact, Fetcher};

/// Streams a source over HTTP into `<dest>.part` and renames it into place.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Failed {
                message: format!("failed to build HTTP client: {e}"),
                transient: false,
            })?;
        Ok(Self { client })
    }

    async fn download(&self, request: &FetchRequest, part: &Path) -> Result<FetchedArtifact, FetchError> {
        let response = self
            .client
            .get(request.source.clone())
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Failed {
                message: format!("{} responded with {}", request.source, status),
                transient: is_transient_status(status),
            });
        }

        if let Some(declared) = response.content_length() {
            if declared > request.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: request.max_bytes,
                    received: declared,
                });
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<mime::Mime>().ok())
            .map(|m| m.essence_str().to_string())
            .or_else(|| {
                mime_guess::from_path(request.source.path())
                    .first()
                    .map(|m| m.essence_str().to_string())
            });

        let mut file = fs::File::create(part).await.map_err(|source| FetchError::Io {
            path: part.to_path_buf(),
            source,
        })?;

        let mut stream = response.bytes_stream();
        let mut received: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(classify)?;
            received += chunk.len() as u64;
            if received > request.max_bytes {
                return Err(FetchError::TooLarge {
                    limit: request.max_bytes,
                    received,
                });
            }
            file.write_all(&chunk).await.map_err(|source| FetchError::Io {
                path: part.to_path_buf(),
                source,
            })?;
        }

        file.flush().await.map_err(|source| FetchError::Io {
            path: part.to_path_buf(),
            source,
        })?;
        file.sync_all().await.map_err(|source| FetchError::Io {
            path: part.to_path_buf(),
            source,
        })?;
        drop(file);

        fs::rename(part, &request.dest).await.map_err(|source| FetchError::Io {
            path: request.dest.clone(),
            source,
        })?;

        Ok(FetchedArtifact {
            path: request.dest.clone(),
            bytes: received,
            content_type,
        })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(
        &self,
        request: FetchRequest,
        cancel: &CancellationToken,
    ) -> Result<FetchedArtifact, FetchError> {
        validate_source(request.source.as_str())?;
        let part = part_path(&request.dest);

        info!("⬇️ Fetching {} into {:?}", request.source, request.dest);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::Cancelled),
            outcome = tokio::time::timeout(request.timeout, self.download(&request, &part)) => {
                outcome.unwrap_or(Err(FetchError::Timeout(request.timeout)))
            }
        };

        match result {
            Ok(artifact) => {
                info!("⬇️ Fetched {} bytes from {}", artifact.bytes, request.source);
                Ok(artifact)
            }
            Err(e) => {
                if let Err(rm) = fs::remove_file(&part).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        debug!("could not remove {:?}: {}", part, rm);
                    }
                }
                Err(e)
            }
        }
    }
}

/// Temporary name the download is written under before the rename.
pub fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::REQUEST_TIMEOUT
        || status == StatusCode::TOO_MANY_REQUESTS
}

fn classify(e: reqwest::Error) -> FetchError {
    let transient = e.is_connect() || e.is_timeout() || e.is_request() || e.is_body() || e.is_decode();
    FetchError::Failed {
        message: e.to_string(),
        transient,
    }
}
