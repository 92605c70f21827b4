use std::env;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} has an invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("{key}: {reason}")]
    Rejected { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy)]
pub enum EnvKey {
    ServerPort,
    WorkDir,
    WorkerSlots,
    FetchMaxBytes,
    FetchTimeoutSecs,
    FetchMaxRetries,
    FetchBackoffBaseMs,
    FetchBackoffMaxMs,
    FetchBackoffJitter,
    FetchUserAgent,
    AllowedHosts,
    TranscodeTimeoutSecs,
    TranscodeGraceSecs,
    FfmpegBin,
    SupportedFormats,
}

impl EnvKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvKey::ServerPort => "APP_PORT",
            EnvKey::WorkDir => "WORK_DIR",
            EnvKey::WorkerSlots => "WORKER_SLOTS",
            EnvKey::FetchMaxBytes => "FETCH_MAX_BYTES",
            EnvKey::FetchTimeoutSecs => "FETCH_TIMEOUT_SECS",
            EnvKey::FetchMaxRetries => "FETCH_MAX_RETRIES",
            EnvKey::FetchBackoffBaseMs => "FETCH_BACKOFF_BASE_MS",
            EnvKey::FetchBackoffMaxMs => "FETCH_BACKOFF_MAX_MS",
            EnvKey::FetchBackoffJitter => "FETCH_BACKOFF_JITTER",
            EnvKey::FetchUserAgent => "FETCH_USER_AGENT",
            EnvKey::AllowedHosts => "ALLOWED_HOSTS",
            EnvKey::TranscodeTimeoutSecs => "TRANSCODE_TIMEOUT_SECS",
            EnvKey::TranscodeGraceSecs => "TRANSCODE_GRACE_SECS",
            EnvKey::FfmpegBin => "FFMPEG_BIN",
            EnvKey::SupportedFormats => "SUPPORTED_FORMATS",
        }
    }
}

/// Unset and blank variables both count as absent.
pub fn get(key: EnvKey) -> Option<String> {
    env::var(key.as_str())
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn get_or(key: EnvKey, default: &str) -> String {
    get(key).unwrap_or_else(|| default.to_string())
}

/// Parses the variable when present. A value that does not parse is an error,
/// never a silent fallback to `default`.
pub fn get_parsed<T: FromStr>(key: EnvKey, default: T) -> Result<T, ConfigError> {
    match get(key) {
        Some(value) => value.parse::<T>().map_err(|_| ConfigError::Invalid {
            key: key.as_str(),
            value,
        }),
        None => Ok(default),
    }
}

pub fn get_list(key: EnvKey) -> Vec<String> {
    get(key)
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
