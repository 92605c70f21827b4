use std::path::PathBuf;
use std::time::Duration;

use crate::config::env::{self, ConfigError, EnvKey};
use crate::infrastructure::engine::FormatAllowlist;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
pub const DEFAULT_FORMATS: &str = "mp4/h264,mp4/h265,webm/vp9,mkv/h264";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub server_port: u16,
    pub work_dir: PathBuf,
    pub worker_slots: usize,
    pub fetch_max_bytes: u64,
    pub fetch_timeout: Duration,
    pub fetch_max_retries: u32,
    pub fetch_backoff_base: Duration,
    pub fetch_backoff_max: Duration,
    pub fetch_backoff_jitter: bool,
    pub fetch_user_agent: String,
    pub allowed_hosts: Vec<String>,
    pub transcode_timeout: Duration,
    pub transcode_grace: Duration,
    pub ffmpeg_bin: PathBuf,
    pub formats: FormatAllowlist,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server_port: 8080,
            work_dir: PathBuf::from("downloads"),
            worker_slots: 2,
            fetch_max_bytes: 50 * 1024 * 1024,
            fetch_timeout: Duration::from_secs(120),
            fetch_max_retries: 3,
            fetch_backoff_base: Duration::from_millis(500),
            fetch_backoff_max: Duration::from_secs(30),
            fetch_backoff_jitter: false,
            fetch_user_agent: DEFAULT_USER_AGENT.to_string(),
            allowed_hosts: Vec::new(),
            transcode_timeout: Duration::from_secs(600),
            transcode_grace: Duration::from_secs(5),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            formats: FormatAllowlist::default(),
        }
    }
}

impl AppConfig {
    pub fn new() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let formats = match env::get(EnvKey::SupportedFormats) {
            Some(list) => FormatAllowlist::parse(&list).map_err(|e| ConfigError::Rejected {
                key: EnvKey::SupportedFormats.as_str(),
                reason: e.to_string(),
            })?,
            None => defaults.formats.clone(),
        };

        let config = Self {
            server_port: env::get_parsed(EnvKey::ServerPort, defaults.server_port)?,
            work_dir: PathBuf::from(env::get_or(EnvKey::WorkDir, "downloads")),
            worker_slots: env::get_parsed(EnvKey::WorkerSlots, defaults.worker_slots)?,
            fetch_max_bytes: env::get_parsed(EnvKey::FetchMaxBytes, defaults.fetch_max_bytes)?,
            fetch_timeout: Duration::from_secs(env::get_parsed(EnvKey::FetchTimeoutSecs, 120)?),
            fetch_max_retries: env::get_parsed(EnvKey::FetchMaxRetries, defaults.fetch_max_retries)?,
            fetch_backoff_base: Duration::from_millis(env::get_parsed(EnvKey::FetchBackoffBaseMs, 500)?),
            fetch_backoff_max: Duration::from_millis(env::get_parsed(EnvKey::FetchBackoffMaxMs, 30_000)?),
            fetch_backoff_jitter: env::get_parsed(EnvKey::FetchBackoffJitter, false)?,
            fetch_user_agent: env::get_or(EnvKey::FetchUserAgent, DEFAULT_USER_AGENT),
            allowed_hosts: env::get_list(EnvKey::AllowedHosts),
            transcode_timeout: Duration::from_secs(env::get_parsed(EnvKey::TranscodeTimeoutSecs, 600)?),
            transcode_grace: Duration::from_secs(env::get_parsed(EnvKey::TranscodeGraceSecs, 5)?),
            ffmpeg_bin: PathBuf::from(env::get_or(EnvKey::FfmpegBin, "ffmpeg")),
            formats,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let reject = |key: EnvKey, reason: &str| ConfigError::Rejected {
            key: key.as_str(),
            reason: reason.to_string(),
        };
        if self.worker_slots == 0 {
            return Err(reject(EnvKey::WorkerSlots, "at least one worker slot is required"));
        }
        if self.fetch_max_bytes == 0 {
            return Err(reject(EnvKey::FetchMaxBytes, "must be greater than zero"));
        }
        if self.fetch_timeout.is_zero() {
            return Err(reject(EnvKey::FetchTimeoutSecs, "must be greater than zero"));
        }
        if self.transcode_timeout.is_zero() {
            return Err(reject(EnvKey::TranscodeTimeoutSecs, "must be greater than zero"));
        }
        if self.fetch_backoff_max < self.fetch_backoff_base {
            return Err(reject(
                EnvKey::FetchBackoffMaxMs,
                "must not be below FETCH_BACKOFF_BASE_MS",
            ));
        }
        Ok(())
    }
}
